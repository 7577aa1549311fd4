//! Repository dispatcher: prioritized, deduplicating work queue with an
//! exclusive-lock mode for bulk operations (§4.2).
//!
//! This is a synchronous primitive (`std::sync::{Mutex, Condvar}`) rather
//! than an async one: workers call [`RepoDispatcher::take`] from a dedicated
//! blocking context (`tokio::task::spawn_blocking`), mirroring the
//! goroutine-per-worker structure the design is modeled on. Putting a real
//! OS-thread block here is correct — unlike network or database I/O, this is
//! a short, usually-uncontended rendezvous.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    Low,
    High,
}

struct State {
    /// Repositories with a `low` desired priority, queued in insertion order.
    low_ready: VecDeque<String>,
    /// Repositories with a `high` desired priority, queued in insertion order.
    high_ready: VecDeque<String>,
    /// Desired priority for a repo that's in a ready set, keyed by name, to
    /// dedupe repeated `add()` calls without scanning the queues.
    desired: std::collections::HashMap<String, Priority>,
    /// Repositories currently held by a worker.
    pending: HashSet<String>,
    locked: bool,
}

impl State {
    fn enqueue(&mut self, repo: &str, priority: Priority) {
        match priority {
            Priority::Low => self.low_ready.push_back(repo.to_string()),
            Priority::High => self.high_ready.push_back(repo.to_string()),
        }
        self.desired.insert(repo.to_string(), priority);
    }
}

/// Coordinates exclusive access between per-repository fetch workers and
/// bulk operations (`FetchAll`, `GarbageCollect`) that need a consistent
/// view of the registry.
pub struct RepoDispatcher {
    state: Mutex<State>,
    /// Signalled when a repo becomes ready to take, or when unlocked.
    ready: Condvar,
    /// Signalled when `pending` drops to zero.
    drained: Condvar,
}

impl Default for RepoDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoDispatcher {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                low_ready: VecDeque::new(),
                high_ready: VecDeque::new(),
                desired: std::collections::HashMap::new(),
                pending: HashSet::new(),
                locked: false,
            }),
            ready: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Upserts `repo`'s desired priority. `low_priority = true` raises
    /// `none -> low` but never lowers an existing `high` back to `low`;
    /// `low_priority = false` always forces `high`.
    pub fn add(&self, repo: &str, low_priority: bool) {
        let mut state = self.state.lock().unwrap();

        if state.pending.contains(repo) {
            // Held by a worker: record the (possibly raised) desired
            // priority for release() to re-enqueue with.
            let requested = if low_priority {
                Priority::Low
            } else {
                Priority::High
            };
            let current = state.desired.get(repo).copied();
            let next = match (current, requested) {
                (Some(Priority::High), _) => Priority::High,
                (_, Priority::High) => Priority::High,
                _ => Priority::Low,
            };
            state.desired.insert(repo.to_string(), next);
            return;
        }

        let existing = state.desired.get(repo).copied();
        let fresh = existing.is_none();

        match (existing, low_priority) {
            (Some(Priority::High), _) => {
                // Already high and ready: sticky, nothing to do.
            }
            (_, false) => {
                // Force high: remove from low queue if present, push high.
                if existing == Some(Priority::Low) {
                    state.low_ready.retain(|r| r != repo);
                }
                state.enqueue(repo, Priority::High);
            }
            (Some(Priority::Low), true) => {
                // Already low and ready: nothing to do.
            }
            (None, true) => {
                state.enqueue(repo, Priority::Low);
            }
        }

        if fresh && !state.locked {
            self.ready.notify_one();
        }
    }

    /// Blocks until unlocked and some repo is ready; prefers the
    /// high-priority set. Marks the returned repo pending and clears its
    /// desired priority.
    pub fn take(&self) -> String {
        let mut state = self.state.lock().unwrap();
        loop {
            if !state.locked {
                if let Some(repo) = state.high_ready.pop_front() {
                    state.desired.remove(&repo);
                    state.pending.insert(repo.clone());
                    return repo;
                }
                if let Some(repo) = state.low_ready.pop_front() {
                    state.desired.remove(&repo);
                    state.pending.insert(repo.clone());
                    return repo;
                }
            }
            state = self.ready.wait(state).unwrap();
        }
    }

    /// Releases a repository previously returned by [`Self::take`]. If its
    /// desired priority was raised while it was held, re-enqueues it;
    /// otherwise drops it entirely.
    ///
    /// Panics if `repo` was not pending — a release of an un-taken
    /// repository is a programmer error (§7), and the fetch pipeline must
    /// guarantee `release` is always paired with a successful `take` (an
    /// RAII guard, not a manual call after fallible work).
    pub fn release(&self, repo: &str) {
        let mut state = self.state.lock().unwrap();
        if !state.pending.remove(repo) {
            panic!("release of un-taken repository: {repo}");
        }

        if let Some(priority) = state.desired.remove(repo) {
            state.enqueue(repo, priority);
            if !state.locked {
                self.ready.notify_one();
            }
        }

        if state.pending.is_empty() {
            self.drained.notify_all();
        }
    }

    /// Sets `locked` and blocks until no repository is pending. Used by
    /// bulk operations needing a consistent view of the worker pool.
    pub fn lock(&self) {
        let mut state = self.state.lock().unwrap();
        state.locked = true;
        while !state.pending.is_empty() {
            state = self.drained.wait(state).unwrap();
        }
    }

    /// Clears `locked` and wakes waiting workers if anything is ready.
    pub fn unlock(&self) {
        let mut state = self.state.lock().unwrap();
        state.locked = false;
        if !state.high_ready.is_empty() || !state.low_ready.is_empty() {
            self.ready.notify_all();
        }
    }
}

/// RAII guard ensuring a taken repository is always released, even if the
/// fetch operation panics.
pub struct TakeGuard<'d> {
    dispatcher: &'d RepoDispatcher,
    repo: String,
}

impl<'d> TakeGuard<'d> {
    pub fn take(dispatcher: &'d RepoDispatcher) -> Self {
        let repo = dispatcher.take();
        Self { dispatcher, repo }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl Drop for TakeGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.release(&self.repo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn high_priority_preferred_over_low() {
        let d = RepoDispatcher::new();
        d.add("low-repo", true);
        d.add("high-repo", false);
        assert_eq!(d.take(), "high-repo");
        assert_eq!(d.take(), "low-repo");
    }

    #[test]
    fn high_is_sticky_until_taken() {
        let d = RepoDispatcher::new();
        d.add("r", false);
        d.add("r", true); // must not downgrade
        assert_eq!(d.take(), "r");
    }

    #[test]
    fn release_of_unpending_repo_panics() {
        let d = RepoDispatcher::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            d.release("never-taken");
        }));
        assert!(result.is_err());
    }

    #[test]
    fn upgrade_during_fetch_requeues_high_on_release() {
        let d = RepoDispatcher::new();
        d.add("r", true);
        let repo = d.take();
        assert_eq!(repo, "r");
        // requested again, at high priority, while held
        d.add("r", false);
        d.release("r");
        assert_eq!(d.take(), "r");
    }

    #[test]
    fn lock_blocks_take_and_waits_for_drain() {
        let d = Arc::new(RepoDispatcher::new());
        d.add("r", true);
        let guard = TakeGuard::take(&d);

        let d2 = d.clone();
        let locker = thread::spawn(move || {
            d2.lock();
        });
        thread::sleep(Duration::from_millis(20));
        drop(guard); // releases "r", unblocking lock()
        locker.join().unwrap();
        d.unlock();
    }
}

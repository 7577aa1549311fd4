//! Change broadcaster: a monotonic "something changed" signal with blocking
//! wait, per §4.1.
//!
//! The notification set is a set of one-shot rendezvous slots, not a
//! retained message log — a waiter that registers after a `notify()` simply
//! never sees that notification; it only ever observes notifications that
//! happen after it parks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

/// Opaque token equal to the broadcaster's serial counter at some point in
/// time. Ordering (`>`) is meaningful; the value itself carries no other
/// information.
pub type Token = u64;

struct State {
    serial: Token,
    next_slot_id: u64,
    waiters: HashMap<u64, oneshot::Sender<Token>>,
}

/// Publishes "something changed" and lets callers block until the signal
/// advances past a value they previously observed.
pub struct ChangeBroadcaster {
    state: Mutex<State>,
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                serial: 0,
                next_slot_id: 0,
                waiters: HashMap::new(),
            }),
        }
    }

    /// Returns the current serial without registering a waiter.
    pub fn current(&self) -> Token {
        self.state.lock().unwrap().serial
    }

    /// Atomically increments the serial and wakes every currently-registered
    /// waiter with the new token. Delivery is non-blocking and best-effort:
    /// a slot whose receiver has already been dropped is simply discarded.
    pub fn notify(&self) -> Token {
        let mut state = self.state.lock().unwrap();
        state.serial += 1;
        let serial = state.serial;
        for (_, sender) in state.waiters.drain() {
            let _ = sender.send(serial);
        }
        serial
    }

    /// Blocks until the serial exceeds `token`. Returns immediately if
    /// already ahead.
    pub async fn wait(&self, token: Token) -> Token {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            if state.serial > token {
                return state.serial;
            }
            let (tx, rx) = oneshot::channel();
            let id = state.next_slot_id;
            state.next_slot_id += 1;
            state.waiters.insert(id, tx);
            rx
        };
        receiver.await.unwrap_or(token)
    }

    /// As [`Self::wait`], but bounded by `duration`. Returns `(token, true)`
    /// if signalled in time, `(0, false)` on elapse. `duration <= 0` never
    /// registers a waiter: it returns immediately, succeeding only if the
    /// serial is already ahead.
    pub async fn wait_timeout(&self, token: Token, duration: Duration) -> (Token, bool) {
        if duration.is_zero() {
            let now = self.current();
            return if now > token { (now, true) } else { (0, false) };
        }

        let receiver = {
            let mut state = self.state.lock().unwrap();
            if state.serial > token {
                return (state.serial, true);
            }
            let (tx, rx) = oneshot::channel();
            let id = state.next_slot_id;
            state.next_slot_id += 1;
            state.waiters.insert(id, tx);
            rx
        };

        match timeout(duration, receiver).await {
            Ok(Ok(new_token)) => (new_token, true),
            Ok(Err(_)) | Err(_) => (0, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn notify_strictly_increments() {
        let b = ChangeBroadcaster::new();
        assert_eq!(b.current(), 0);
        assert_eq!(b.notify(), 1);
        assert_eq!(b.notify(), 2);
        assert_eq!(b.current(), 2);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_ahead() {
        let b = ChangeBroadcaster::new();
        b.notify();
        let token = b.wait(0).await;
        assert_eq!(token, 1);
    }

    #[tokio::test]
    async fn wait_wakes_on_notify() {
        let b = Arc::new(ChangeBroadcaster::new());
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.wait(0).await })
        };
        tokio::task::yield_now().await;
        b.notify();
        let token = waiter.await.unwrap();
        assert_eq!(token, 1);
    }

    #[tokio::test]
    async fn wait_timeout_elapses_without_notify() {
        let b = ChangeBroadcaster::new();
        let (token, ok) = b.wait_timeout(0, Duration::from_millis(10)).await;
        assert!(!ok);
        assert_eq!(token, 0);
    }

    #[tokio::test]
    async fn wait_timeout_zero_duration_short_circuits() {
        let b = ChangeBroadcaster::new();
        let (_, ok) = b.wait_timeout(0, Duration::ZERO).await;
        assert!(!ok);
        b.notify();
        let (token, ok) = b.wait_timeout(0, Duration::ZERO).await;
        assert!(ok);
        assert_eq!(token, 1);
    }
}

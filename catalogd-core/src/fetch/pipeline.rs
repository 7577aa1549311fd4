//! Coordinator + worker-pool wiring (§4.3, §5). The coordinator task
//! reads the bounded request channel and translates each request into
//! dispatcher operations; `W` worker tasks independently loop on
//! `dispatcher.take()`.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::broadcaster::ChangeBroadcaster;
use crate::dispatcher::RepoDispatcher;
use crate::error::Result;
use crate::registry::RegistryClient;
use crate::storage::Tx;

use super::reconcile::{fetch_repository, garbage_collect};

/// Default bounded request-channel capacity (§4.3).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
/// Default worker-pool size (§4.3: "default `W=5`").
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// An external "refresh" request, as described in §4.3.
#[derive(Debug, Clone)]
pub enum FetchRequest {
    /// Full registry re-scan, issued by the scheduler or at startup.
    FetchAll,
    /// Targeted refresh of a single repository.
    FetchRepository { name: String, low_priority: bool },
    /// Sweep for orphaned images/lists.
    GarbageCollect,
}

/// A handle to a running pipeline: the sending half of its request
/// channel. Cloning it is cheap and shares the same channel.
#[derive(Clone)]
pub struct FetchHandle {
    sender: mpsc::Sender<FetchRequest>,
}

impl FetchHandle {
    /// Enqueues a request, waiting if the channel is currently full
    /// (§5: "bounded... blocking send is acceptable; callers accept
    /// backpressure").
    pub async fn send(&self, request: FetchRequest) {
        if self.sender.send(request).await.is_err() {
            tracing::error!("fetch pipeline coordinator is gone; dropping request");
        }
    }
}

/// Spawns the coordinator and `worker_count` workers, wired to a fresh
/// [`RepoDispatcher`], and returns a handle to submit requests.
pub fn spawn(
    registry: Arc<dyn RegistryClient>,
    pool: PgPool,
    broadcaster: Arc<ChangeBroadcaster>,
    worker_count: usize,
    channel_capacity: usize,
) -> FetchHandle {
    let dispatcher = Arc::new(RepoDispatcher::new());
    let (sender, receiver) = mpsc::channel(channel_capacity);

    tokio::spawn(coordinator_loop(
        receiver,
        registry.clone(),
        pool.clone(),
        dispatcher.clone(),
        broadcaster.clone(),
    ));

    for id in 0..worker_count {
        tokio::spawn(worker_loop(
            id,
            registry.clone(),
            pool.clone(),
            dispatcher.clone(),
            broadcaster.clone(),
        ));
    }

    FetchHandle { sender }
}

async fn dispatcher_lock(dispatcher: &Arc<RepoDispatcher>) {
    let dispatcher = dispatcher.clone();
    let _ = tokio::task::spawn_blocking(move || dispatcher.lock()).await;
}

async fn dispatcher_unlock(dispatcher: &Arc<RepoDispatcher>) {
    let dispatcher = dispatcher.clone();
    let _ = tokio::task::spawn_blocking(move || dispatcher.unlock()).await;
}

async fn coordinator_loop(
    mut receiver: mpsc::Receiver<FetchRequest>,
    registry: Arc<dyn RegistryClient>,
    pool: PgPool,
    dispatcher: Arc<RepoDispatcher>,
    broadcaster: Arc<ChangeBroadcaster>,
) {
    while let Some(request) = receiver.recv().await {
        match request {
            FetchRequest::FetchRepository { name, low_priority } => {
                // add() is a fast, uncontended mutex operation; unlike
                // take()/lock() it never blocks waiting on other workers,
                // so it's safe to call directly from the coordinator task.
                dispatcher.add(&name, low_priority);
            }
            FetchRequest::FetchAll => {
                if let Err(error) = handle_fetch_all(&registry, &pool, &dispatcher, &broadcaster).await {
                    tracing::error!(%error, "fetch-all failed");
                }
            }
            FetchRequest::GarbageCollect => {
                dispatcher_lock(&dispatcher).await;
                let result = garbage_collect(&pool, &broadcaster).await;
                dispatcher_unlock(&dispatcher).await;
                if let Err(error) = result {
                    tracing::error!(%error, "garbage collection failed");
                }
            }
        }
    }
}

async fn handle_fetch_all(
    registry: &Arc<dyn RegistryClient>,
    pool: &PgPool,
    dispatcher: &Arc<RepoDispatcher>,
    broadcaster: &Arc<ChangeBroadcaster>,
) -> Result<()> {
    dispatcher_lock(dispatcher).await;
    let enumerated = enumerate_and_prune(registry, pool, broadcaster).await;
    dispatcher_unlock(dispatcher).await;

    let repositories = enumerated?;
    for repository in repositories {
        dispatcher.add(&repository, true);
    }
    Ok(())
}

async fn enumerate_and_prune(
    registry: &Arc<dyn RegistryClient>,
    pool: &PgPool,
    broadcaster: &Arc<ChangeBroadcaster>,
) -> Result<Vec<String>> {
    let mut repositories = Vec::new();
    let mut last: Option<String> = None;
    loop {
        let page = registry.repositories(last.as_deref()).await?;
        let next_last = page.repositories.last().cloned();
        repositories.extend(page.repositories);
        if page.eof || next_last.is_none() {
            break;
        }
        last = next_last;
    }

    let mut tx = Tx::begin(pool).await?;
    match tx.delete_tags_not_in_repositories(&repositories).await {
        Ok(()) => {
            let wrote = tx.commit().await?;
            if wrote {
                broadcaster.notify();
            }
        }
        Err(error) => {
            tx.rollback().await?;
            return Err(error);
        }
    }

    Ok(repositories)
}

/// Guarantees `dispatcher.release(repo)` runs even if the fetch panics,
/// per §4.2's "worker panics during a fetch must still call release".
struct ReleaseGuard {
    dispatcher: Arc<RepoDispatcher>,
    repository: String,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.dispatcher.release(&self.repository);
    }
}

async fn worker_loop(
    id: usize,
    registry: Arc<dyn RegistryClient>,
    pool: PgPool,
    dispatcher: Arc<RepoDispatcher>,
    broadcaster: Arc<ChangeBroadcaster>,
) {
    loop {
        let take_dispatcher = dispatcher.clone();
        let repository = match tokio::task::spawn_blocking(move || take_dispatcher.take()).await {
            Ok(repository) => repository,
            Err(error) => {
                tracing::error!(worker = id, %error, "dispatcher.take() panicked");
                continue;
            }
        };

        let _guard = ReleaseGuard {
            dispatcher: dispatcher.clone(),
            repository: repository.clone(),
        };

        // Errors are logged and swallowed here: a failed fetch aborts
        // only this repository, never the worker loop (§4.3).
        if let Err(error) = fetch_repository(registry.as_ref(), &pool, &repository, &broadcaster).await {
            tracing::error!(worker = id, repository = %repository, %error, "fetch_repository failed");
        }
    }
}

//! Fetch pipeline: translates external "refresh" intent into database
//! state (§4.3). `pipeline` owns the coordinator/worker wiring;
//! `reconcile` holds the actual registry-to-storage diffing logic.

mod pipeline;
mod reconcile;

pub use pipeline::{spawn, FetchHandle, FetchRequest, DEFAULT_CHANNEL_CAPACITY, DEFAULT_WORKER_COUNT};
pub use reconcile::{fetch_repository, garbage_collect};

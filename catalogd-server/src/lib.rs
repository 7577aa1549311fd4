//! Library surface for `catalogd-server`, existing so that `tests/` can
//! drive the router in-process with `axum-test` (§10.4). `main.rs` is a
//! thin binary wrapper around this crate, matching the teacher's own
//! split of process wiring (`main`) from the things worth testing
//! directly.

pub mod build_id;
pub mod config;
pub mod error;
pub mod handlers;
pub mod scheduler;
pub mod state;

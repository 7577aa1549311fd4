//! Core library for `catalogd`: the repository dispatcher, change
//! broadcaster, query compiler, storage layer, and fetch/reconcile
//! pipeline that together keep a relational index of a remote container
//! registry up to date.
//!
//! This crate is deliberately free of HTTP and CLI concerns — those live in
//! `catalogd-server`, which composes the primitives exported here.

pub mod broadcaster;
pub mod dispatcher;
pub mod error;
pub mod etag;
pub mod fetch;
pub mod model;
pub mod query;
pub mod registry;
pub mod storage;

pub use broadcaster::{ChangeBroadcaster, Token};
pub use dispatcher::RepoDispatcher;
pub use error::{CatalogError, Result};
pub use fetch::{FetchHandle, FetchRequest};
pub use model::{Image, ImageList, Repository, TaggedImage, TaggedImageList};

/// The schema migrator, shared by production startup ([`storage::connect`])
/// and by `#[sqlx::test(migrator = "catalogd_core::MIGRATOR")]` in this
/// crate's and `catalogd-server`'s integration tests, mirroring the
/// teacher's single `crate::MIGRATOR` static.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../migrations");

use thiserror::Error;

/// Error kinds produced by the core library.
///
/// `Storage` and `Http` carry the underlying error via `#[from]` so call sites
/// can use `?` directly against `sqlx` and `reqwest` results; the remaining
/// variants are constructed explicitly where the kind can't be inferred from
/// a source error type alone.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unauthorized")]
    Auth,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("programmer error: {0}")]
    Programmer(String),

    #[error("registry http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

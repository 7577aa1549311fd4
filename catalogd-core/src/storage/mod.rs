//! Storage layer: transactional CRUD over images, lists, and tags, plus
//! query execution (§4.3, §9's write-observer design).

mod pool;
mod query_exec;
mod tx;

pub use pool::connect;
pub use query_exec::do_query;
pub use tx::{RepoTagState, Tx};

use sqlx::PgPool;

use crate::error::Result;

/// Begins a write-observing transaction. See [`Tx`].
pub async fn begin(pool: &PgPool) -> Result<Tx<'static>> {
    Tx::begin(pool).await
}

/// Returns the single modification marker row's timestamp, used to build
/// the HTTP ETag (§4.5, §9).
pub async fn modification_time(pool: &PgPool) -> Result<chrono::DateTime<chrono::Utc>> {
    let row: (chrono::DateTime<chrono::Utc>,) =
        sqlx::query_as("SELECT modification_time FROM modification")
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

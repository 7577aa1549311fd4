//! Write-observing transaction: every mutating call records whether it
//! actually changed a row, and `commit()` advances the Modification
//! Marker iff at least one call did (§9's write-observer design, §3's
//! Modification Marker invariant).

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::Result;
use crate::model::{Image, MetadataMap};

/// A transaction plus its write-observer flag. Every storage mutation
/// goes through one of these methods so the flag and the SQL stay in
/// lockstep; there is exactly one such flag per transaction (§4.3's
/// "write-tracking consolidation").
pub struct Tx<'a> {
    txn: Transaction<'a, Postgres>,
    wrote: bool,
}

/// (tag -> digest) snapshot of a repository's current state, used by the
/// fetch pipeline to decide what needs fetching before it diffs (§4.3
/// step 2, "load the current repository view").
#[derive(Debug, Clone, Default)]
pub struct RepoTagState {
    pub image_tags: std::collections::BTreeMap<String, String>,
    pub list_tags: std::collections::BTreeMap<String, String>,
}

impl Tx<'static> {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        Ok(Self {
            txn: pool.begin().await?,
            wrote: false,
        })
    }
}

fn metadata_to_json(map: &MetadataMap) -> serde_json::Value {
    serde_json::to_value(map).unwrap_or(serde_json::Value::Null)
}

impl<'a> Tx<'a> {
    fn observe(&mut self, rows_affected: u64) {
        if rows_affected > 0 {
            self.wrote = true;
        }
    }

    /// Loads the (tag -> digest) maps currently stored for `repository`.
    pub async fn load_repository(&mut self, repository: &str) -> Result<RepoTagState> {
        let image_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT tag, image FROM image_tag WHERE repository = $1",
        )
        .bind(repository)
        .fetch_all(&mut *self.txn)
        .await?;

        let list_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT tag, list FROM list_tag WHERE repository = $1",
        )
        .bind(repository)
        .fetch_all(&mut *self.txn)
        .await?;

        Ok(RepoTagState {
            image_tags: image_rows.into_iter().collect(),
            list_tags: list_rows.into_iter().collect(),
        })
    }

    /// Whether `digest` is already stored as an image (used to skip a
    /// redundant manifest/config fetch — §4.3 step 3/4).
    pub async fn image_exists(&mut self, digest: &str) -> Result<bool> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM image WHERE digest = $1)")
                .bind(digest)
                .fetch_one(&mut *self.txn)
                .await?;
        Ok(row.0)
    }

    /// Whether `digest` is already stored as a list.
    pub async fn list_exists(&mut self, digest: &str) -> Result<bool> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM list WHERE digest = $1)")
                .bind(digest)
                .fetch_one(&mut *self.txn)
                .await?;
        Ok(row.0)
    }

    /// Stores a newly-observed image. Content-addressed and immutable by
    /// digest (§3), so a pre-existing row is left untouched and does not
    /// count as a write.
    pub async fn store_image(&mut self, image: &Image) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO image (digest, media_type, os, architecture, annotations, labels)
             VALUES ($1, $2, $3, $4, $5::jsonb, $6::jsonb)
             ON CONFLICT (digest) DO NOTHING",
        )
        .bind(&image.digest)
        .bind(&image.media_type)
        .bind(&image.os)
        .bind(&image.architecture)
        .bind(metadata_to_json(&image.annotations))
        .bind(metadata_to_json(&image.labels))
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());
        Ok(())
    }

    /// Stores a newly-observed list and its member `list_entry` rows.
    /// Member images must already be stored (the caller ingests each
    /// member via [`Self::store_image`] first — §4.3 step 4).
    pub async fn store_list(
        &mut self,
        digest: &str,
        media_type: &str,
        annotations: &MetadataMap,
        member_digests: &[String],
    ) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO list (digest, media_type, annotations)
             VALUES ($1, $2, $3::jsonb)
             ON CONFLICT (digest) DO NOTHING",
        )
        .bind(digest)
        .bind(media_type)
        .bind(metadata_to_json(annotations))
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());

        for member in member_digests {
            let result = sqlx::query(
                "INSERT INTO list_entry (list, image) VALUES ($1, $2)
                 ON CONFLICT (list, image) DO NOTHING",
            )
            .bind(digest)
            .bind(member)
            .execute(&mut *self.txn)
            .await?;
            self.observe(result.rows_affected());
        }
        Ok(())
    }

    /// Upserts `(repository, tag) -> digest` for an image tag. A no-op
    /// write (tag already pointed at `digest`) does not count as a write,
    /// which is what makes re-running `FetchRepository` with no registry
    /// change idempotent w.r.t. the change broadcaster (§8).
    pub async fn upsert_image_tag(&mut self, repository: &str, tag: &str, digest: &str) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO image_tag (repository, tag, image) VALUES ($1, $2, $3)
             ON CONFLICT (repository, tag) DO UPDATE SET image = EXCLUDED.image
             WHERE image_tag.image IS DISTINCT FROM EXCLUDED.image",
        )
        .bind(repository)
        .bind(tag)
        .bind(digest)
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());
        Ok(())
    }

    /// Upserts `(repository, tag) -> digest` for a list tag.
    pub async fn upsert_list_tag(&mut self, repository: &str, tag: &str, digest: &str) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO list_tag (repository, tag, list) VALUES ($1, $2, $3)
             ON CONFLICT (repository, tag) DO UPDATE SET list = EXCLUDED.list
             WHERE list_tag.list IS DISTINCT FROM EXCLUDED.list",
        )
        .bind(repository)
        .bind(tag)
        .bind(digest)
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());
        Ok(())
    }

    /// Deletes every `image_tag` row for `repository` whose tag is not in
    /// `keep`, i.e. tags no longer observed on this fetch (§4.3 step 3,
    /// last bullet).
    pub async fn delete_image_tags_except(&mut self, repository: &str, keep: &[String]) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM image_tag WHERE repository = $1 AND tag <> ALL($2)",
        )
        .bind(repository)
        .bind(keep)
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());
        Ok(())
    }

    /// As [`Self::delete_image_tags_except`], for lists.
    pub async fn delete_list_tags_except(&mut self, repository: &str, keep: &[String]) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM list_tag WHERE repository = $1 AND tag <> ALL($2)",
        )
        .bind(repository)
        .bind(keep)
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());
        Ok(())
    }

    /// `FetchAll`'s housekeeping step: deletes tag rows for repositories
    /// that no longer exist in the registry's catalog listing (§4.3).
    pub async fn delete_tags_not_in_repositories(&mut self, repositories: &[String]) -> Result<()> {
        let image_result = sqlx::query("DELETE FROM image_tag WHERE repository <> ALL($1)")
            .bind(repositories)
            .execute(&mut *self.txn)
            .await?;
        self.observe(image_result.rows_affected());

        let list_result = sqlx::query("DELETE FROM list_tag WHERE repository <> ALL($1)")
            .bind(repositories)
            .execute(&mut *self.txn)
            .await?;
        self.observe(list_result.rows_affected());
        Ok(())
    }

    /// Deletes `list` rows with no surviving `list_tag` reference.
    /// Returns the number of rows removed.
    pub async fn delete_orphan_lists(&mut self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM list WHERE digest NOT IN (SELECT list FROM list_tag)",
        )
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Deletes `image` rows with no surviving `image_tag` or `list_entry`
    /// reference. Must run after [`Self::delete_orphan_lists`] within the
    /// same transaction so images only reachable via a just-deleted list
    /// are also collected (§3's GC invariant).
    pub async fn delete_orphan_images(&mut self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM image WHERE digest NOT IN (SELECT image FROM image_tag)
             AND digest NOT IN (SELECT image FROM list_entry)",
        )
        .execute(&mut *self.txn)
        .await?;
        self.observe(result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Commits. If any call observed a write, advances the Modification
    /// Marker first, within the same transaction, so the marker and the
    /// data it validates commit atomically. Returns whether a write was
    /// observed.
    pub async fn commit(mut self) -> Result<bool> {
        if self.wrote {
            sqlx::query("UPDATE modification SET modification_time = now()")
                .execute(&mut *self.txn)
                .await?;
        }
        self.txn.commit().await?;
        Ok(self.wrote)
    }

    /// Rolls back. Called on any mid-transaction error (§4.3, §7).
    pub async fn rollback(self) -> Result<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

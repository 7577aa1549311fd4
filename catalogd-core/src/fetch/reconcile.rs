//! The actual registry-to-storage diff (§4.3 `fetch_repository`) and
//! garbage collection.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::PgPool;

use crate::broadcaster::ChangeBroadcaster;
use crate::error::{CatalogError, Result};
use crate::model::{Image, MetadataMap};
use crate::registry::{classify, Kind, Manifest, RegistryClient};
use crate::storage::Tx;

/// Runs one full reconciliation of `repository` against the registry:
/// lists tags, classifies each by media type, fetches anything not
/// already stored, and brings the repository's tag rows in line with
/// what was observed. Commits and signals `broadcaster` iff a write was
/// observed; rolls back on any error (§4.3 steps 1–6).
pub async fn fetch_repository(
    registry: &dyn RegistryClient,
    pool: &PgPool,
    repository: &str,
    broadcaster: &ChangeBroadcaster,
) -> Result<()> {
    let tags = registry.tags(repository).await?;

    let mut tag_image: BTreeMap<String, String> = BTreeMap::new();
    let mut tag_list: BTreeMap<String, String> = BTreeMap::new();
    for tag in &tags {
        let descriptor = registry.tag_descriptor(repository, tag).await?;
        match classify(&descriptor.media_type) {
            Some(Kind::Image) => {
                tag_image.insert(tag.clone(), descriptor.digest);
            }
            Some(Kind::List) => {
                tag_list.insert(tag.clone(), descriptor.digest);
            }
            None => {
                tracing::debug!(
                    repository,
                    tag,
                    media_type = %descriptor.media_type,
                    "skipping tag with unrecognized media type"
                );
            }
        }
    }

    let mut tx = Tx::begin(pool).await?;
    let outcome = reconcile_repository(registry, &mut tx, repository, &tag_image, &tag_list).await;
    match outcome {
        Ok(()) => {
            let wrote = tx.commit().await?;
            if wrote {
                broadcaster.notify();
            }
            Ok(())
        }
        Err(error) => {
            tx.rollback().await?;
            Err(error)
        }
    }
}

async fn reconcile_repository(
    registry: &dyn RegistryClient,
    tx: &mut Tx<'static>,
    repository: &str,
    tag_image: &BTreeMap<String, String>,
    tag_list: &BTreeMap<String, String>,
) -> Result<()> {
    let distinct_images: BTreeSet<&String> = tag_image.values().collect();
    for digest in distinct_images {
        if !tx.image_exists(digest).await? {
            let image = ingest_image(registry, repository, digest).await?;
            tx.store_image(&image).await?;
        }
    }
    for (tag, digest) in tag_image {
        tx.upsert_image_tag(repository, tag, digest).await?;
    }
    let keep_image_tags: Vec<String> = tag_image.keys().cloned().collect();
    tx.delete_image_tags_except(repository, &keep_image_tags).await?;

    let distinct_lists: BTreeSet<&String> = tag_list.values().collect();
    for digest in distinct_lists {
        if !tx.list_exists(digest).await? {
            let (media_type, annotations, members) =
                ingest_list(registry, tx, repository, digest).await?;
            tx.store_list(digest, &media_type, &annotations, &members)
                .await?;
        }
    }
    for (tag, digest) in tag_list {
        tx.upsert_list_tag(repository, tag, digest).await?;
    }
    let keep_list_tags: Vec<String> = tag_list.keys().cloned().collect();
    tx.delete_list_tags_except(repository, &keep_list_tags).await?;

    Ok(())
}

/// Fetches a single image's manifest and config blob and normalizes it
/// into the stored [`Image`] shape (§4.3 step 3, §3's annotations/labels
/// invariant: the two stay in separate fields end to end).
async fn ingest_image(registry: &dyn RegistryClient, repository: &str, digest: &str) -> Result<Image> {
    let manifest = registry.manifest(repository, digest).await?;
    let image_manifest = match manifest {
        Manifest::Image(manifest) => manifest,
        Manifest::List(_) => {
            return Err(CatalogError::Registry(format!(
                "{digest}: expected an image manifest, got a list"
            )));
        }
    };

    let config_bytes = registry.blob(repository, &image_manifest.config.digest).await?;
    let config: crate::registry::ConfigBlob = serde_json::from_slice(&config_bytes)
        .map_err(|error| CatalogError::Registry(format!("{digest}: config blob: {error}")))?;

    Ok(Image {
        digest: digest.to_string(),
        media_type: image_manifest.media_type,
        os: config.os,
        architecture: config.architecture,
        annotations: image_manifest.annotations,
        labels: config.config.labels,
    })
}

/// Fetches a list manifest and ingests every member image not already
/// stored (§4.3 step 4: no re-fetch when the member digest already
/// exists). Returns the list's media type, annotations, and member
/// digests for [`Tx::store_list`].
async fn ingest_list(
    registry: &dyn RegistryClient,
    tx: &mut Tx<'static>,
    repository: &str,
    digest: &str,
) -> Result<(String, MetadataMap, Vec<String>)> {
    let manifest = registry.manifest(repository, digest).await?;
    let list_manifest = match manifest {
        Manifest::List(manifest) => manifest,
        Manifest::Image(_) => {
            return Err(CatalogError::Registry(format!(
                "{digest}: expected a list manifest, got an image"
            )));
        }
    };

    let mut members = Vec::with_capacity(list_manifest.manifests.len());
    for member in &list_manifest.manifests {
        if classify(&member.media_type) != Some(Kind::Image) {
            // Nested lists aren't part of the data model (§3); skip
            // anything that isn't a plain image member.
            continue;
        }
        if !tx.image_exists(&member.digest).await? {
            let image = ingest_image(registry, repository, &member.digest).await?;
            tx.store_image(&image).await?;
        }
        members.push(member.digest.clone());
    }

    Ok((list_manifest.media_type, list_manifest.annotations, members))
}

/// Deletes orphaned lists, then orphaned images (order matters: a list's
/// `list_entry` rows cascade-delete with it, which is what can make its
/// members newly orphaned — §3's GC invariant, §8 scenario 6).
pub async fn garbage_collect(pool: &PgPool, broadcaster: &ChangeBroadcaster) -> Result<()> {
    let mut tx = Tx::begin(pool).await?;
    let outcome: Result<()> = async {
        tx.delete_orphan_lists().await?;
        tx.delete_orphan_images().await?;
        Ok(())
    }
    .await;

    match outcome {
        Ok(()) => {
            let wrote = tx.commit().await?;
            if wrote {
                broadcaster.notify();
            }
            Ok(())
        }
        Err(error) => {
            tx.rollback().await?;
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;
    use crate::query::QueryBuilder;
    use crate::registry::FakeRegistryClient;
    use crate::storage::do_query;

    fn one_annotation(key: &str, value: &str) -> MetadataMap {
        BTreeMap::from([(key.to_string(), value.to_string())])
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn fetch_repository_stores_tagged_image_with_sorted_tags(pool: PgPool) {
        let registry = FakeRegistryClient::new();
        registry.put_image(
            "sha256:aa",
            "sha256:aa-config",
            "linux",
            "amd64",
            MetadataMap::new(),
            MetadataMap::new(),
        );
        registry.tag_image("r/x", "v1", "sha256:aa");
        registry.tag_image("r/x", "latest", "sha256:aa");

        let broadcaster = ChangeBroadcaster::new();
        fetch_repository(&registry, &pool, "r/x", &broadcaster)
            .await
            .unwrap();
        assert_eq!(broadcaster.current(), 1);

        let results = do_query(&pool, &QueryBuilder::new().repository("r/x").build())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].images.len(), 1);
        assert_eq!(results[0].images[0].tags, vec!["latest", "v1"]);
        assert_eq!(results[0].images[0].image.os.as_deref(), Some("linux"));
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn fetch_repository_without_registry_change_is_idempotent(pool: PgPool) {
        let registry = FakeRegistryClient::new();
        registry.put_image(
            "sha256:aa",
            "sha256:aa-config",
            "linux",
            "amd64",
            MetadataMap::new(),
            MetadataMap::new(),
        );
        registry.tag_image("r/x", "latest", "sha256:aa");

        let broadcaster = ChangeBroadcaster::new();
        fetch_repository(&registry, &pool, "r/x", &broadcaster)
            .await
            .unwrap();
        assert_eq!(broadcaster.current(), 1);

        // No registry change: the second pass should observe no diff and
        // not signal the broadcaster again.
        fetch_repository(&registry, &pool, "r/x", &broadcaster)
            .await
            .unwrap();
        assert_eq!(broadcaster.current(), 1);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn removing_a_tag_then_gc_removes_the_orphaned_image(pool: PgPool) {
        let registry = FakeRegistryClient::new();
        registry.put_image(
            "sha256:aa",
            "sha256:aa-config",
            "linux",
            "amd64",
            MetadataMap::new(),
            MetadataMap::new(),
        );
        registry.tag_image("r/x", "latest", "sha256:aa");

        let broadcaster = ChangeBroadcaster::new();
        fetch_repository(&registry, &pool, "r/x", &broadcaster)
            .await
            .unwrap();

        registry.untag("r/x", "latest");
        fetch_repository(&registry, &pool, "r/x", &broadcaster)
            .await
            .unwrap();

        let mut tx = Tx::begin(&pool).await.unwrap();
        assert!(tx.image_exists("sha256:aa").await.unwrap());
        drop(tx);

        garbage_collect(&pool, &broadcaster).await.unwrap();

        let mut tx = Tx::begin(&pool).await.unwrap();
        assert!(!tx.image_exists("sha256:aa").await.unwrap());
        drop(tx);

        // A second GC is a no-op: nothing left to collect, no signal.
        let before = broadcaster.current();
        garbage_collect(&pool, &broadcaster).await.unwrap();
        assert_eq!(broadcaster.current(), before);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn multi_arch_list_ingests_member_images(pool: PgPool) {
        let registry = FakeRegistryClient::new();
        registry.put_image(
            "sha256:amd64img",
            "sha256:amd64img-config",
            "linux",
            "amd64",
            one_annotation("org.opencontainers.image.title", "demo"),
            MetadataMap::new(),
        );
        registry.put_image(
            "sha256:arm64img",
            "sha256:arm64img-config",
            "linux",
            "arm64",
            MetadataMap::new(),
            MetadataMap::new(),
        );
        registry.put_list(
            "sha256:list",
            MetadataMap::new(),
            &["sha256:amd64img", "sha256:arm64img"],
        );
        registry.tag_list("r/multi", "latest", "sha256:list");

        let broadcaster = ChangeBroadcaster::new();
        fetch_repository(&registry, &pool, "r/multi", &broadcaster)
            .await
            .unwrap();

        let results = do_query(&pool, &QueryBuilder::new().repository("r/multi").build())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].lists.len(), 1);
        assert_eq!(results[0].lists[0].tags, vec!["latest"]);
        assert_eq!(results[0].lists[0].list.images.len(), 2);

        let matches = do_query(
            &pool,
            &QueryBuilder::new()
                .annotation_matches("org.opencontainers.image.title", "de*")
                .build(),
        )
        .await
        .unwrap();
        assert_eq!(matches.len(), 1);
    }
}

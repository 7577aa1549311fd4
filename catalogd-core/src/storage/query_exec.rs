//! Executes a compiled [`Query`] against the `image`/`list` tables and
//! merges the two result sets into [`Repository`] views (§4.4's last
//! paragraph, §9's merge-ordering resolution).

use std::collections::BTreeMap;

use regex::Regex;
use sqlx::{FromRow, PgPool};

use crate::error::Result;
use crate::model::{Image, MetadataMap, Repository, TaggedImage, TaggedImageList};
use crate::query::{compile, CompiledArg, Query, Target};

fn to_metadata(value: serde_json::Value) -> MetadataMap {
    serde_json::from_value(value).unwrap_or_default()
}

/// Rewrites each JSON-typed placeholder (`$n`) in `where_clause` to
/// `$n::jsonb`, so the compiler's column-type-agnostic output binds
/// correctly against this crate's `jsonb` columns (the compiler itself
/// stays Postgres-dialect-light per §1's scoping).
fn inject_jsonb_casts(where_clause: &str, args: &[CompiledArg]) -> String {
    let mut out = where_clause.to_string();
    for (index, arg) in args.iter().enumerate().rev() {
        if matches!(arg, CompiledArg::Json(_)) {
            let placeholder = index + 1;
            let pattern = Regex::new(&format!(r"\${placeholder}\b")).unwrap();
            out = pattern
                .replace_all(&out, format!("${placeholder}::jsonb"))
                .into_owned();
        }
    }
    out
}

fn bind_args<'q, O>(
    mut query: sqlx::query_as::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    args: &'q [CompiledArg],
) -> sqlx::query_as::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    for arg in args {
        query = match arg {
            CompiledArg::Text(value) => query.bind(value),
            CompiledArg::Json(value) => query.bind(value),
        };
    }
    query
}

#[derive(FromRow)]
struct ImageRow {
    repository: String,
    digest: String,
    media_type: String,
    os: Option<String>,
    architecture: Option<String>,
    annotations: serde_json::Value,
    labels: serde_json::Value,
    tags: Vec<String>,
}

impl ImageRow {
    fn into_tagged(self) -> (String, TaggedImage) {
        (
            self.repository,
            TaggedImage {
                image: Image {
                    digest: self.digest,
                    media_type: self.media_type,
                    os: self.os,
                    architecture: self.architecture,
                    annotations: to_metadata(self.annotations),
                    labels: to_metadata(self.labels),
                },
                tags: self.tags,
            },
        )
    }
}

#[derive(FromRow)]
struct ListRow {
    repository: String,
    digest: String,
    media_type: String,
    annotations: serde_json::Value,
    tags: Vec<String>,
}

#[derive(FromRow)]
struct MemberRow {
    list_digest: String,
    digest: String,
    media_type: String,
    os: Option<String>,
    architecture: Option<String>,
    annotations: serde_json::Value,
    labels: serde_json::Value,
}

async fn fetch_images(pool: &PgPool, query: &Query) -> Result<Vec<(String, TaggedImage)>> {
    let compiled = compile(query, Target::Image)?;
    let where_sql = if compiled.where_clause.is_empty() {
        String::new()
    } else {
        format!(
            "WHERE {}",
            inject_jsonb_casts(&compiled.where_clause, &compiled.args)
        )
    };
    let sql = format!(
        "SELECT image_tag.repository AS repository, image.digest AS digest, \
         image.media_type AS media_type, image.os AS os, image.architecture AS architecture, \
         image.annotations AS annotations, image.labels AS labels, \
         array_agg(image_tag.tag) AS tags \
         FROM image_tag JOIN image ON image.digest = image_tag.image \
         {where_sql} \
         GROUP BY image_tag.repository, image.digest, image.media_type, image.os, \
         image.architecture, image.annotations, image.labels \
         ORDER BY image_tag.repository"
    );

    let query = bind_args(sqlx::query_as::<_, ImageRow>(&sql), &compiled.args);
    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().map(ImageRow::into_tagged).collect())
}

async fn fetch_lists(pool: &PgPool, query: &Query) -> Result<Vec<ListRow>> {
    let compiled = compile(query, Target::List)?;
    let where_sql = if compiled.where_clause.is_empty() {
        String::new()
    } else {
        format!(
            "WHERE {}",
            inject_jsonb_casts(&compiled.where_clause, &compiled.args)
        )
    };
    let sql = format!(
        "SELECT list_tag.repository AS repository, list.digest AS digest, \
         list.media_type AS media_type, list.annotations AS annotations, \
         array_agg(list_tag.tag) AS tags \
         FROM list_tag JOIN list ON list.digest = list_tag.list \
         {where_sql} \
         GROUP BY list_tag.repository, list.digest, list.media_type, list.annotations \
         ORDER BY list_tag.repository"
    );

    let query = bind_args(sqlx::query_as::<_, ListRow>(&sql), &compiled.args);
    Ok(query.fetch_all(pool).await?)
}

async fn fetch_list_members(
    pool: &PgPool,
    list_digests: &[String],
) -> Result<BTreeMap<String, Vec<Image>>> {
    if list_digests.is_empty() {
        return Ok(BTreeMap::new());
    }

    let rows: Vec<MemberRow> = sqlx::query_as(
        "SELECT list_entry.list AS list_digest, image.digest AS digest, \
         image.media_type AS media_type, image.os AS os, image.architecture AS architecture, \
         image.annotations AS annotations, image.labels AS labels \
         FROM list_entry JOIN image ON image.digest = list_entry.image \
         WHERE list_entry.list = ANY($1) \
         ORDER BY list_entry.list, image.digest",
    )
    .bind(list_digests)
    .fetch_all(pool)
    .await?;

    let mut members: BTreeMap<String, Vec<Image>> = BTreeMap::new();
    for row in rows {
        members.entry(row.list_digest).or_default().push(Image {
            digest: row.digest,
            media_type: row.media_type,
            os: row.os,
            architecture: row.architecture,
            annotations: to_metadata(row.annotations),
            labels: to_metadata(row.labels),
        });
    }
    Ok(members)
}

/// Groups already-sorted-by-repository rows into contiguous
/// `(repository, items)` runs.
fn group_by_repository<T>(rows: Vec<(String, T)>) -> Vec<(String, Vec<T>)> {
    let mut groups: Vec<(String, Vec<T>)> = Vec::new();
    for (repo, item) in rows {
        match groups.last_mut() {
            Some((name, items)) if *name == repo => items.push(item),
            _ => groups.push((repo, vec![item])),
        }
    }
    groups
}

/// Merge-walks the two repository-sorted group lists into one
/// repository-per-entry result, per §9's resolved merge-ordering note.
fn merge(
    images: Vec<(String, Vec<TaggedImage>)>,
    lists: Vec<(String, Vec<TaggedImageList>)>,
) -> Vec<Repository> {
    let mut out = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < images.len() || j < lists.len() {
        let take_image = match (images.get(i), lists.get(j)) {
            (Some((ri, _)), Some((rj, _))) => ri <= rj,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        if take_image {
            let (name, imgs) = images[i].clone();
            let same_repo_list = lists.get(j).map(|(rj, _)| rj == &name).unwrap_or(false);
            let list_items = if same_repo_list {
                let items = lists[j].1.clone();
                j += 1;
                items
            } else {
                Vec::new()
            };
            out.push(Repository {
                name,
                images: imgs,
                lists: list_items,
            });
            i += 1;
        } else {
            let (name, lsts) = lists[j].clone();
            out.push(Repository {
                name,
                images: Vec::new(),
                lists: lsts,
            });
            j += 1;
        }
    }
    out
}

/// Executes `query` and returns the matching repositories, each carrying
/// its tagged images and lists with sorted tag arrays (§4.4, §8).
pub async fn do_query(pool: &PgPool, query: &Query) -> Result<Vec<Repository>> {
    let image_rows = fetch_images(pool, query).await?;
    let list_rows = fetch_lists(pool, query).await?;

    let list_digests: Vec<String> = list_rows.iter().map(|r| r.digest.clone()).collect();
    let mut members = fetch_list_members(pool, &list_digests).await?;

    let lists: Vec<(String, TaggedImageList)> = list_rows
        .into_iter()
        .map(|row| {
            let images = members.remove(&row.digest).unwrap_or_default();
            (
                row.repository,
                TaggedImageList {
                    list: crate::model::ImageList {
                        digest: row.digest,
                        media_type: row.media_type,
                        annotations: to_metadata(row.annotations),
                        images,
                    },
                    tags: row.tags,
                },
            )
        })
        .collect();

    let mut repositories = merge(group_by_repository(image_rows), group_by_repository(lists));
    for repository in &mut repositories {
        repository.sort_tags();
    }
    Ok(repositories)
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::content;
use crate::db::{self, ArticleRow, QueuedBatch, TaxonomyKind};
use crate::images::{self, ImageStore};
use crate::source::{RawArticle, SourceClient};

/// Identifier of the article page model on the receiving side. Batch
/// descriptors carry it so a worker knows which importer to run.
pub const ARTICLE_MODEL_ID: i64 = 1;

/// How many batch payloads are fetched concurrently. Imports themselves run
/// on the single DB writer, in remote payload order.
const FETCH_CONCURRENCY: usize = 4;

/// Run-scoped defaults the field mapping needs before any item is processed.
/// Passed explicitly so the pipeline stays testable without ambient state.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub locale: String,
    pub media_type: String,
}

impl Default for ImportContext {
    fn default() -> Self {
        Self {
            locale: "fr".into(),
            media_type: "desktop".into(),
        }
    }
}

/// Number of batches needed to cover `total` items at `limit` per page.
/// This is the correctness-bearing count; the progress display may drift
/// past `total` on the final partial batch.
pub fn batch_count(total: u64, limit: u64) -> u64 {
    total.div_ceil(limit)
}

/// Discover the export size and enqueue one batch descriptor per page.
///
/// Dispatch is fire-and-forget: a failed enqueue is logged and does not block
/// the remaining batches. Returns the number of batches dispatched.
pub async fn start_full_import(conn: &Connection, source: &SourceClient) -> Result<usize> {
    info!("Starting article import");

    let discovery = source.discover().await?;
    if discovery.limit == 0 {
        bail!("Source reported a page size of 0");
    }

    let batches = batch_count(discovery.total, discovery.limit);
    let pb = ProgressBar::new(discovery.total);

    let mut dispatched = 0usize;
    for index in 0..batches {
        match db::enqueue_batch(conn, ARTICLE_MODEL_ID, index as i64) {
            Ok(_) => dispatched += 1,
            Err(e) => warn!("Failed to enqueue batch {}: {:#}", index, e),
        }
        // The final batch advances by a full page even when the page is
        // partial; accepted display drift, the batch count above is exact.
        pb.inc(discovery.limit);
    }
    pb.finish_and_clear();

    info!(
        "Dispatched {} batches covering {} items (page size {})",
        dispatched, discovery.total, discovery.limit
    );
    Ok(dispatched)
}

/// Outcome of draining the batch queue.
pub struct RunStats {
    pub batches: usize,
    pub failed_batches: usize,
    pub ok_items: usize,
    pub failed_items: usize,
}

/// Drain runnable batches: payloads are fetched concurrently and streamed to
/// this task, which imports items in the order the remote returned them.
///
/// A batch whose payload cannot be fetched is marked errored and stays
/// re-runnable; a failing item is reported with its remote id and does not
/// stop the rest of its batch.
pub async fn run_pending(
    conn: &Connection,
    source: Arc<SourceClient>,
    images: &dyn ImageStore,
    ctx: ImportContext,
    limit: Option<usize>,
) -> Result<RunStats> {
    let batches = db::fetch_runnable_batches(conn, limit)?;
    let total = batches.len();
    if total == 0 {
        return Ok(RunStats { batches: 0, failed_batches: 0, ok_items: 0, failed_items: 0 });
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} batches ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(FETCH_CONCURRENCY));
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(QueuedBatch, Result<crate::source::BatchPayload>)>(
            FETCH_CONCURRENCY * 2,
        );

    for batch in batches {
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let result = source.fetch_batch(batch.batch_index).await;
            let _ = tx.send((batch, result)).await;
        });
    }

    // Drop our copy of tx so rx closes when all fetch tasks finish.
    drop(tx);

    let mut importer = Importer::new(conn, ctx, images);
    let mut stats = RunStats { batches: total, failed_batches: 0, ok_items: 0, failed_items: 0 };

    while let Some((batch, result)) = rx.recv().await {
        match result {
            Ok(payload) => {
                for raw in &payload.data {
                    match importer.import_single(raw) {
                        Ok(_) => stats.ok_items += 1,
                        Err(e) => {
                            warn!("Import failed for article {}: {:#}", raw.id, e);
                            stats.failed_items += 1;
                        }
                    }
                }
                db::mark_batch_done(conn, batch.id)?;
            }
            Err(e) => {
                warn!(
                    "Fetch failed for batch {} (model {}): {:#}",
                    batch.batch_index, batch.model_id, e
                );
                db::mark_batch_error(conn, batch.id, &e.to_string())?;
                stats.failed_batches += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Processed {} batches ({} failed), {} items imported, {} items failed",
        stats.batches, stats.failed_batches, stats.ok_items, stats.failed_items
    );
    Ok(stats)
}

/// Fetch and import one article by its remote id. Taxonomy is resolved
/// against the store only, with a fresh run cache.
pub async fn import_one(
    conn: &Connection,
    source: &SourceClient,
    images: &dyn ImageStore,
    ctx: ImportContext,
    post_id: i64,
) -> Result<i64> {
    let raw = source.fetch_single(post_id).await?;
    Importer::new(conn, ctx, images).import_single(&raw)
}

/// Imports raw articles one at a time, memoizing taxonomy lookups for the
/// lifetime of one run so a name referenced by many items is created once.
pub struct Importer<'a> {
    conn: &'a Connection,
    ctx: ImportContext,
    images: &'a dyn ImageStore,
    categories: HashMap<String, i64>,
    tags: HashMap<String, i64>,
}

impl<'a> Importer<'a> {
    pub fn new(conn: &'a Connection, ctx: ImportContext, images: &'a dyn ImageStore) -> Self {
        Self {
            conn,
            ctx,
            images,
            categories: HashMap::new(),
            tags: HashMap::new(),
        }
    }

    /// Normalize one raw article and upsert it by remote id.
    ///
    /// Markup trouble degrades to best-effort output inside the content
    /// pipeline; store errors propagate as the item's failure.
    pub fn import_single(&mut self, raw: &RawArticle) -> Result<i64> {
        let normalized = content::normalize(&raw.content);

        // Re-host remote images and point the content at the local copies.
        let report = self.images.import_images_from(
            &normalized.html,
            None,
            &format!("articles/{}", raw.id),
        )?;
        let html = images::apply_rehosted(&normalized.html, &report);

        let thumbnail = self.resolve_thumbnail(raw)?;

        let author_id = match raw.author_id {
            Some(remote) => {
                let found = db::find_author_by_remote_id(self.conn, remote)?;
                if found.is_none() {
                    // Non-fatal: the article imports without an author.
                    warn!("Author {} not found for article {}", remote, raw.id);
                }
                found
            }
            None => None,
        };

        let mut category_ids = Vec::with_capacity(raw.categories.len());
        for name in &raw.categories {
            category_ids.push(self.taxonomy_id(TaxonomyKind::Category, name)?);
        }
        let mut tag_ids = Vec::with_capacity(raw.tags.len());
        for name in &raw.tags {
            tag_ids.push(self.taxonomy_id(TaxonomyKind::Tag, name)?);
        }

        let row = ArticleRow {
            remote_id: raw.id,
            slug: slug_for(raw),
            title: some_nonempty(&raw.title),
            movie_title: raw.movie_title.clone().filter(|s| !s.is_empty()),
            content: html,
            seo_title: raw.seo_title.clone().filter(|s| !s.is_empty()),
            seo_description: raw.seo_description.clone().filter(|s| !s.is_empty()),
            thumbnail,
            author_id,
            view_count: raw.view_count(),
            locale: self.ctx.locale.clone(),
            media_type: self.ctx.media_type.clone(),
            remote_created_at: normalize_timestamp(raw.created_at.as_deref()),
            remote_modified_at: normalize_timestamp(raw.modified_at.as_deref()),
        };

        let article_id = db::upsert_article(self.conn, &row)?;
        db::replace_article_embeds(self.conn, article_id, &normalized.embeds)?;
        db::set_article_taxonomy(self.conn, article_id, &category_ids, &tag_ids)?;

        info!("Imported article {} as {}", raw.id, row.slug);
        Ok(article_id)
    }

    /// Run cache → store lookup → create. At most one create per distinct
    /// name per kind within one run.
    fn taxonomy_id(&mut self, kind: TaxonomyKind, name: &str) -> Result<i64> {
        let cache = match kind {
            TaxonomyKind::Category => &mut self.categories,
            TaxonomyKind::Tag => &mut self.tags,
        };
        if let Some(&id) = cache.get(name) {
            return Ok(id);
        }

        let id = match db::find_taxonomy_by_name(self.conn, kind, name)? {
            Some(id) => id,
            None => db::create_taxonomy(self.conn, kind, name)?,
        };

        let cache = match kind {
            TaxonomyKind::Category => &mut self.categories,
            TaxonomyKind::Tag => &mut self.tags,
        };
        cache.insert(name.to_string(), id);
        Ok(id)
    }

    /// Thumbnails arrive either as site-relative paths or as absolute URLs
    /// that still point at the legacy host; the latter get re-hosted. Slashes
    /// are trimmed first so the rehoster scans the same form that gets stored.
    fn resolve_thumbnail(&self, raw: &RawArticle) -> Result<Option<String>> {
        let trimmed = raw.thumbnail.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(None);
        }

        if trimmed.starts_with("http") {
            let report = self.images.import_images_from(trimmed, None, &raw.id.to_string())?;
            if let Some(last) = report.success.last() {
                return Ok(Some(format!("/{}", last.relative_path)));
            }
        }

        Ok(Some(trimmed.to_string()))
    }
}

fn some_nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Stable slug keyed by the remote id; the title part is cosmetic.
fn slug_for(raw: &RawArticle) -> String {
    let base = slugify(&raw.title);
    if base.is_empty() {
        format!("article-{}", raw.id)
    } else {
        format!("{}-{}", base, raw.id)
    }
}

fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut prev_dash = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Source timestamps are `YYYY-MM-DD HH:MM:SS`; a few exports emit RFC 3339.
/// Unparseable values pass through untouched rather than getting dropped.
fn normalize_timestamp(value: Option<&str>) -> Option<String> {
    let v = value?.trim();
    if v.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(v) {
        return Some(dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string());
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::{DisabledImageStore, ImageReport, ImportedImage, RehostedImage};

    fn raw(id: i64) -> RawArticle {
        serde_json::from_value(serde_json::json!({
            "ID": id,
            "articleTitle": "Une critique",
            "articleContent": "<p>corps &nbsp;</p>",
            "categories": ["Critiques"],
            "tags": ["Drame"],
            "thumbnail": "/uploads/img.jpg",
            "metas": {"views": ["12"]}
        }))
        .unwrap()
    }

    #[test]
    fn batch_count_covers_partial_final_page() {
        assert_eq!(batch_count(95, 20), 5);
        assert_eq!(batch_count(100, 20), 5);
        assert_eq!(batch_count(1, 20), 1);
        assert_eq!(batch_count(0, 20), 0);
    }

    #[test]
    fn importing_twice_updates_in_place() {
        let conn = db::open_in_memory();
        let store = DisabledImageStore;
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        let first = importer.import_single(&raw(10)).unwrap();
        let second = importer.import_single(&raw(10)).unwrap();

        assert_eq!(first, second);
        let count: usize =
            conn.query_row("SELECT COUNT(*) FROM articles", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn taxonomy_created_once_per_run() {
        let conn = db::open_in_memory();
        let store = DisabledImageStore;
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        for id in 1..=10 {
            importer.import_single(&raw(id)).unwrap();
        }

        let categories: usize =
            conn.query_row("SELECT COUNT(*) FROM categories", [], |r| r.get(0)).unwrap();
        let tags: usize = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0)).unwrap();
        assert_eq!(categories, 1);
        assert_eq!(tags, 1);
    }

    #[test]
    fn missing_author_is_not_fatal() {
        let conn = db::open_in_memory();
        let store = DisabledImageStore;
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        let mut article = raw(5);
        article.author_id = Some(999);
        importer.import_single(&article).unwrap();

        let author: Option<i64> = conn
            .query_row("SELECT author_id FROM articles WHERE remote_id = 5", [], |r| r.get(0))
            .unwrap();
        assert_eq!(author, None);
    }

    #[test]
    fn known_author_is_linked() {
        let conn = db::open_in_memory();
        let author_id = db::insert_author(&conn, 12, "Jeanne Martin").unwrap();
        let store = DisabledImageStore;
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        let mut article = raw(6);
        article.author_id = Some(12);
        importer.import_single(&article).unwrap();

        let linked: Option<i64> = conn
            .query_row("SELECT author_id FROM articles WHERE remote_id = 6", [], |r| r.get(0))
            .unwrap();
        assert_eq!(linked, Some(author_id));
    }

    /// Store that claims every URL it is given, mapping it under `media/`.
    struct EchoStore;

    impl ImageStore for EchoStore {
        fn import_images_from(
            &self,
            content: &str,
            _base_path: Option<&str>,
            subfolder: &str,
        ) -> anyhow::Result<ImageReport> {
            let mut success = Vec::new();
            if content.starts_with("http") {
                success.push(RehostedImage {
                    base_match: content.to_string(),
                    relative_path: format!("media/{subfolder}/thumb.jpg"),
                });
            }
            Ok(ImageReport { success })
        }

        fn import_image(
            &self,
            url: &str,
            folder: &str,
            _base_path: Option<&str>,
            filename: &str,
        ) -> anyhow::Result<ImportedImage> {
            Ok(ImportedImage {
                status: "ok".into(),
                relative_path: format!("media/{folder}/{filename}"),
            })
        }
    }

    #[test]
    fn remote_thumbnail_is_rehosted() {
        let conn = db::open_in_memory();
        let store = EchoStore;
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        let mut article = raw(7);
        article.thumbnail = "https://cdn.example.com/img.jpg".into();
        importer.import_single(&article).unwrap();

        let thumb: String = conn
            .query_row("SELECT thumbnail FROM articles WHERE remote_id = 7", [], |r| r.get(0))
            .unwrap();
        assert_eq!(thumb, "/media/7/thumb.jpg");
    }

    /// Store that records every content string it is asked to scan.
    struct RecordingStore(std::cell::RefCell<Vec<String>>);

    impl ImageStore for RecordingStore {
        fn import_images_from(
            &self,
            content: &str,
            _base_path: Option<&str>,
            _subfolder: &str,
        ) -> anyhow::Result<ImageReport> {
            self.0.borrow_mut().push(content.to_string());
            Ok(ImageReport::default())
        }

        fn import_image(
            &self,
            url: &str,
            _folder: &str,
            _base_path: Option<&str>,
            _filename: &str,
        ) -> anyhow::Result<ImportedImage> {
            Ok(ImportedImage { status: "ok".into(), relative_path: url.to_string() })
        }
    }

    #[test]
    fn thumbnail_is_trimmed_before_rehosting() {
        let conn = db::open_in_memory();
        let store = RecordingStore(std::cell::RefCell::new(Vec::new()));
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        let mut article = raw(11);
        article.thumbnail = "https://cdn.example.com/img.jpg/".into();
        importer.import_single(&article).unwrap();

        let calls = store.0.borrow();
        assert!(calls.iter().any(|c| c == "https://cdn.example.com/img.jpg"));
        assert!(!calls.iter().any(|c| c.ends_with('/')));

        let thumb: String = conn
            .query_row("SELECT thumbnail FROM articles WHERE remote_id = 11", [], |r| r.get(0))
            .unwrap();
        assert_eq!(thumb, "https://cdn.example.com/img.jpg");
    }

    #[test]
    fn relative_thumbnail_keeps_trimmed_path() {
        let conn = db::open_in_memory();
        let store = DisabledImageStore;
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        importer.import_single(&raw(8)).unwrap();

        let thumb: String = conn
            .query_row("SELECT thumbnail FROM articles WHERE remote_id = 8", [], |r| r.get(0))
            .unwrap();
        assert_eq!(thumb, "uploads/img.jpg");
    }

    #[test]
    fn embeds_are_persisted_in_order() {
        let conn = db::open_in_memory();
        let store = DisabledImageStore;
        let mut importer = Importer::new(&conn, ImportContext::default(), &store);

        let mut article = raw(9);
        article.content = r#"
            <iframe src="https://www.youtube.com/embed/a"></iframe>
            <iframe src="https://open.spotify.com/track/b"></iframe>
        "#
        .into();
        importer.import_single(&article).unwrap();

        let services: Vec<String> = conn
            .prepare("SELECT service FROM article_embeds ORDER BY position")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(services, vec!["youtube", "spotify"]);
    }

    #[test]
    fn slugs_are_keyed_by_remote_id() {
        assert_eq!(slug_for(&raw(42)), "une-critique-42");

        let mut untitled = raw(43);
        untitled.title = String::new();
        assert_eq!(slug_for(&untitled), "article-43");
    }

    #[test]
    fn timestamps_normalize_and_pass_through() {
        assert_eq!(
            normalize_timestamp(Some("2021-06-03 14:22:01")).as_deref(),
            Some("2021-06-03 14:22:01")
        );
        assert_eq!(
            normalize_timestamp(Some("2021-06-03T14:22:01+02:00")).as_deref(),
            Some("2021-06-03 12:22:01")
        );
        assert_eq!(normalize_timestamp(Some("unknown")).as_deref(), Some("unknown"));
        assert_eq!(normalize_timestamp(None), None);
        assert_eq!(normalize_timestamp(Some("  ")), None);
    }
}

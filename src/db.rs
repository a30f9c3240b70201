use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use crate::content::EmbeddedMedia;

const DB_PATH: &str = "data/import.sqlite";

pub fn connect() -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(DB_PATH).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS authors (
            id         INTEGER PRIMARY KEY,
            remote_id  INTEGER UNIQUE NOT NULL,
            full_name  TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS articles (
            id                 INTEGER PRIMARY KEY,
            remote_id          INTEGER UNIQUE NOT NULL,
            slug               TEXT NOT NULL,
            title              TEXT,
            movie_title        TEXT,
            content            TEXT,
            seo_title          TEXT,
            seo_description    TEXT,
            thumbnail          TEXT,
            author_id          INTEGER REFERENCES authors(id),
            view_count         INTEGER NOT NULL DEFAULT 0,
            locale             TEXT NOT NULL DEFAULT 'fr',
            media_type         TEXT NOT NULL DEFAULT 'desktop',
            remote_created_at  TEXT,
            remote_modified_at TEXT,
            hidden             BOOLEAN NOT NULL DEFAULT 0,
            imported           BOOLEAN NOT NULL DEFAULT 0,
            imported_at        TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_articles_slug ON articles(slug);

        CREATE TABLE IF NOT EXISTS article_embeds (
            id         INTEGER PRIMARY KEY,
            article_id INTEGER NOT NULL REFERENCES articles(id),
            src        TEXT NOT NULL,
            service    TEXT NOT NULL DEFAULT '',
            position   INTEGER NOT NULL,
            UNIQUE(article_id, position)
        );

        CREATE TABLE IF NOT EXISTS categories (
            id   INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            tmp  BOOLEAN NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS tags (
            id   INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            tmp  BOOLEAN NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS article_categories (
            article_id  INTEGER NOT NULL REFERENCES articles(id),
            category_id INTEGER NOT NULL REFERENCES categories(id),
            UNIQUE(article_id, category_id)
        );

        CREATE TABLE IF NOT EXISTS article_tags (
            article_id INTEGER NOT NULL REFERENCES articles(id),
            tag_id     INTEGER NOT NULL REFERENCES tags(id),
            UNIQUE(article_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS import_queue (
            id          INTEGER PRIMARY KEY,
            model_id    INTEGER NOT NULL,
            batch_index INTEGER NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending'
                        CHECK(status IN ('pending','done','error')),
            error       TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(model_id, batch_index)
        );
        CREATE INDEX IF NOT EXISTS idx_queue_status ON import_queue(status);
        ",
    )?;
    Ok(())
}

// ── Articles ──

pub struct ArticleRow {
    pub remote_id: i64,
    pub slug: String,
    pub title: Option<String>,
    pub movie_title: Option<String>,
    pub content: String,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub thumbnail: Option<String>,
    pub author_id: Option<i64>,
    pub view_count: i64,
    pub locale: String,
    pub media_type: String,
    pub remote_created_at: Option<String>,
    pub remote_modified_at: Option<String>,
}

/// Create or update the article keyed by its remote id, marking it visible
/// and imported. Returns the local row id.
pub fn upsert_article(conn: &Connection, row: &ArticleRow) -> Result<i64> {
    conn.execute(
        "INSERT INTO articles
         (remote_id, slug, title, movie_title, content, seo_title, seo_description,
          thumbnail, author_id, view_count, locale, media_type,
          remote_created_at, remote_modified_at, hidden, imported)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, 1)
         ON CONFLICT(remote_id) DO UPDATE SET
           slug = excluded.slug,
           title = excluded.title,
           movie_title = excluded.movie_title,
           content = excluded.content,
           seo_title = excluded.seo_title,
           seo_description = excluded.seo_description,
           thumbnail = excluded.thumbnail,
           author_id = excluded.author_id,
           view_count = excluded.view_count,
           locale = excluded.locale,
           media_type = excluded.media_type,
           remote_created_at = excluded.remote_created_at,
           remote_modified_at = excluded.remote_modified_at,
           hidden = 0,
           imported = 1",
        rusqlite::params![
            row.remote_id, row.slug, row.title, row.movie_title, row.content,
            row.seo_title, row.seo_description, row.thumbnail, row.author_id,
            row.view_count, row.locale, row.media_type,
            row.remote_created_at, row.remote_modified_at,
        ],
    )?;

    let id = conn.query_row(
        "SELECT id FROM articles WHERE remote_id = ?1",
        [row.remote_id],
        |r| r.get(0),
    )?;
    Ok(id)
}

/// Replace the embed list of an article with the freshly extracted one.
pub fn replace_article_embeds(
    conn: &Connection,
    article_id: i64,
    embeds: &[EmbeddedMedia],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        tx.execute("DELETE FROM article_embeds WHERE article_id = ?1", [article_id])?;
        let mut stmt = tx.prepare(
            "INSERT INTO article_embeds (article_id, src, service, position)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for embed in embeds {
            stmt.execute(rusqlite::params![article_id, embed.src, embed.service, embed.order])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn set_article_taxonomy(
    conn: &Connection,
    article_id: i64,
    category_ids: &[i64],
    tag_ids: &[i64],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        tx.execute("DELETE FROM article_categories WHERE article_id = ?1", [article_id])?;
        tx.execute("DELETE FROM article_tags WHERE article_id = ?1", [article_id])?;

        let mut c_stmt = tx.prepare(
            "INSERT OR IGNORE INTO article_categories (article_id, category_id) VALUES (?1, ?2)",
        )?;
        for id in category_ids {
            c_stmt.execute(rusqlite::params![article_id, id])?;
        }

        let mut t_stmt = tx.prepare(
            "INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES (?1, ?2)",
        )?;
        for id in tag_ids {
            t_stmt.execute(rusqlite::params![article_id, id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Taxonomy ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyKind {
    Category,
    Tag,
}

impl TaxonomyKind {
    fn table(self) -> &'static str {
        match self {
            TaxonomyKind::Category => "categories",
            TaxonomyKind::Tag => "tags",
        }
    }
}

pub fn find_taxonomy_by_name(
    conn: &Connection,
    kind: TaxonomyKind,
    name: &str,
) -> Result<Option<i64>> {
    let sql = format!("SELECT id FROM {} WHERE name = ?1", kind.table());
    let id = conn.query_row(&sql, [name], |r| r.get(0)).optional()?;
    Ok(id)
}

/// Create a non-temporary taxonomy entity and return its id.
pub fn create_taxonomy(conn: &Connection, kind: TaxonomyKind, name: &str) -> Result<i64> {
    let sql = format!("INSERT INTO {} (name, tmp) VALUES (?1, 0)", kind.table());
    conn.execute(&sql, [name])?;
    Ok(conn.last_insert_rowid())
}

// ── Authors ──

pub fn find_author_by_remote_id(conn: &Connection, remote_id: i64) -> Result<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM authors WHERE remote_id = ?1", [remote_id], |r| r.get(0))
        .optional()?;
    Ok(id)
}

pub fn insert_author(conn: &Connection, remote_id: i64, full_name: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO authors (remote_id, full_name) VALUES (?1, ?2)",
        rusqlite::params![remote_id, full_name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM authors WHERE remote_id = ?1",
        [remote_id],
        |r| r.get(0),
    )?;
    Ok(id)
}

// ── Import queue ──

/// One page-sized unit of deferred import work. Pure coordinates, safe to
/// redeliver.
#[derive(Debug, Clone)]
pub struct QueuedBatch {
    pub id: i64,
    pub model_id: i64,
    pub batch_index: i64,
}

/// Enqueue a batch descriptor. Returns false when the same coordinates are
/// already queued.
pub fn enqueue_batch(conn: &Connection, model_id: i64, batch_index: i64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO import_queue (model_id, batch_index) VALUES (?1, ?2)",
        rusqlite::params![model_id, batch_index],
    )?;
    Ok(inserted > 0)
}

/// Pending plus previously-errored batches, oldest first. Errored rows stay
/// re-runnable because the descriptor is pure data.
pub fn fetch_runnable_batches(conn: &Connection, limit: Option<usize>) -> Result<Vec<QueuedBatch>> {
    let sql = format!(
        "SELECT id, model_id, batch_index FROM import_queue
         WHERE status IN ('pending', 'error') ORDER BY id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(QueuedBatch {
                id: row.get(0)?,
                model_id: row.get(1)?,
                batch_index: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_batch_done(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE import_queue SET status = 'done', error = NULL WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

pub fn mark_batch_error(conn: &Connection, id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE import_queue SET status = 'error', error = ?2 WHERE id = ?1",
        rusqlite::params![id, error],
    )?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub articles: usize,
    pub imported: usize,
    pub categories: usize,
    pub tags: usize,
    pub pending_batches: usize,
    pub errored_batches: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let articles: usize = conn.query_row("SELECT COUNT(*) FROM articles", [], |r| r.get(0))?;
    let imported: usize =
        conn.query_row("SELECT COUNT(*) FROM articles WHERE imported = 1", [], |r| r.get(0))?;
    let categories: usize = conn.query_row("SELECT COUNT(*) FROM categories", [], |r| r.get(0))?;
    let tags: usize = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
    let pending_batches: usize = conn.query_row(
        "SELECT COUNT(*) FROM import_queue WHERE status = 'pending'",
        [],
        |r| r.get(0),
    )?;
    let errored_batches: usize = conn.query_row(
        "SELECT COUNT(*) FROM import_queue WHERE status = 'error'",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        articles,
        imported,
        categories,
        tags,
        pending_batches,
        errored_batches,
    })
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

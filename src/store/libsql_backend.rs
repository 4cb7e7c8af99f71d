//! libSQL backend for the article store and author directory.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{
    Article, ArticleRef, ArticleStore, Author, AuthorDirectory, MarkupKind, NewArticle,
};

const ARTICLE_COLUMNS: &str =
    "id, title, body, markup, published_at, author_id, slug, active";
const AUTHOR_COLUMNS: &str = "id, name, email, active";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

/// An attachment as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub caption: String,
    pub data: Vec<u8>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Attachments of an article in the order they were saved.
    pub async fn list_attachments(
        &self,
        article_id: Uuid,
    ) -> Result<Vec<StoredAttachment>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT caption, data FROM attachments WHERE article_id = ?1 ORDER BY rowid",
                params![article_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_attachments: {e}")))?;

        let mut out = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let caption: String = row
                        .get(0)
                        .map_err(|e| StoreError::Query(format!("list_attachments row: {e}")))?;
                    let data: Vec<u8> = row
                        .get(1)
                        .map_err(|e| StoreError::Query(format!("list_attachments row: {e}")))?;
                    out.push(StoredAttachment { caption, data });
                }
                Ok(None) => break,
                Err(e) => return Err(StoreError::Query(format!("list_attachments: {e}"))),
            }
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Query(format!("invalid {what} id {s:?}: {e}")))
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Column order matches ARTICLE_COLUMNS.
fn row_to_article(row: &libsql::Row) -> Result<Article, StoreError> {
    let get_err = |e: libsql::Error| StoreError::Query(format!("article row: {e}"));
    let id: String = row.get(0).map_err(get_err)?;
    let title: String = row.get(1).map_err(get_err)?;
    let body: String = row.get(2).map_err(get_err)?;
    let markup: String = row.get(3).map_err(get_err)?;
    let published_at: String = row.get(4).map_err(get_err)?;
    let author_id: String = row.get(5).map_err(get_err)?;
    let slug: String = row.get(6).map_err(get_err)?;
    let active: i64 = row.get(7).map_err(get_err)?;

    Ok(Article {
        id: parse_uuid(&id, "article")?,
        title,
        body,
        markup: MarkupKind::from_code(&markup).unwrap_or_default(),
        published_at: parse_datetime(&published_at),
        author_id: parse_uuid(&author_id, "author")?,
        slug,
        active: active != 0,
    })
}

/// Column order matches AUTHOR_COLUMNS.
fn row_to_author(row: &libsql::Row) -> Result<Author, StoreError> {
    let get_err = |e: libsql::Error| StoreError::Query(format!("author row: {e}"));
    let id: String = row.get(0).map_err(get_err)?;
    let name: String = row.get(1).map_err(get_err)?;
    let email: String = row.get(2).map_err(get_err)?;
    let active: i64 = row.get(3).map_err(get_err)?;
    Ok(Author {
        id: parse_uuid(&id, "author")?,
        name,
        email,
        active: active != 0,
    })
}

// ── Articles ────────────────────────────────────────────────────────

#[async_trait]
impl ArticleStore for LibSqlBackend {
    async fn create_article(&self, article: &NewArticle) -> Result<ArticleRef, StoreError> {
        let id = Uuid::new_v4();
        let year = article.published_at.year();

        self.conn()
            .execute(
                "INSERT INTO articles (id, title, body, markup, author_id, slug, publish_year, published_at, active, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    article.title.clone(),
                    article.body.clone(),
                    article.markup.code(),
                    article.author_id.to_string(),
                    article.slug.clone(),
                    year as i64,
                    article.published_at.to_rfc3339(),
                    article.active as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Constraint(format!(
                        "slug {:?} already used in {year}",
                        article.slug
                    ))
                } else {
                    StoreError::Query(format!("create_article: {e}"))
                }
            })?;

        debug!(article_id = %id, slug = %article.slug, year, "Article inserted into DB");
        Ok(ArticleRef {
            id,
            title: article.title.clone(),
            slug: article.slug.clone(),
            publish_year: year,
        })
    }

    async fn slug_exists(&self, year: i32, slug: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM articles WHERE publish_year = ?1 AND slug = ?2",
                params![year as i64, slug],
            )
            .await
            .map_err(|e| StoreError::Query(format!("slug_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("slug_exists row: {e}")))?;
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("slug_exists: {e}"))),
        }
    }

    async fn save_attachment(
        &self,
        article: &ArticleRef,
        filename: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO attachments (id, article_id, caption, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    article.id.to_string(),
                    filename,
                    libsql::Value::Blob(data.to_vec()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Attachment {
                filename: filename.to_string(),
                reason: e.to_string(),
            })?;

        debug!(article_id = %article.id, filename, bytes = data.len(), "Attachment saved");
        Ok(())
    }

    async fn list_articles_for_year(&self, year: i32) -> Result<Vec<Article>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles WHERE publish_year = ?1 ORDER BY published_at, rowid"
                ),
                params![year as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_articles_for_year: {e}")))?;

        let mut articles = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => articles.push(row_to_article(&row)?),
                Ok(None) => break,
                Err(e) => return Err(StoreError::Query(format!("list_articles_for_year: {e}"))),
            }
        }
        Ok(articles)
    }
}

// ── Authors ─────────────────────────────────────────────────────────

#[async_trait]
impl AuthorDirectory for LibSqlBackend {
    async fn find_active_author_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Author>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUTHOR_COLUMNS} FROM authors WHERE email = ?1 AND active = 1"
                ),
                params![email.trim().to_ascii_lowercase()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find_active_author_by_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_author(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("find_active_author_by_email: {e}"))),
        }
    }

    async fn upsert_author(
        &self,
        name: &str,
        email: &str,
        active: bool,
    ) -> Result<Author, StoreError> {
        let email = email.trim().to_ascii_lowercase();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO authors (id, name, email, active, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(email) DO UPDATE SET name = excluded.name, active = excluded.active, updated_at = excluded.updated_at",
                params![Uuid::new_v4().to_string(), name, email.clone(), active as i64, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_author: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE email = ?1"),
                params![email.clone()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_author: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_author(&row),
            Ok(None) => Err(StoreError::Query(format!(
                "upsert_author: author {email} missing after write"
            ))),
            Err(e) => Err(StoreError::Query(format!("upsert_author: {e}"))),
        }
    }
}

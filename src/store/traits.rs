//! Store-facing types and the async traits the pipeline depends on.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// How an article body is rendered downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MarkupKind {
    /// HTML or plain text, passed through as-is.
    #[default]
    Html,
    Markdown,
    ReStructuredText,
    Textile,
}

impl MarkupKind {
    /// One-letter code stored with the article.
    pub fn code(&self) -> &'static str {
        match self {
            MarkupKind::Html => "h",
            MarkupKind::Markdown => "m",
            MarkupKind::ReStructuredText => "r",
            MarkupKind::Textile => "t",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "h" => Some(MarkupKind::Html),
            "m" => Some(MarkupKind::Markdown),
            "r" => Some(MarkupKind::ReStructuredText),
            "t" => Some(MarkupKind::Textile),
            _ => None,
        }
    }
}

impl fmt::Display for MarkupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarkupKind::Html => "html",
            MarkupKind::Markdown => "markdown",
            MarkupKind::ReStructuredText => "restructuredtext",
            MarkupKind::Textile => "textile",
        };
        f.write_str(name)
    }
}

impl FromStr for MarkupKind {
    type Err = String;

    /// Accepts a one-letter code or a name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(kind) = Self::from_code(&lower) {
            return Ok(kind);
        }
        match lower.as_str() {
            "html" | "plain" | "text" => Ok(MarkupKind::Html),
            "markdown" | "md" => Ok(MarkupKind::Markdown),
            "restructuredtext" | "rest" | "rst" => Ok(MarkupKind::ReStructuredText),
            "textile" => Ok(MarkupKind::Textile),
            other => Err(format!("unknown markup kind {other:?}")),
        }
    }
}

/// A registered author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub active: bool,
}

/// Everything needed to create an article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub body: String,
    pub markup: MarkupKind,
    pub published_at: DateTime<Utc>,
    pub author_id: Uuid,
    /// Must be unused within the publish year.
    pub slug: String,
    pub active: bool,
}

/// Handle to a stored article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub publish_year: i32,
}

impl ArticleRef {
    /// Site-relative location, `/{year}/{slug}/`.
    pub fn path(&self) -> String {
        format!("/{}/{}/", self.publish_year, self.slug)
    }

    pub fn url(&self, domain: &str) -> String {
        format!("http://{}{}", domain.trim_end_matches('/'), self.path())
    }
}

/// A stored article as read back from the store.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub markup: MarkupKind,
    pub published_at: DateTime<Utc>,
    pub author_id: Uuid,
    pub slug: String,
    pub active: bool,
}

impl Article {
    pub fn to_ref(&self) -> ArticleRef {
        ArticleRef {
            id: self.id,
            title: self.title.clone(),
            slug: self.slug.clone(),
            publish_year: self.published_at.year(),
        }
    }
}

/// Durable article storage with a `(publish_year, slug)` uniqueness constraint.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Create an article. A taken `(year, slug)` is a `StoreError::Constraint`.
    async fn create_article(&self, article: &NewArticle) -> Result<ArticleRef, StoreError>;

    /// Whether `slug` is already used by an article published in `year`.
    async fn slug_exists(&self, year: i32, slug: &str) -> Result<bool, StoreError>;

    /// Attach a file to an article, using the filename as its caption.
    async fn save_attachment(
        &self,
        article: &ArticleRef,
        filename: &str,
        data: &[u8],
    ) -> Result<(), StoreError>;

    /// Articles published in `year`, oldest first.
    async fn list_articles_for_year(&self, year: i32) -> Result<Vec<Article>, StoreError>;
}

/// Lookup of the authors allowed to post by email.
#[async_trait]
pub trait AuthorDirectory: Send + Sync {
    /// Active author registered under `email` (case-insensitive).
    async fn find_active_author_by_email(&self, email: &str)
    -> Result<Option<Author>, StoreError>;

    /// Register an author or update the one already registered under `email`.
    async fn upsert_author(
        &self,
        name: &str,
        email: &str,
        active: bool,
    ) -> Result<Author, StoreError>;
}

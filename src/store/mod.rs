//! Persistence layer: articles, authors and attachments.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Article, ArticleRef, ArticleStore, Author, AuthorDirectory, MarkupKind, NewArticle,
};

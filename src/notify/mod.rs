//! Author acknowledgements for newly created articles.

pub mod smtp;

use async_trait::async_trait;

use crate::config::SiteInfo;
use crate::error::NotifyError;
use crate::store::{ArticleRef, Author};

pub use smtp::SmtpNotifier;

/// Tells an author their email became an article.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_acknowledgement(
        &self,
        author: &Author,
        article: &ArticleRef,
    ) -> Result<(), NotifyError>;
}

pub fn acknowledgement_subject(article: &ArticleRef) -> String {
    format!("Article Posted: {}", article.title)
}

pub fn acknowledgement_body(site: &SiteInfo, article: &ArticleRef) -> String {
    format!(
        "Your email ({}) has been posted as an article on {}.\n\n{}\n",
        article.title,
        site.name,
        article.url(&site.domain)
    )
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn acknowledgement_text_names_site_and_location() {
        let site = SiteInfo {
            name: "Field Notes".into(),
            domain: "notes.example.org".into(),
        };
        let article = ArticleRef {
            id: Uuid::new_v4(),
            title: "Spring migration".into(),
            slug: "spring-migration".into(),
            publish_year: 2025,
        };

        assert_eq!(acknowledgement_subject(&article), "Article Posted: Spring migration");
        let body = acknowledgement_body(&site, &article);
        assert!(body.starts_with(
            "Your email (Spring migration) has been posted as an article on Field Notes."
        ));
        assert!(body.contains("http://notes.example.org/2025/spring-migration/"));
    }
}

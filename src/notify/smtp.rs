//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::{SiteInfo, SmtpConfig};
use crate::error::NotifyError;
use crate::notify::{Notifier, acknowledgement_body, acknowledgement_subject};
use crate::store::{ArticleRef, Author};

/// Sends acknowledgements through an SMTP relay.
pub struct SmtpNotifier {
    config: SmtpConfig,
    site: SiteInfo,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig, site: SiteInfo) -> Self {
        Self { config, site }
    }

    fn build_message(&self, author: &Author, article: &ArticleRef) -> Result<Message, NotifyError> {
        let from: Mailbox =
            self.config
                .from_address
                .parse()
                .map_err(|e| NotifyError::InvalidAddress {
                    address: self.config.from_address.clone(),
                    reason: format!("{e}"),
                })?;
        let to_address: Address =
            author
                .email
                .parse()
                .map_err(|e| NotifyError::InvalidAddress {
                    address: author.email.clone(),
                    reason: format!("{e}"),
                })?;
        let to = Mailbox::new(Some(author.name.clone()), to_address);

        Message::builder()
            .from(from)
            .to(to)
            .subject(acknowledgement_subject(article))
            .body(acknowledgement_body(&self.site, article))
            .map_err(|e| NotifyError::Build(e.to_string()))
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        Ok(SmtpTransport::relay(&self.config.host)
            .map_err(|e| NotifyError::Send(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_acknowledgement(
        &self,
        author: &Author,
        article: &ArticleRef,
    ) -> Result<(), NotifyError> {
        let email = self.build_message(author, article)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| NotifyError::Send(format!("send task failed: {e}")))?
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        info!(to = %author.email, slug = %article.slug, "Acknowledgement sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use uuid::Uuid;

    use super::*;

    fn notifier(from: &str) -> SmtpNotifier {
        SmtpNotifier::new(
            SmtpConfig {
                host: "smtp.example.org".into(),
                port: 587,
                username: "mailer".into(),
                password: SecretString::from("pw"),
                from_address: from.into(),
            },
            SiteInfo {
                name: "Field Notes".into(),
                domain: "notes.example.org".into(),
            },
        )
    }

    fn author(email: &str) -> Author {
        Author {
            id: Uuid::new_v4(),
            name: "Jane Doe".into(),
            email: email.into(),
            active: true,
        }
    }

    fn article() -> ArticleRef {
        ArticleRef {
            id: Uuid::new_v4(),
            title: "Hello".into(),
            slug: "hello".into(),
            publish_year: 2025,
        }
    }

    #[test]
    fn builds_acknowledgement_message() {
        let email = notifier("Field Notes <posts@notes.example.org>")
            .build_message(&author("jane@example.com"), &article())
            .unwrap();
        let text = String::from_utf8(email.formatted()).unwrap();
        assert!(text.contains("Subject: Article Posted: Hello"));
        assert!(text.contains("jane@example.com"));
        assert!(text.contains("posts@notes.example.org"));
        assert!(text.contains("http://notes.example.org/2025/hello/"));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let err = notifier("posts@notes.example.org")
            .build_message(&author("not an address"), &article())
            .unwrap_err();
        assert!(matches!(err, NotifyError::InvalidAddress { .. }));
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let err = notifier("nope")
            .build_message(&author("jane@example.com"), &article())
            .unwrap_err();
        assert!(matches!(err, NotifyError::InvalidAddress { .. }));
    }
}

//! Ingestion pipeline: one mailbox run from connect to disconnect.
//!
//! **Core invariant: a message is only deleted after its article exists.**
//! Skipped and failed messages stay in the mailbox for the next run.
//!
//! Flow:
//! 1. Connect and fetch every message (fatal on error)
//! 2. Per message: parse, authorize, extract, allocate slug, persist, acknowledge
//! 3. Delete the messages that produced an article
//! 4. Disconnect, on every path that connected

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{IngestOptions, Settings};
use crate::error::ConnectionError;
use crate::mailbox::{MailboxConnector, MailboxSession, RawMessage};
use crate::message::{self, ExtractedContent, ParsedMessage};
use crate::notify::{Notifier, SmtpNotifier};
use crate::pipeline::slug;
use crate::pipeline::types::{
    FailReason, IngestionOutcome, MessageReport, RunPhase, RunReport, SkipReason,
};
use crate::store::{ArticleStore, Author, AuthorDirectory, LibSqlBackend, MarkupKind, NewArticle};

/// Title given to messages without a usable subject.
pub const PLACEHOLDER_TITLE: &str = "--- article from email ---";

type Session = Box<dyn MailboxSession>;

/// Turns authorized mailbox messages into articles.
pub struct IngestionPipeline {
    connector: Arc<dyn MailboxConnector>,
    articles: Arc<dyn ArticleStore>,
    authors: Arc<dyn AuthorDirectory>,
    notifier: Option<Arc<dyn Notifier>>,
    options: IngestOptions,
}

impl IngestionPipeline {
    pub fn new(
        connector: Arc<dyn MailboxConnector>,
        articles: Arc<dyn ArticleStore>,
        authors: Arc<dyn AuthorDirectory>,
        options: IngestOptions,
    ) -> Self {
        Self {
            connector,
            articles,
            authors,
            notifier: None,
            options,
        }
    }

    /// Pipeline over the configured mailbox and local database, with an SMTP
    /// notifier when SMTP is configured.
    pub async fn from_settings(settings: &Settings) -> crate::error::Result<Self> {
        let db = Arc::new(LibSqlBackend::new_local(&settings.db_path).await?);
        let mut pipeline = Self::new(
            Arc::new(settings.mailbox.clone()),
            db.clone(),
            db,
            settings.options.clone(),
        );
        if let Some(smtp) = settings.smtp.clone() {
            let notifier = SmtpNotifier::new(smtp, settings.site.clone());
            pipeline = pipeline.with_notifier(Arc::new(notifier));
        }
        Ok(pipeline)
    }

    /// Notifier used when acknowledgements are enabled.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Execute one run. Never returns early without a report; a fatal
    /// connection problem shows up as `RunPhase::Failed`.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        let markup = self.resolve_markup();

        enter(&mut report, RunPhase::Connecting);
        let connector = Arc::clone(&self.connector);
        let connected = tokio::task::spawn_blocking(move || connector.connect())
            .await
            .map_err(|e| ConnectionError::Task(e.to_string()))
            .and_then(|r| r);
        let session = match connected {
            Ok(session) => session,
            Err(e) => return fail(report, e),
        };
        info!(protocol = %session.protocol(), "Mailbox session established");

        enter(&mut report, RunPhase::Fetching);
        let (session, fetched) = match with_session(session, |s| s.fetch_all()).await {
            Ok(pair) => pair,
            Err(e) => return fail(report, e),
        };
        let messages = match fetched {
            Ok(messages) => messages,
            Err(e) => {
                disconnect(session, &mut report).await;
                return fail(report, e);
            }
        };
        info!(count = messages.len(), "Fetched messages");

        enter(&mut report, RunPhase::ProcessingMessages);
        for raw in &messages {
            let outcome = self.process_message(raw, markup).await;
            log_outcome(raw, &outcome);
            report.messages.push(MessageReport {
                id: raw.id,
                outcome,
            });
        }

        enter(&mut report, RunPhase::Deleting);
        let ids = report.created_ids();
        let session = if ids.is_empty() {
            debug!("Nothing to delete");
            session
        } else {
            match with_session(session, move |s| s.delete(&ids)).await {
                Ok((session, Ok(count))) => {
                    report.deleted = count;
                    info!(count, "Deleted ingested messages");
                    session
                }
                Ok((session, Err(e))) => {
                    if let ConnectionError::PartialDelete { deleted, .. } = &e {
                        report.deleted = *deleted;
                    }
                    warn!(error = %e, "Deleting ingested messages failed; they will be seen again");
                    report.delete_error = Some(e);
                    session
                }
                Err(e) => {
                    error!(error = %e, "Mailbox session lost while deleting");
                    report.delete_error = Some(e);
                    enter(&mut report, RunPhase::Done);
                    return report;
                }
            }
        };

        enter(&mut report, RunPhase::Disconnecting);
        disconnect(session, &mut report).await;
        enter(&mut report, RunPhase::Done);
        info!(summary = %report.summary(), "Ingestion run complete");
        report
    }

    /// Configured markup kind, or HTML when unset or unrecognized.
    fn resolve_markup(&self) -> MarkupKind {
        match self.options.markup.as_deref() {
            None => MarkupKind::default(),
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(markup = raw, error = %e, "Unrecognized markup kind, using HTML");
                MarkupKind::default()
            }),
        }
    }

    async fn process_message(&self, raw: &RawMessage, markup: MarkupKind) -> IngestionOutcome {
        let parsed = message::parse(&raw.payload);
        let content = message::extract(&parsed);

        let author = match self.authorize(&parsed).await {
            Ok(author) => author,
            Err(outcome) => return outcome,
        };

        let published_at = publish_time(parsed.date());
        let title = parsed
            .subject()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(PLACEHOLDER_TITLE)
            .to_string();

        let year = published_at.year();
        let base = slug::slugify(&title);
        let articles = &self.articles;
        let slug = match slug::allocate(&base, year, |year, candidate| async move {
            articles.slug_exists(year, &candidate).await
        })
        .await
        {
            Ok(slug) => slug,
            Err(e) => return IngestionOutcome::Failed(FailReason::Store(e)),
        };

        let ExtractedContent { body, attachments } = content;
        let new_article = NewArticle {
            title,
            body,
            markup,
            published_at,
            author_id: author.id,
            slug,
            active: self.options.autopost,
        };
        let article = match self.articles.create_article(&new_article).await {
            Ok(article) => article,
            Err(e) => return IngestionOutcome::Failed(FailReason::Store(e)),
        };

        for attachment in &attachments {
            if let Err(e) = self
                .articles
                .save_attachment(&article, &attachment.filename, &attachment.data)
                .await
            {
                warn!(
                    article = %article.path(),
                    filename = %attachment.filename,
                    error = %e,
                    "Attachment not saved"
                );
            }
        }

        if self.options.acknowledge {
            match &self.notifier {
                Some(notifier) => {
                    if let Err(e) = notifier.send_acknowledgement(&author, &article).await {
                        warn!(to = %author.email, error = %e, "Acknowledgement failed");
                    }
                }
                None => warn!("Acknowledgement enabled but no notifier configured"),
            }
        }

        IngestionOutcome::Created(article)
    }

    /// Resolve the sender to an active author, or the outcome to record instead.
    async fn authorize(&self, parsed: &ParsedMessage) -> Result<Author, IngestionOutcome> {
        let Some(address) = parsed.sender_address() else {
            return Err(IngestionOutcome::Skipped(SkipReason::UnauthorizedSender {
                address: None,
            }));
        };
        match self.authors.find_active_author_by_email(&address).await {
            Ok(Some(author)) => Ok(author),
            Ok(None) => Err(IngestionOutcome::Skipped(SkipReason::UnauthorizedSender {
                address: Some(address),
            })),
            Err(e) => Err(IngestionOutcome::Failed(FailReason::Store(e))),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn enter(report: &mut RunReport, phase: RunPhase) {
    debug!(from = %report.phase, to = %phase, "Run phase");
    report.phase = phase;
}

fn fail(mut report: RunReport, e: ConnectionError) -> RunReport {
    error!(phase = %report.phase, error = %e, "Ingestion run failed");
    report.phase = RunPhase::Failed;
    report.error = Some(e);
    report
}

fn log_outcome(raw: &RawMessage, outcome: &IngestionOutcome) {
    match outcome {
        IngestionOutcome::Created(article) => {
            info!(id = %raw.id, path = %article.path(), "Article created")
        }
        IngestionOutcome::Skipped(reason) => {
            warn!(id = %raw.id, reason = %reason, "Message skipped")
        }
        IngestionOutcome::Failed(reason) => {
            error!(id = %raw.id, reason = %reason, "Message failed")
        }
    }
}

/// Publish time from a `Date` header, falling back to now.
fn publish_time(date: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = date else {
        return Utc::now();
    };
    match DateTime::parse_from_rfc2822(raw.trim()) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            debug!(date = raw, error = %e, "Unparseable Date header, using now");
            Utc::now()
        }
    }
}

/// Run a blocking session call on the blocking pool, handing the session back.
///
/// The outer error means the task itself died and the session is gone.
async fn with_session<T, F>(
    mut session: Session,
    f: F,
) -> Result<(Session, Result<T, ConnectionError>), ConnectionError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn MailboxSession) -> Result<T, ConnectionError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = f(session.as_mut());
        (session, result)
    })
    .await
    .map_err(|e| ConnectionError::Task(e.to_string()))
}

/// Close the session, recording but not propagating failure.
async fn disconnect(session: Session, report: &mut RunReport) {
    let result = tokio::task::spawn_blocking(move || session.disconnect())
        .await
        .map_err(|e| ConnectionError::Task(e.to_string()))
        .and_then(|r| r);
    if let Err(e) = result {
        warn!(error = %e, "Mailbox disconnect failed");
        report.disconnect_error = Some(e);
    }
}

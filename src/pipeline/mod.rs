//! Mailbox ingestion pipeline.
//!
//! Every fetched message flows through:
//! 1. `message::parse()` and `message::extract()`: headers, body text, attachments
//! 2. Sender authorization against the author directory
//! 3. `slug::allocate()`: a slug unused in the publish year
//! 4. Article and attachment persistence, then an optional acknowledgement
//!
//! **Only messages that produced an article are deleted from the mailbox.**

pub mod processor;
pub mod slug;
pub mod types;

pub use processor::{IngestionPipeline, PLACEHOLDER_TITLE};
pub use types::{
    FailReason, IngestionOutcome, MessageReport, RunPhase, RunReport, RunSummary, SkipReason,
};

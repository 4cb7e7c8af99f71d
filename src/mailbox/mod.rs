//! Mailbox sessions: IMAP4 and POP3 behind one blocking capability.
//!
//! A session is opened per run, used sequentially, and released exactly once
//! through [`MailboxSession::disconnect`], which consumes it.

pub mod imap;
pub mod pop3;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::str::FromStr;

use crate::config::MailboxConfig;
use crate::error::ConnectionError;

pub use imap::ImapSession;
pub use pop3::Pop3Session;

/// Supported mailbox protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Imap4,
    Pop3,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Imap4 => "IMAP4",
            Protocol::Pop3 => "POP3",
        }
    }

    /// Well-known port for this protocol with or without TLS.
    pub fn default_port(&self, tls: bool) -> u16 {
        match (self, tls) {
            (Protocol::Imap4, true) => 993,
            (Protocol::Imap4, false) => 143,
            (Protocol::Pop3, true) => 995,
            (Protocol::Pop3, false) => 110,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IMAP4" | "IMAP" => Ok(Protocol::Imap4),
            "POP3" | "POP" => Ok(Protocol::Pop3),
            other => Err(format!("unsupported mailbox protocol {other:?}")),
        }
    }
}

/// Session-local message identifier.
///
/// IMAP4 identifiers are UIDs within the selected mailbox. POP3 identifiers
/// are 1-based ordinals that are only meaningful inside the session that
/// produced them and must never be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    Uid(u32),
    Ordinal(u32),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Uid(uid) => write!(f, "uid:{uid}"),
            MessageId::Ordinal(n) => write!(f, "#{n}"),
        }
    }
}

/// A message as delivered by the server.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

/// An authenticated mailbox session.
///
/// All calls block on network I/O.
pub trait MailboxSession: Send {
    fn protocol(&self) -> Protocol;

    /// List every message in the mailbox and retrieve its full payload.
    fn fetch_all(&mut self) -> Result<Vec<RawMessage>, ConnectionError>;

    /// Mark `ids` for deletion and make the deletion durable where the
    /// protocol requires an explicit step. An empty slice is a no-op.
    ///
    /// Returns how many messages were removed. When only some identifiers
    /// were refused the error is `PartialDelete`, carrying the same count.
    fn delete(&mut self, ids: &[MessageId]) -> Result<usize, ConnectionError>;

    /// Best-effort close of the session.
    fn disconnect(self: Box<Self>) -> Result<(), ConnectionError>;
}

/// Opens mailbox sessions.
pub trait MailboxConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, ConnectionError>;
}

impl MailboxConnector for MailboxConfig {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, ConnectionError> {
        match self.protocol {
            Protocol::Imap4 => Ok(Box::new(ImapSession::connect(self)?)),
            Protocol::Pop3 => Ok(Box::new(Pop3Session::connect(self)?)),
        }
    }
}

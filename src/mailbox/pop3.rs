//! POP3 session (RFC 1939) over the blocking transport.
//!
//! POP3 has no durable message identifiers: messages are addressed by their
//! 1-based ordinal for the lifetime of one session, and `DELE` only takes
//! effect when the session ends with `QUIT`.

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::MailboxConfig;
use crate::error::ConnectionError;
use crate::mailbox::transport::Transport;
use crate::mailbox::{MailboxSession, MessageId, Protocol, RawMessage};

const PROTOCOL: &str = "POP3";

/// Authenticated POP3 session in the TRANSACTION state.
pub struct Pop3Session {
    transport: Transport,
}

impl Pop3Session {
    /// Connect and authenticate with USER/PASS.
    pub fn connect(config: &MailboxConfig) -> Result<Self, ConnectionError> {
        let transport = Transport::open(config)?;
        let mut session = Self { transport };

        session.read_status("greeting")?;

        let auth = |e: ConnectionError| match e {
            ConnectionError::Rejected { response, .. } => ConnectionError::AuthFailed {
                protocol: PROTOCOL,
                reason: response,
            },
            other => other,
        };
        session
            .command(&format!("USER {}", config.username))
            .map_err(auth)?;
        session
            .command(&format!("PASS {}", config.password.expose_secret()))
            .map_err(auth)?;

        debug!(host = %config.host, user = %config.username, "POP3 session ready");
        Ok(session)
    }

    /// Read a `+OK`/`-ERR` status line, returning the text after `+OK`.
    fn read_status(&mut self, command: &str) -> Result<String, ConnectionError> {
        let line = String::from_utf8_lossy(&self.transport.read_line()?).into_owned();
        if let Some(rest) = line.strip_prefix("+OK") {
            Ok(rest.trim().to_string())
        } else if line.starts_with("-ERR") {
            Err(ConnectionError::Rejected {
                protocol: PROTOCOL,
                command: command.to_string(),
                response: line,
            })
        } else {
            Err(ConnectionError::malformed(
                PROTOCOL,
                format!("unexpected status line: {line}"),
            ))
        }
    }

    /// Send a single-line command.
    fn command(&mut self, command: &str) -> Result<String, ConnectionError> {
        let verb = command.split_whitespace().next().unwrap_or_default().to_string();
        if verb == "PASS" {
            debug!("POP3 > PASS ***");
        } else {
            debug!("POP3 > {command}");
        }
        self.transport.write_line(command)?;
        self.read_status(&verb)
    }

    /// Send a command with a multi-line response; returns the dot-unstuffed
    /// lines of the body.
    fn multiline(&mut self, command: &str) -> Result<Vec<Vec<u8>>, ConnectionError> {
        self.command(command)?;
        let mut lines = Vec::new();
        loop {
            let line = self.transport.read_line()?;
            if line == b"." {
                return Ok(lines);
            }
            match line.strip_prefix(b".") {
                Some(unstuffed) => lines.push(unstuffed.to_vec()),
                None => lines.push(line),
            }
        }
    }
}

impl MailboxSession for Pop3Session {
    fn protocol(&self) -> Protocol {
        Protocol::Pop3
    }

    fn fetch_all(&mut self) -> Result<Vec<RawMessage>, ConnectionError> {
        let count = parse_stat(&self.command("STAT")?)?;
        debug!(count, "POP3 mailbox status");

        let mut messages = Vec::with_capacity(count as usize);
        for n in 1..=count {
            let lines = self.multiline(&format!("RETR {n}"))?;
            let mut payload = Vec::new();
            for line in lines {
                payload.extend_from_slice(&line);
                payload.extend_from_slice(b"\r\n");
            }
            messages.push(RawMessage {
                id: MessageId::Ordinal(n),
                payload,
            });
        }
        Ok(messages)
    }

    fn delete(&mut self, ids: &[MessageId]) -> Result<usize, ConnectionError> {
        let mut marked = 0usize;
        let mut failed = Vec::new();
        for id in ids {
            let MessageId::Ordinal(n) = id else {
                warn!(id = %id, "Not a POP3 identifier, cannot delete");
                failed.push(id.to_string());
                continue;
            };
            match self.command(&format!("DELE {n}")) {
                Ok(_) => marked += 1,
                Err(ConnectionError::Rejected { response, .. }) => {
                    warn!(ordinal = n, response = %response, "POP3 DELE rejected");
                    failed.push(id.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        if failed.is_empty() {
            Ok(marked)
        } else {
            Err(ConnectionError::PartialDelete {
                protocol: PROTOCOL,
                command: "DELE".into(),
                deleted: marked,
                requested: ids.len(),
                response: format!("could not delete {}", failed.join(", ")),
            })
        }
    }

    fn disconnect(mut self: Box<Self>) -> Result<(), ConnectionError> {
        self.command("QUIT").map(|_| ())
    }
}

/// Parse the message count out of a `STAT` reply (`<count> <octets>`).
fn parse_stat(reply: &str) -> Result<u32, ConnectionError> {
    reply
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or_else(|| ConnectionError::malformed(PROTOCOL, format!("bad STAT reply: {reply}")))
}

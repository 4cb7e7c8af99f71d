//! IMAP4rev1 session (RFC 3501) over the blocking transport.
//!
//! Only the handful of commands the ingestion run needs: LOGIN, SELECT,
//! UID SEARCH, UID FETCH, UID STORE, EXPUNGE, CLOSE and LOGOUT.

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::MailboxConfig;
use crate::error::ConnectionError;
use crate::mailbox::transport::Transport;
use crate::mailbox::{MailboxSession, MessageId, Protocol, RawMessage};

const PROTOCOL: &str = "IMAP4";

/// An untagged server response, with any literals it carried.
#[derive(Debug)]
struct Untagged {
    line: Vec<u8>,
    literals: Vec<Vec<u8>>,
}

impl Untagged {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.line).into_owned()
    }
}

/// Authenticated IMAP4 session with INBOX selected.
pub struct ImapSession {
    transport: Transport,
    tag_counter: u32,
}

impl ImapSession {
    /// Connect, log in and select INBOX.
    pub fn connect(config: &MailboxConfig) -> Result<Self, ConnectionError> {
        let transport = Transport::open(config)?;
        let mut session = Self {
            transport,
            tag_counter: 0,
        };

        let greeting = String::from_utf8_lossy(&session.transport.read_line()?).into_owned();
        if greeting.starts_with("* BYE") {
            return Err(ConnectionError::Rejected {
                protocol: PROTOCOL,
                command: "greeting".into(),
                response: greeting,
            });
        }
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(ConnectionError::malformed(
                PROTOCOL,
                format!("unexpected greeting: {greeting}"),
            ));
        }

        if !greeting.starts_with("* PREAUTH") {
            let login = format!(
                "LOGIN {} {}",
                quote(&config.username),
                quote(config.password.expose_secret())
            );
            session.command(&login).map_err(|e| match e {
                ConnectionError::Rejected { response, .. } => ConnectionError::AuthFailed {
                    protocol: PROTOCOL,
                    reason: response,
                },
                other => other,
            })?;
        }

        session.command("SELECT INBOX")?;
        debug!(host = %config.host, user = %config.username, "IMAP4 session ready");
        Ok(session)
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:04}", self.tag_counter)
    }

    /// Send a tagged command and collect untagged responses until its
    /// completion. A `NO`/`BAD` completion is returned as `Rejected`.
    fn command(&mut self, command: &str) -> Result<Vec<Untagged>, ConnectionError> {
        let tag = self.next_tag();
        if command.starts_with("LOGIN ") {
            debug!(tag = %tag, "IMAP4 > LOGIN ***");
        } else {
            debug!(tag = %tag, "IMAP4 > {command}");
        }
        self.transport.write_line(&format!("{tag} {command}"))?;

        let mut untagged = Vec::new();
        loop {
            let mut line = self.transport.read_line()?;

            if let Some(status) = tagged_status(&line, &tag) {
                let status = String::from_utf8_lossy(status).into_owned();
                let verb = command.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
                return if status.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("OK")) {
                    Ok(untagged)
                } else {
                    Err(ConnectionError::Rejected {
                        protocol: PROTOCOL,
                        command: verb,
                        response: status,
                    })
                };
            }

            let mut literals = Vec::new();
            while let Some(len) = literal_len(&line) {
                literals.push(self.transport.read_exact(len)?);
                let rest = self.transport.read_line()?;
                line.extend_from_slice(&rest);
            }
            untagged.push(Untagged { line, literals });
        }
    }

    fn fetch_one(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ConnectionError> {
        let responses = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        Ok(responses
            .into_iter()
            .filter(|r| is_fetch(&r.line))
            .find_map(|r| r.literals.into_iter().next()))
    }
}

impl MailboxSession for ImapSession {
    fn protocol(&self) -> Protocol {
        Protocol::Imap4
    }

    fn fetch_all(&mut self) -> Result<Vec<RawMessage>, ConnectionError> {
        let responses = self.command("UID SEARCH ALL")?;
        let uids = parse_search(&responses);
        debug!(count = uids.len(), "IMAP4 search complete");

        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            match self.fetch_one(uid)? {
                Some(payload) => messages.push(RawMessage {
                    id: MessageId::Uid(uid),
                    payload,
                }),
                None => warn!(uid, "IMAP4 FETCH returned no body, skipping"),
            }
        }
        Ok(messages)
    }

    fn delete(&mut self, ids: &[MessageId]) -> Result<usize, ConnectionError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut failed = Vec::new();
        let mut flagged = 0usize;
        for id in ids {
            let MessageId::Uid(uid) = id else {
                warn!(id = %id, "Not an IMAP4 identifier, cannot delete");
                failed.push(id.to_string());
                continue;
            };
            match self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)")) {
                Ok(_) => flagged += 1,
                Err(ConnectionError::Rejected { response, .. }) => {
                    warn!(uid, response = %response, "IMAP4 STORE rejected");
                    failed.push(id.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        // Sequence numbers shift on expunge, so it runs once after every flag is set.
        if flagged > 0 {
            self.command("EXPUNGE")?;
        }

        if failed.is_empty() {
            Ok(flagged)
        } else {
            Err(ConnectionError::PartialDelete {
                protocol: PROTOCOL,
                command: "UID STORE".into(),
                deleted: flagged,
                requested: ids.len(),
                response: format!("could not flag {}", failed.join(", ")),
            })
        }
    }

    fn disconnect(mut self: Box<Self>) -> Result<(), ConnectionError> {
        let closed = self.command("CLOSE");
        let logged_out = self.command("LOGOUT");
        closed?;
        logged_out.map(|_| ())
    }
}

/// Quote a string for use as an IMAP astring.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// If `line` is the tagged completion for `tag`, return its status text.
fn tagged_status<'a>(line: &'a [u8], tag: &str) -> Option<&'a [u8]> {
    let rest = line.strip_prefix(tag.as_bytes())?;
    rest.strip_prefix(b" ")
}

/// Length of the literal announced at the end of `line` (`{123}`).
fn literal_len(line: &[u8]) -> Option<usize> {
    let inner = line.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|&b| b == b'{')?;
    let digits = inner[open + 1..].strip_suffix(b"+").unwrap_or(&inner[open + 1..]);
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn is_fetch(line: &[u8]) -> bool {
    let text = String::from_utf8_lossy(line);
    let mut words = text.split_whitespace();
    words.next() == Some("*")
        && words.next().is_some_and(|n| n.parse::<u32>().is_ok())
        && words.next().is_some_and(|w| w.eq_ignore_ascii_case("FETCH"))
}

fn parse_search(responses: &[Untagged]) -> Vec<u32> {
    responses
        .iter()
        .map(Untagged::text)
        .filter_map(|text| {
            let rest = text.strip_prefix("* ")?;
            let (verb, ids) = rest.split_once(' ').unwrap_or((rest, ""));
            verb.eq_ignore_ascii_case("SEARCH").then(|| {
                ids.split_whitespace()
                    .filter_map(|n| n.parse::<u32>().ok())
                    .collect::<Vec<_>>()
            })
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MailboxConnector;
    use crate::mailbox::testing::ScriptedServer;

    const GREETING: &str = "* OK IMAP4rev1 ready\r\n";

    fn fetch_reply(tag: &str, seq: u32, uid: u32, body: &str) -> String {
        format!(
            "* {seq} FETCH (UID {uid} BODY[] {{{len}}}\r\n{body})\r\n{tag} OK FETCH completed\r\n",
            len = body.len()
        )
    }

    fn standard_server(bodies: Vec<(u32, &'static str)>) -> ScriptedServer {
        ScriptedServer::start(GREETING, move |line| {
            let (tag, cmd) = line.split_once(' ').unwrap_or((line, ""));
            if cmd.starts_with("LOGIN") {
                return format!("{tag} OK LOGIN completed\r\n");
            }
            if cmd == "SELECT INBOX" {
                return format!("* {} EXISTS\r\n{tag} OK [READ-WRITE] SELECT completed\r\n", bodies.len());
            }
            if cmd == "UID SEARCH ALL" {
                let uids: Vec<String> = bodies.iter().map(|(uid, _)| uid.to_string()).collect();
                return format!("* SEARCH {}\r\n{tag} OK SEARCH completed\r\n", uids.join(" "));
            }
            if let Some(uid) = cmd
                .strip_prefix("UID FETCH ")
                .and_then(|r| r.strip_suffix(" BODY.PEEK[]"))
            {
                let uid: u32 = uid.parse().unwrap();
                let (seq, (_, body)) = bodies
                    .iter()
                    .enumerate()
                    .find(|(_, (u, _))| *u == uid)
                    .unwrap();
                return fetch_reply(tag, seq as u32 + 1, uid, body);
            }
            if cmd.starts_with("UID STORE") || cmd == "EXPUNGE" || cmd == "CLOSE" {
                return format!("{tag} OK done\r\n");
            }
            if cmd == "LOGOUT" {
                return format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n");
            }
            format!("{tag} BAD unknown command\r\n")
        })
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn literal_len_detects_trailing_literal() {
        assert_eq!(literal_len(b"* 1 FETCH (BODY[] {42}"), Some(42));
        assert_eq!(literal_len(b"* 1 FETCH (BODY[] {7+}"), Some(7));
        assert_eq!(literal_len(b"* 1 FETCH (FLAGS (\\Seen))"), None);
        assert_eq!(literal_len(b"* OK {abc}"), None);
    }

    #[test]
    fn tagged_status_requires_exact_tag() {
        assert_eq!(tagged_status(b"A0001 OK done", "A0001"), Some(&b"OK done"[..]));
        assert_eq!(tagged_status(b"A00010 OK done", "A0001"), None);
        assert_eq!(tagged_status(b"* OK untagged", "A0001"), None);
    }

    #[test]
    fn parse_search_collects_ids_across_lines() {
        let responses = vec![
            Untagged {
                line: b"* SEARCH 3 5".to_vec(),
                literals: vec![],
            },
            Untagged {
                line: b"* search 8".to_vec(),
                literals: vec![],
            },
            Untagged {
                line: b"* 2 EXISTS".to_vec(),
                literals: vec![],
            },
        ];
        assert_eq!(parse_search(&responses), vec![3, 5, 8]);
        assert!(parse_search(&[Untagged {
            line: b"* SEARCH".to_vec(),
            literals: vec![],
        }])
        .is_empty());
    }

    #[test]
    fn fetches_every_message_with_literal_bodies() {
        let first = "From: a@example.com\r\nSubject: One\r\n\r\nBody one\r\n";
        let second = "From: b@example.com\r\nSubject: Two\r\n\r\nBody {with braces}\r\n";
        let server = standard_server(vec![(7, first), (9, second)]);
        let config = server.config(Protocol::Imap4);

        let mut session = config.connect().unwrap();
        assert_eq!(session.protocol(), Protocol::Imap4);
        let messages = session.fetch_all().unwrap();
        session.disconnect().unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, MessageId::Uid(7));
        assert_eq!(messages[0].payload, first.as_bytes());
        assert_eq!(messages[1].id, MessageId::Uid(9));
        assert_eq!(messages[1].payload, second.as_bytes());

        let sent = server.finish();
        assert_eq!(sent[0], r#"A0001 LOGIN "editor" "s3cret""#);
        assert_eq!(sent[1], "A0002 SELECT INBOX");
        assert_eq!(sent[2], "A0003 UID SEARCH ALL");
        assert_eq!(sent[3], "A0004 UID FETCH 7 BODY.PEEK[]");
        assert_eq!(sent[4], "A0005 UID FETCH 9 BODY.PEEK[]");
        assert_eq!(sent[5], "A0006 CLOSE");
        assert_eq!(sent[6], "A0007 LOGOUT");
    }

    #[test]
    fn delete_flags_each_then_expunges_once() {
        let server = standard_server(vec![(3, "x"), (4, "y"), (5, "z")]);
        let config = server.config(Protocol::Imap4);

        let mut session = config.connect().unwrap();
        let deleted = session
            .delete(&[MessageId::Uid(3), MessageId::Uid(5)])
            .unwrap();
        assert_eq!(deleted, 2);
        session.disconnect().unwrap();

        let sent = server.finish();
        let commands: Vec<&str> = sent
            .iter()
            .map(|l| l.split_once(' ').map_or(l.as_str(), |(_, c)| c))
            .collect();
        assert_eq!(
            commands,
            vec![
                r#"LOGIN "editor" "s3cret""#,
                "SELECT INBOX",
                "UID STORE 3 +FLAGS.SILENT (\\Deleted)",
                "UID STORE 5 +FLAGS.SILENT (\\Deleted)",
                "EXPUNGE",
                "CLOSE",
                "LOGOUT",
            ]
        );
    }

    #[test]
    fn empty_delete_sends_nothing() {
        let server = standard_server(vec![]);
        let mut session = server.config(Protocol::Imap4).connect().unwrap();
        assert_eq!(session.delete(&[]).unwrap(), 0);
        session.disconnect().unwrap();
        let sent = server.finish();
        assert!(!sent.iter().any(|l| l.contains("EXPUNGE") || l.contains("STORE")));
    }

    #[test]
    fn refused_flag_still_expunges_the_rest() {
        let server = ScriptedServer::start(GREETING, |line| {
            let (tag, cmd) = line.split_once(' ').unwrap_or((line, ""));
            match cmd {
                "UID STORE 4 +FLAGS.SILENT (\\Deleted)" => format!("{tag} NO message is locked\r\n"),
                "LOGOUT" => format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n"),
                _ => format!("{tag} OK done\r\n"),
            }
        });
        let mut session = server.config(Protocol::Imap4).connect().unwrap();
        let err = session
            .delete(&[MessageId::Uid(3), MessageId::Uid(4), MessageId::Uid(5)])
            .unwrap_err();
        match err {
            ConnectionError::PartialDelete {
                deleted, requested, ..
            } => assert_eq!((deleted, requested), (2, 3)),
            other => panic!("expected partial delete, got {other:?}"),
        }
        session.disconnect().unwrap();

        let sent = server.finish();
        assert_eq!(sent.iter().filter(|l| l.ends_with(" EXPUNGE")).count(), 1);
        assert!(sent.iter().any(|l| l.contains("UID STORE 5")));
    }

    #[test]
    fn rejected_login_is_auth_failure() {
        let server = ScriptedServer::start(GREETING, |line| {
            let (tag, _) = line.split_once(' ').unwrap_or((line, ""));
            format!("{tag} NO [AUTHENTICATIONFAILED] invalid credentials\r\n")
        });
        let err = server.config(Protocol::Imap4).connect().err().unwrap();
        assert!(matches!(err, ConnectionError::AuthFailed { .. }));
        server.finish();
    }

    #[test]
    fn truncated_literal_is_an_error() {
        let server = ScriptedServer::start(GREETING, |line| {
            let (tag, cmd) = line.split_once(' ').unwrap_or((line, ""));
            match cmd {
                "UID SEARCH ALL" => format!("* SEARCH 1\r\n{tag} OK SEARCH completed\r\n"),
                c if c.starts_with("UID FETCH") => "* 1 FETCH (UID 1 BODY[] {500}\r\nshort".into(),
                _ => format!("{tag} OK\r\n"),
            }
        });
        let mut config = server.config(Protocol::Imap4);
        config.timeout = std::time::Duration::from_millis(300);

        let mut session = config.connect().unwrap();
        assert!(matches!(
            session.fetch_all(),
            Err(ConnectionError::Timeout(_) | ConnectionError::Closed)
        ));
        drop(session);
        server.finish();
    }
}

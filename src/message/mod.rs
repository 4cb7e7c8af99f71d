//! Raw RFC 822 / MIME payloads into a structured header map and body tree.
//!
//! Parsing never fails. Well-formed input goes through `mail-parser`, which
//! handles transfer decoding, charsets and encoded words. Anything it rejects,
//! or a payload whose body it cannot find, degrades to the header block plus
//! the remainder as one opaque `text/plain` part.

pub mod extract;

use std::collections::BTreeMap;

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use tracing::debug;

pub use extract::{Attachment, ExtractedContent, extract};

const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// A parsed message: headers plus the root body part.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    headers: BTreeMap<String, String>,
    pub root: BodyPart,
}

impl ParsedMessage {
    /// Header value by case-insensitive name. Later duplicates win.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("subject")
    }

    pub fn from(&self) -> Option<&str> {
        self.header("from")
    }

    pub fn date(&self) -> Option<&str> {
        self.header("date")
    }

    /// Bare address of the sender, lowercased.
    pub fn sender_address(&self) -> Option<String> {
        self.from().and_then(parse_address)
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.root.body, PartBody::Multipart(_))
    }
}

/// One node of the MIME tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyPart {
    /// `type/subtype`, lowercased.
    pub content_type: String,
    pub filename: Option<String>,
    pub body: PartBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartBody {
    /// Decoded leaf payload.
    Single(Vec<u8>),
    Multipart(Vec<BodyPart>),
}

impl BodyPart {
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            PartBody::Single(data) => Some(data),
            PartBody::Multipart(_) => None,
        }
    }

    pub fn children(&self) -> Option<&[BodyPart]> {
        match &self.body {
            PartBody::Single(_) => None,
            PartBody::Multipart(children) => Some(children),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.content_type.as_str(), "text/plain" | "text/html")
    }
}

/// Parse a raw message payload.
pub fn parse(raw: &[u8]) -> ParsedMessage {
    let (header_block, rest) = split_header_block(raw);
    let mut headers = parse_header_block(header_block);

    // Without the blank separator line mail-parser reads the body lines as
    // headers and drops them.
    let separated = header_block.len() + rest.len() < raw.len();
    if !separated && !is_blank(rest) {
        debug!(len = rest.len(), "No header separator, keeping remainder as text");
        return ParsedMessage {
            headers,
            root: opaque_text(rest),
        };
    }

    let Some(message) = MessageParser::default().parse(raw) else {
        debug!(len = raw.len(), "Unparseable message, treating as opaque text");
        return ParsedMessage {
            headers,
            root: opaque_text(rest),
        };
    };

    // Prefer the decoded forms of the headers that carry display text.
    if let Some(subject) = message.subject() {
        headers.insert("subject".into(), subject.to_string());
    }
    if let Some(from) = decoded_from(&message) {
        headers.insert("from".into(), from);
    }

    let root = convert_part(&message, 0).unwrap_or_else(|| opaque_text(rest));

    ParsedMessage { headers, root }
}

fn opaque_text(rest: &[u8]) -> BodyPart {
    BodyPart {
        content_type: DEFAULT_CONTENT_TYPE.into(),
        filename: None,
        body: PartBody::Single(rest.to_vec()),
    }
}

fn is_blank(data: &[u8]) -> bool {
    data.iter().all(u8::is_ascii_whitespace)
}

fn convert_part(message: &Message<'_>, id: usize) -> Option<BodyPart> {
    let part = message.parts.get(id)?;

    let content_type = MimeHeaders::content_type(part)
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .map(|ct| ct.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.into());
    let filename = MimeHeaders::attachment_name(part).map(str::to_string);

    let body = match &part.body {
        PartType::Multipart(ids) => PartBody::Multipart(
            ids.iter()
                .filter_map(|child| convert_part(message, *child as usize))
                .collect(),
        ),
        _ => PartBody::Single(part.contents().to_vec()),
    };

    Some(BodyPart {
        content_type,
        filename,
        body,
    })
}

fn decoded_from(message: &Message<'_>) -> Option<String> {
    let addr = message.from()?.first()?;
    let address = addr.address()?;
    Some(match addr.name() {
        Some(name) if !name.trim().is_empty() => format!("{name} <{address}>"),
        _ => address.to_string(),
    })
}

/// Split the header block from the body.
///
/// The block ends at the first blank line, which is dropped, or at the first
/// line that is neither a `Name: value` field nor a continuation of one,
/// which starts the body.
fn split_header_block(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    let mut in_field = false;
    while pos < raw.len() {
        let end = raw[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw.len(), |i| pos + i + 1);
        let line = trim_line_ending(&raw[pos..end]);
        if line.is_empty() {
            return (&raw[..pos], &raw[end..]);
        }
        let continuation = in_field && matches!(line[0], b' ' | b'\t');
        if !continuation && !is_field_line(line) {
            return (&raw[..pos], &raw[pos..]);
        }
        in_field = true;
        pos = end;
    }
    (raw, &raw[raw.len()..])
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `Name: value`, where the name is one or more printable, non-space
/// ASCII characters.
fn is_field_line(line: &[u8]) -> bool {
    match line.iter().position(|&b| b == b':') {
        Some(colon) if colon > 0 => line[..colon].iter().all(u8::is_ascii_graphic),
        _ => false,
    }
}

/// Unfold and collect `Name: value` lines. Keys are lowercased; the last
/// occurrence of a name wins.
fn parse_header_block(block: &[u8]) -> BTreeMap<String, String> {
    let text = String::from_utf8_lossy(block);
    let mut fields: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = fields.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                fields.push((name.to_ascii_lowercase(), value.trim().to_string()));
            }
        }
    }

    fields.into_iter().collect()
}

/// Extract the bare address from a `From` value such as
/// `Jane Doe <jane@example.com>` or `jane@example.com`.
pub fn parse_address(value: &str) -> Option<String> {
    let candidate = match (value.rfind('<'), value.rfind('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value,
    };
    let candidate = candidate.trim().trim_matches(['"', '\'']);
    if candidate.contains('@') && !candidate.contains(char::is_whitespace) {
        Some(candidate.to_ascii_lowercase())
    } else {
        None
    }
}

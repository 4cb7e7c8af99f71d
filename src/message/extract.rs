//! Body selection and attachment enumeration.

use super::{BodyPart, ParsedMessage, PartBody};

/// A filename-bearing part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Article body text plus attachment candidates in appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Pick the body text and collect attachments.
///
/// A single-part message is its own body. For multipart messages the body is
/// the first unnamed `text/plain` or `text/html` part among the children of
/// the first `multipart/alternative` child, or among the top-level children
/// when there is none. Every named leaf at any depth is an attachment.
pub fn extract(msg: &ParsedMessage) -> ExtractedContent {
    let children = match &msg.root.body {
        PartBody::Single(data) => {
            return ExtractedContent {
                body: String::from_utf8_lossy(data).into_owned(),
                attachments: Vec::new(),
            };
        }
        PartBody::Multipart(children) => children,
    };

    let candidates = children
        .iter()
        .find(|part| part.content_type == "multipart/alternative")
        .and_then(BodyPart::children)
        .unwrap_or(children.as_slice());

    let body = candidates
        .iter()
        .filter(|part| part.filename.is_none() && part.is_text())
        .find_map(BodyPart::payload)
        .map(|data| String::from_utf8_lossy(data).into_owned())
        .unwrap_or_default();

    let mut attachments = Vec::new();
    collect_attachments(&msg.root, &mut attachments);

    ExtractedContent { body, attachments }
}

fn collect_attachments(part: &BodyPart, out: &mut Vec<Attachment>) {
    match &part.body {
        PartBody::Single(data) => {
            if let Some(filename) = &part.filename {
                out.push(Attachment {
                    filename: filename.clone(),
                    data: data.clone(),
                });
            }
        }
        PartBody::Multipart(children) => {
            for child in children {
                collect_attachments(child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse;

    fn leaf(content_type: &str, filename: Option<&str>, data: &str) -> BodyPart {
        BodyPart {
            content_type: content_type.into(),
            filename: filename.map(str::to_string),
            body: PartBody::Single(data.as_bytes().to_vec()),
        }
    }

    fn multipart(content_type: &str, children: Vec<BodyPart>) -> BodyPart {
        BodyPart {
            content_type: content_type.into(),
            filename: None,
            body: PartBody::Multipart(children),
        }
    }

    fn message(root: BodyPart) -> ParsedMessage {
        ParsedMessage {
            headers: Default::default(),
            root,
        }
    }

    #[test]
    fn single_part_is_the_body() {
        let msg = message(leaf("text/plain", Some("ignored.txt"), "plain body"));
        let content = extract(&msg);
        assert_eq!(content.body, "plain body");
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn alternative_children_are_preferred() {
        let msg = message(multipart(
            "multipart/mixed",
            vec![
                leaf("text/plain", None, "top-level text"),
                multipart(
                    "multipart/alternative",
                    vec![
                        leaf("text/html", None, "<p>html</p>"),
                        leaf("text/plain", None, "alt text"),
                    ],
                ),
            ],
        ));
        assert_eq!(extract(&msg).body, "<p>html</p>");
    }

    #[test]
    fn first_unnamed_text_part_wins() {
        let msg = message(multipart(
            "multipart/mixed",
            vec![
                leaf("text/plain", Some("notes.txt"), "attached notes"),
                leaf("image/png", None, "png"),
                leaf("text/plain", None, "the body"),
                leaf("text/html", None, "<p>later</p>"),
            ],
        ));
        let content = extract(&msg);
        assert_eq!(content.body, "the body");
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.attachments[0].filename, "notes.txt");
    }

    #[test]
    fn no_text_part_gives_empty_body() {
        let msg = message(multipart(
            "multipart/mixed",
            vec![leaf("image/png", Some("a.png"), "png")],
        ));
        let content = extract(&msg);
        assert_eq!(content.body, "");
        assert_eq!(content.attachments.len(), 1);
    }

    #[test]
    fn nested_attachments_keep_appearance_order() {
        let msg = message(multipart(
            "multipart/mixed",
            vec![
                leaf("text/plain", None, "body"),
                leaf("image/png", Some("first.png"), "1"),
                multipart(
                    "multipart/related",
                    vec![
                        leaf("text/html", None, "<img>"),
                        leaf("image/gif", Some("second.gif"), "2"),
                    ],
                ),
                leaf("application/pdf", Some("third.pdf"), "3"),
            ],
        ));
        let names: Vec<_> = extract(&msg)
            .attachments
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(names, vec!["first.png", "second.gif", "third.pdf"]);
    }

    #[test]
    fn alternative_pair_with_attachment_from_raw_mime() {
        let raw = concat!(
            "From: Editor <editor@example.com>\r\n",
            "Subject: Trip report\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"mixed\"\r\n",
            "\r\n",
            "--mixed\r\n",
            "Content-Type: multipart/alternative; boundary=\"alt\"\r\n",
            "\r\n",
            "--alt\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "We went hiking.\r\n",
            "--alt\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>We went hiking.</p>\r\n",
            "--alt--\r\n",
            "--mixed\r\n",
            "Content-Type: image/jpeg\r\n",
            "Content-Disposition: attachment; filename=\"summit.jpg\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "/9j/4AAQ\r\n",
            "--mixed--\r\n",
        );
        let content = extract(&parse(raw.as_bytes()));
        assert_eq!(content.body.trim_end(), "We went hiking.");
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.attachments[0].filename, "summit.jpg");
        assert_eq!(content.attachments[0].data, vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10]);
    }
}

//! Message parsing
//!
//! Turns raw RFC 5322 bytes into a [`ParsedMessage`] with `mailparse`:
//! ordered headers, the first text and HTML bodies, an optional text
//! rendering of the HTML body, and every other leaf part as an
//! attachment in MIME order.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use serde::Serialize;
use std::collections::BTreeMap;

/// Options for [`parse_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    /// Render the HTML body as plain text into `html_as_text`.
    pub html_to_text: bool,
    /// Line width used for that rendering.
    pub text_width: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            html_to_text: true,
            text_width: 80,
        }
    }
}

/// Message headers in wire order.
///
/// Lookups are case-insensitive; repeated headers keep every value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// First value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of header `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The three renderings of a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Body {
    pub text: Option<String>,
    pub html: Option<String>,
    pub html_as_text: Option<String>,
}

/// A single attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    /// Sent with an explicit `Content-Disposition: inline`.
    pub inline: bool,
    /// Decoded size in bytes. Kept even when `content` was handed off
    /// to the attachment sink.
    pub size: usize,
    #[serde(skip_serializing)]
    pub content: Vec<u8>,
}

/// A fully parsed message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedMessage {
    pub headers: Headers,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub message_id: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub html_as_text: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl ParsedMessage {
    #[must_use]
    pub fn body(&self) -> Body {
        Body {
            text: self.text.clone(),
            html: self.html.clone(),
            html_as_text: self.html_as_text.clone(),
        }
    }
}

/// Parse a raw message.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the MIME structure cannot be parsed or
/// an attachment body cannot be decoded.
pub fn parse_message(raw: &[u8], options: &ParserOptions) -> Result<ParsedMessage> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| Error::Parse(format!("failed to parse RFC 5322 message: {e}")))?;

    let headers: Headers = parsed
        .headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect();

    let mut message = ParsedMessage {
        subject: headers.get("Subject").map(str::to_string),
        from: headers.get("From").map(str::to_string),
        to: headers.get("To").map(str::to_string),
        message_id: headers.get("Message-ID").map(str::to_string),
        date: headers
            .get("Date")
            .and_then(|d| mailparse::dateparse(d).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        headers,
        ..ParsedMessage::default()
    };

    walk_parts(&parsed, &mut message)?;

    if options.html_to_text
        && let Some(html) = &message.html
    {
        message.html_as_text = html2text::from_read(html.as_bytes(), options.text_width).ok();
    }

    Ok(message)
}

fn walk_parts(part: &ParsedMail<'_>, message: &mut ParsedMessage) -> Result<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, message)?;
        }
        return Ok(());
    }

    let ctype = part.ctype.mimetype.to_ascii_lowercase();
    let disposition = part.get_content_disposition();
    let filename = attachment_filename(part, &disposition.params);
    let explicit = disposition.disposition == DispositionType::Attachment || filename.is_some();

    // The first unnamed text/plain and text/html leaves are the bodies.
    // Every other leaf is an attachment.
    if !explicit {
        let slot = match ctype.as_str() {
            "text/plain" => Some(&mut message.text),
            "text/html" => Some(&mut message.html),
            _ => None,
        };
        if let Some(slot) = slot.filter(|slot| slot.is_none())
            && let Ok(body) = part.get_body()
        {
            *slot = Some(body);
            return Ok(());
        }
    }

    let content = part
        .get_body_raw()
        .map_err(|e| Error::Parse(format!("failed decoding attachment body: {e}")))?;
    let filename =
        filename.unwrap_or_else(|| format!("attachment-{}", message.attachments.len() + 1));
    message.attachments.push(Attachment {
        filename,
        content_type: ctype,
        content_id: part.headers.get_first_value("Content-ID"),
        inline: disposition.disposition == DispositionType::Inline
            && part.headers.get_first_header("Content-Disposition").is_some(),
        size: content.len(),
        content,
    });
    Ok(())
}

/// Content-Disposition `filename` first, then the Content-Type `name`.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disp_params: &BTreeMap<String, String>,
) -> Option<String> {
    disp_params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .filter(|name| !name.trim().is_empty())
        .cloned()
}

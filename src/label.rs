//! Post-processing labels
//!
//! Labels applied to a message after the consumer handled it. On plain
//! IMAP servers they are stored as flags (system flags or keywords);
//! on Gmail they can be stored as real labels through `X-GM-LABELS`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How labels are written to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelMode {
    /// `UID STORE +FLAGS (...)`, understood by every IMAP server.
    #[default]
    Keywords,
    /// `UID STORE +X-GM-LABELS (...)`, Gmail only.
    Gmail,
}

/// A label applied to a message.
///
/// System flags (prefixed with `\` on the wire) have dedicated
/// variants. Anything else is a [`Label::Keyword`].
///
/// # Examples
///
/// ```
/// use mail_listener::Label;
///
/// assert_eq!(Label::from("\\flagged"), Label::Flagged);
/// assert_eq!(Label::from("processed").as_imap_str(), "processed");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    /// A user-defined keyword or Gmail label name.
    Keyword(String),
}

impl Label {
    /// The IMAP wire representation of this label.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Keyword(kw) => kw,
        }
    }

    /// Parse a comma-separated label list, skipping blank entries.
    #[must_use]
    pub fn parse_list(value: &str) -> Vec<Self> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::from)
            .collect()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        let Some(name) = s.strip_prefix('\\') else {
            return Self::Keyword(s.to_string());
        };
        match name.to_ascii_lowercase().as_str() {
            "seen" => Self::Seen,
            "answered" => Self::Answered,
            "flagged" => Self::Flagged,
            "deleted" => Self::Deleted,
            "draft" => Self::Draft,
            _ => Self::Keyword(s.to_string()),
        }
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

/// Build the `UID STORE` data item that adds `labels`.
///
/// Returns `None` when there is nothing to store.
#[must_use]
pub fn store_query(labels: &[Label], mode: LabelMode) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    let items: Vec<String> = match mode {
        LabelMode::Keywords => labels.iter().map(|l| l.as_imap_str().to_string()).collect(),
        LabelMode::Gmail => labels.iter().map(|l| quote_label(l.as_imap_str())).collect(),
    };
    let attribute = match mode {
        LabelMode::Keywords => "+FLAGS",
        LabelMode::Gmail => "+X-GM-LABELS",
    };
    Some(format!("{attribute} ({})", items.join(" ")))
}

fn quote_label(name: &str) -> String {
    if name.starts_with('\\') || !name.contains([' ', '"', '(', ')']) {
        return name.to_string();
    }
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

//! Application-facing events and connection state

use crate::error::Error;
use crate::parser::{Attachment, Body, Headers, ParsedMessage};
use crate::session::MailboxInfo;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Everything a [`MailListener`](crate::MailListener) reports.
///
/// For a single message the order is always `Mail`, `Headers`, `Body`,
/// then one `Attachment` per attachment in MIME order. Events of
/// different messages may interleave.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ListenerEvent {
    /// Session is up and the mailbox is open.
    #[serde(rename = "server:connected")]
    Connected,
    #[serde(rename = "server:disconnected")]
    Disconnected,
    #[serde(rename = "server:destroying")]
    Destroying,
    #[serde(rename = "server:ending")]
    Ending,
    #[serde(rename = "mailbox")]
    Mailbox { info: MailboxInfo },
    #[serde(rename = "mail")]
    Mail {
        seqno: u32,
        uid: u32,
        message: Arc<ParsedMessage>,
    },
    #[serde(rename = "headers")]
    Headers { seqno: u32, headers: Headers },
    #[serde(rename = "body")]
    Body { seqno: u32, body: Body },
    /// `path` is `None` when attachments are not persisted or the
    /// write failed.
    #[serde(rename = "attachment")]
    Attachment {
        attachment: Attachment,
        path: Option<String>,
        seqno: u32,
        uid: u32,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(serialize_with = "serialize_error")]
        error: Error,
    },
}

impl ListenerEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "server:connected",
            Self::Disconnected => "server:disconnected",
            Self::Destroying => "server:destroying",
            Self::Ending => "server:ending",
            Self::Mailbox { .. } => "mailbox",
            Self::Mail { .. } => "mail",
            Self::Headers { .. } => "headers",
            Self::Body { .. } => "body",
            Self::Attachment { .. } => "attachment",
            Self::Error { .. } => "error",
        }
    }

    /// Sequence number of the message this event belongs to.
    #[must_use]
    pub const fn seqno(&self) -> Option<u32> {
        match self {
            Self::Mail { seqno, .. }
            | Self::Headers { seqno, .. }
            | Self::Body { seqno, .. }
            | Self::Attachment { seqno, .. } => Some(*seqno),
            _ => None,
        }
    }
}

fn serialize_error<S: Serializer>(error: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    let mut state = serializer.serialize_struct("Error", 2)?;
    state.serialize_field("kind", &error.kind())?;
    state.serialize_field("message", &error.to_string())?;
    state.end()
}

/// Lifecycle state of a listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    /// Authenticated; the mailbox is not (yet) open.
    Ready,
    /// Mailbox open and waiting for changes.
    Watching,
    Closed,
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Watching => "watching",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

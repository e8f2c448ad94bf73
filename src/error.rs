//! Error types for mail-listener
//!
//! Every failure the listener reports travels over the single `error`
//! event channel, so each variant carries an [`ErrorKind`] tag that
//! consumers can match on without string inspection.

use serde::Serialize;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors are cheap to clone so a single failure can be both reported
/// on the event channel and returned to the caller.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Failed to open mailbox {mailbox}: {reason}")]
    MailboxOpen { mailbox: String, reason: String },

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Email parsing error: {0}")]
    Parse(String),

    #[error("Failed to write attachment to {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Post-processing action failed: {0}")]
    Action(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Coarse classification of an [`Error`], one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Transport, TLS or authentication failure on the session.
    Connection,
    /// The target mailbox could not be opened.
    MailboxOpen,
    /// The search filter was rejected or the search round-trip failed.
    Search,
    /// A single message (or a batch) could not be retrieved.
    Fetch,
    /// A fetched message could not be parsed.
    Parse,
    /// An attachment could not be written to disk.
    Persistence,
    /// Label, move or mailbox-creation failure.
    Action,
    /// Invalid configuration.
    Config,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::MailboxOpen => "mailbox-open",
            Self::Search => "search",
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Persistence => "persistence",
            Self::Action => "action",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// The taxonomy tag for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::Tls(_) | Self::Io(_) => ErrorKind::Connection,
            Self::MailboxOpen { .. } => ErrorKind::MailboxOpen,
            Self::Search(_) => ErrorKind::Search,
            Self::Fetch(_) => ErrorKind::Fetch,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Action(_) => ErrorKind::Action,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

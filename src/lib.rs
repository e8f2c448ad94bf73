//! IMAP mailbox listener
//!
//! Keeps a connection to an IMAP mailbox open, waits for new mail with
//! `IDLE` (or `NOOP` polling), and turns every message matching a search
//! filter into typed [`ListenerEvent`]s: the parsed mail, its headers,
//! its body and each attachment. Attachments can be written to disk as
//! they arrive. After handling a message, consumers can label it or
//! move it to a processed mailbox.
//!
//! The protocol client is abstracted behind [`MailSession`];
//! [`ImapConnection`] is the production implementation over
//! `async-imap` with rustls.

mod actions;
mod attachment;
mod config;
mod connection;
mod discovery;
mod error;
mod event;
mod imap;
mod label;
mod listener;
mod parser;
mod session;

pub use attachment::{AttachmentSink, FsAttachmentSink, attachment_path};
pub use config::{
    AttachmentOptions, Credentials, DEFAULT_FETCH_CONCURRENCY, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_POLL_INTERVAL_SECS, ImapConfig, ListenerConfig, SearchFilter, TlsMode,
};
pub use error::{Error, ErrorKind, Result};
pub use event::{ConnectionState, ListenerEvent};
pub use imap::ImapConnection;
pub use label::{Label, LabelMode};
pub use listener::MailListener;
pub use parser::{Attachment, Body, Headers, ParsedMessage, ParserOptions, parse_message};
pub use session::{FetchedMessage, MailSession, MailboxInfo, MailboxStatus, Notification};

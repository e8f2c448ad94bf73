//! Mail store session capability
//!
//! [`MailSession`] is everything the listener needs from a protocol
//! client. [`ImapConnection`](crate::ImapConnection) implements it over
//! IMAP; tests implement it in memory.
//!
//! Every operation returns the error kind of its own step: `connect`
//! yields connection errors, `open_box` mailbox-open errors, `search`
//! search errors, `fetch` fetch errors, and the post-processing calls
//! action errors.

use crate::config::SearchFilter;
use crate::error::Result;
use crate::label::Label;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Notify;

/// Metadata of an opened mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailboxInfo {
    pub name: String,
    pub read_only: bool,
    pub exists: u32,
    pub recent: u32,
    /// Sequence number of the first unseen message, if reported.
    pub unseen: Option<u32>,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    pub flags: Vec<String>,
    pub permanent_flags: Vec<String>,
}

/// Result of a `STATUS` query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailboxStatus {
    pub name: String,
    pub messages: u32,
    pub unseen: Option<u32>,
}

/// Raw message as returned by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Session-local position in the open mailbox.
    pub seqno: u32,
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// Outcome of waiting for mailbox activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// New messages arrived; `exists` is the new message count.
    NewMail { exists: u32 },
    /// Something else in the mailbox changed (flags, expunges).
    Changed,
    /// Nothing happened before the timeout.
    Timeout,
    /// The wait was cut short through the interrupt handle.
    Interrupted,
    /// The server closed the connection.
    Closed,
}

#[async_trait]
pub trait MailSession: Send {
    /// Open the transport and authenticate.
    async fn connect(&mut self) -> Result<()>;

    /// Select `mailbox`; read-write unless `read_only`.
    async fn open_box(&mut self, mailbox: &str, read_only: bool) -> Result<MailboxInfo>;

    /// UIDs of messages matching `filter`, ascending.
    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<u32>>;

    /// Fetch the full message `uid`, flagging it `\Seen` if `mark_seen`.
    async fn fetch(&mut self, uid: u32, mark_seen: bool) -> Result<FetchedMessage>;

    async fn add_labels(&mut self, uid: u32, labels: &[Label]) -> Result<()>;

    async fn move_message(&mut self, uid: u32, mailbox: &str) -> Result<()>;

    /// `None` when the mailbox does not exist.
    async fn status(&mut self, mailbox: &str) -> Result<Option<MailboxStatus>>;

    async fn add_box(&mut self, mailbox: &str) -> Result<()>;

    /// Block until the open mailbox changes, `timeout` elapses, or
    /// `interrupt` is notified.
    async fn wait_for_change(
        &mut self,
        timeout: Duration,
        interrupt: &Notify,
    ) -> Result<Notification>;

    /// Log out gracefully.
    async fn end(&mut self) -> Result<()>;

    /// Drop the transport without a protocol goodbye.
    async fn destroy(&mut self);

    fn is_connected(&self) -> bool;
}

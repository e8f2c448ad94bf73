//! IMAP implementation of [`MailSession`]
//!
//! Wraps one authenticated async-imap session. Mailbox change detection
//! uses `IDLE` when the server advertises it and falls back to `NOOP`
//! polling otherwise. Moves use `MOVE` when available and
//! `COPY` + `\Deleted` + `EXPUNGE` otherwise.

use crate::config::{ImapConfig, ListenerConfig, SearchFilter};
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use crate::label::{self, Label};
use crate::session::{FetchedMessage, MailSession, MailboxInfo, MailboxStatus, Notification};
use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response};
use async_imap::types::{Flag, UnsolicitedResponse};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

/// A live IMAP connection.
pub struct ImapConnection {
    config: ImapConfig,
    session: Option<ImapSession>,
    supports_idle: bool,
    supports_move: bool,
    poll_interval: Duration,
    /// Last known message count of the open mailbox.
    exists: u32,
    /// Change seen in unsolicited responses, not yet reported.
    pending: Option<Notification>,
}

impl ImapConnection {
    #[must_use]
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: None,
            supports_idle: false,
            supports_move: false,
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
            exists: 0,
            pending: None,
        }
    }

    /// Connection settings taken from a listener configuration.
    #[must_use]
    pub fn for_listener(config: &ListenerConfig) -> Self {
        Self::new(config.imap.clone()).with_poll_interval(config.poll_interval)
    }

    /// How often to `NOOP` when the server lacks `IDLE`.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Connection("Not connected".into()))
    }

    fn log_command(&self, command: &str) {
        if self.config.debug {
            info!(host = %self.config.host, "> {command}");
        } else {
            trace!(host = %self.config.host, "> {command}");
        }
    }

    /// Fold queued unsolicited responses into `pending`.
    fn absorb_unsolicited(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        while let Ok(response) = session.unsolicited_responses.try_recv() {
            match response {
                UnsolicitedResponse::Exists(exists) => {
                    if exists > self.exists {
                        self.pending = Some(Notification::NewMail { exists });
                    } else if exists != self.exists && self.pending.is_none() {
                        self.pending = Some(Notification::Changed);
                    }
                    self.exists = exists;
                }
                UnsolicitedResponse::Expunge(_) => {
                    self.exists = self.exists.saturating_sub(1);
                    self.pending.get_or_insert(Notification::Changed);
                }
                _ => {}
            }
        }
    }

    async fn idle(&mut self, timeout: Duration, interrupt: &Notify) -> Result<Notification> {
        self.log_command("IDLE");
        let session = self
            .session
            .take()
            .ok_or_else(|| Error::Connection("Not connected".into()))?;

        let mut handle = session.idle();
        if let Err(e) = handle.init().await {
            if let Ok(session) = handle.done().await {
                self.session = Some(session);
            }
            return Err(Error::Connection(format!("IDLE failed: {e}")));
        }

        let response = {
            let (wait, stop) = handle.wait_with_timeout(timeout);
            tokio::pin!(wait);
            tokio::select! {
                response = &mut wait => response,
                () = interrupt.notified() => {
                    drop(stop);
                    wait.await
                }
            }
        };

        self.log_command("DONE");
        let session = match handle.done().await {
            Ok(session) => session,
            Err(e) => {
                warn!("IDLE session lost: {e}");
                return Ok(Notification::Closed);
            }
        };
        self.session = Some(session);

        match response {
            Ok(IdleResponse::NewData(data)) => {
                if let Response::MailboxData(MailboxDatum::Exists(exists)) = data.parsed() {
                    self.exists = *exists;
                    Ok(Notification::NewMail { exists: *exists })
                } else {
                    Ok(Notification::Changed)
                }
            }
            Ok(IdleResponse::Timeout) => Ok(Notification::Timeout),
            Ok(IdleResponse::ManualInterrupt) => Ok(Notification::Interrupted),
            Err(e) => Err(Error::Connection(format!("IDLE wait failed: {e}"))),
        }
    }

    async fn poll(&mut self, wait: Duration, interrupt: &Notify) -> Result<Notification> {
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = interrupt.notified() => return Ok(Notification::Interrupted),
        }

        self.log_command("NOOP");
        let session = self.session()?;
        if let Err(e) = session.noop().await {
            if matches!(
                e,
                async_imap::error::Error::ConnectionLost | async_imap::error::Error::Io(_)
            ) {
                warn!("Connection lost during NOOP: {e}");
                self.session = None;
                return Ok(Notification::Closed);
            }
            return Err(Error::Connection(format!("NOOP failed: {e}")));
        }

        self.absorb_unsolicited();
        Ok(self.pending.take().unwrap_or(Notification::Timeout))
    }
}

#[async_trait]
impl MailSession for ImapConnection {
    async fn connect(&mut self) -> Result<()> {
        self.log_command("CONNECT");
        let mut session = connection::connect(&self.config).await?;

        let capabilities = session
            .capabilities()
            .await
            .map_err(|e| Error::Connection(format!("CAPABILITY failed: {e}")))?;
        self.supports_idle = capabilities.has_str("IDLE");
        self.supports_move = capabilities.has_str("MOVE");
        debug!(
            idle = self.supports_idle,
            supports_move = self.supports_move,
            "Server capabilities"
        );

        self.session = Some(session);
        self.exists = 0;
        self.pending = None;
        Ok(())
    }

    async fn open_box(&mut self, mailbox: &str, read_only: bool) -> Result<MailboxInfo> {
        self.log_command(&format!(
            "{} {mailbox}",
            if read_only { "EXAMINE" } else { "SELECT" }
        ));
        let session = self.session()?;
        let result = if read_only {
            session.examine(mailbox).await
        } else {
            session.select(mailbox).await
        };
        let selected = result.map_err(|e| Error::MailboxOpen {
            mailbox: mailbox.to_string(),
            reason: e.to_string(),
        })?;

        self.exists = selected.exists;
        self.pending = None;
        info!(mailbox, exists = selected.exists, "Mailbox opened");

        Ok(MailboxInfo {
            name: mailbox.to_string(),
            read_only,
            exists: selected.exists,
            recent: selected.recent,
            unseen: selected.unseen,
            uid_validity: selected.uid_validity,
            uid_next: selected.uid_next,
            flags: selected.flags.iter().map(flag_name).collect(),
            permanent_flags: selected.permanent_flags.iter().map(flag_name).collect(),
        })
    }

    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<u32>> {
        let query = filter.to_query();
        self.log_command(&format!("UID SEARCH {query}"));
        let uids = self
            .session()?
            .uid_search(&query)
            .await
            .map_err(|e| Error::Search(format!("'{query}': {e}")))?;

        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable();
        debug!("Found {} messages matching '{}'", uid_list.len(), query);
        Ok(uid_list)
    }

    async fn fetch(&mut self, uid: u32, mark_seen: bool) -> Result<FetchedMessage> {
        let items = if mark_seen {
            "(UID BODY[])"
        } else {
            "(UID BODY.PEEK[])"
        };
        self.log_command(&format!("UID FETCH {uid} {items}"));

        let session = self.session()?;
        let mut messages = session
            .uid_fetch(uid.to_string(), items)
            .await
            .map_err(|e| Error::Fetch(format!("UID {uid}: {e}")))?;

        let mut found = None;
        while let Some(item) = messages.next().await {
            let msg = item.map_err(|e| Error::Fetch(format!("UID {uid}: {e}")))?;
            if found.is_none()
                && let Some(body) = msg.body()
            {
                found = Some(FetchedMessage {
                    seqno: msg.message,
                    uid: msg.uid.unwrap_or(uid),
                    raw: body.to_vec(),
                });
            }
        }
        drop(messages);

        found.ok_or_else(|| Error::Fetch(format!("No body returned for UID {uid}")))
    }

    async fn add_labels(&mut self, uid: u32, labels: &[Label]) -> Result<()> {
        let Some(query) = label::store_query(labels, self.config.label_mode) else {
            return Ok(());
        };
        self.log_command(&format!("UID STORE {uid} {query}"));

        let updates = self
            .session()?
            .uid_store(uid.to_string(), &query)
            .await
            .map_err(|e| Error::Action(format!("Labeling UID {uid} failed: {e}")))?;
        let _: Vec<_> = updates
            .try_collect()
            .await
            .map_err(|e| Error::Action(format!("Labeling UID {uid} failed: {e}")))?;
        Ok(())
    }

    async fn move_message(&mut self, uid: u32, mailbox: &str) -> Result<()> {
        let uid_set = uid.to_string();

        if self.supports_move {
            self.log_command(&format!("UID MOVE {uid} {mailbox}"));
            self.session()?
                .uid_mv(&uid_set, mailbox)
                .await
                .map_err(|e| Error::Action(format!("Move of UID {uid} to {mailbox} failed: {e}")))?;
            // The server's EXPUNGE for the moved message arrives as an
            // unsolicited response and adjusts `exists` there.
            return Ok(());
        }

        self.log_command(&format!("UID COPY {uid} {mailbox}"));
        let session = self.session()?;
        session
            .uid_copy(&uid_set, mailbox)
            .await
            .map_err(|e| Error::Action(format!("Copy of UID {uid} to {mailbox} failed: {e}")))?;

        let updates = session
            .uid_store(&uid_set, "+FLAGS.SILENT (\\Deleted)")
            .await
            .map_err(|e| Error::Action(format!("Flagging UID {uid} deleted failed: {e}")))?;
        let _: Vec<_> = updates
            .try_collect()
            .await
            .map_err(|e| Error::Action(format!("Flagging UID {uid} deleted failed: {e}")))?;

        let expunged = session
            .expunge()
            .await
            .map_err(|e| Error::Action(format!("Expunge after moving UID {uid} failed: {e}")))?;
        let expunged: Vec<u32> = expunged
            .try_collect()
            .await
            .map_err(|e| Error::Action(format!("Expunge after moving UID {uid} failed: {e}")))?;

        self.exists = self.exists.saturating_sub(u32::try_from(expunged.len()).unwrap_or(u32::MAX));
        Ok(())
    }

    async fn status(&mut self, mailbox: &str) -> Result<Option<MailboxStatus>> {
        self.log_command(&format!("STATUS {mailbox} (MESSAGES UNSEEN)"));
        match self.session()?.status(mailbox, "(MESSAGES UNSEEN)").await {
            Ok(status) => Ok(Some(MailboxStatus {
                name: mailbox.to_string(),
                messages: status.exists,
                unseen: status.unseen,
            })),
            Err(async_imap::error::Error::No(reason)) => {
                debug!(mailbox, %reason, "STATUS refused, treating mailbox as absent");
                Ok(None)
            }
            Err(e) => Err(Error::Action(format!("STATUS {mailbox} failed: {e}"))),
        }
    }

    async fn add_box(&mut self, mailbox: &str) -> Result<()> {
        self.log_command(&format!("CREATE {mailbox}"));
        self.session()?
            .create(mailbox)
            .await
            .map_err(|e| Error::Action(format!("CREATE {mailbox} failed: {e}")))?;
        info!(mailbox, "Mailbox created");
        Ok(())
    }

    async fn wait_for_change(
        &mut self,
        timeout: Duration,
        interrupt: &Notify,
    ) -> Result<Notification> {
        self.absorb_unsolicited();
        if let Some(notification) = self.pending.take() {
            return Ok(notification);
        }
        if self.supports_idle {
            self.idle(timeout, interrupt).await
        } else {
            self.poll(timeout.min(self.poll_interval), interrupt).await
        }
    }

    async fn end(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        self.log_command("LOGOUT");
        session
            .logout()
            .await
            .map_err(|e| Error::Connection(format!("LOGOUT failed: {e}")))
    }

    async fn destroy(&mut self) {
        if self.session.take().is_some() {
            debug!(host = %self.config.host, "Connection dropped");
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

fn flag_name(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(name) => name.to_string(),
    }
}

//! Post-processing actions on delivered messages
//!
//! Errors are emitted as `error` events and returned to the caller,
//! always tagged [`ErrorKind::Action`](crate::ErrorKind::Action).

use crate::error::{Error, Result};
use crate::listener::MailListener;
use crate::session::MailSession;
use tracing::{debug, info, warn};

fn into_action_error(error: Error) -> Error {
    match error {
        Error::Action(_) => error,
        other => Error::Action(other.to_string()),
    }
}

impl<S: MailSession + 'static> MailListener<S> {
    /// Apply the success or failure label set to message `uid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Action`] if the server rejects the labels.
    pub async fn add_label(&self, uid: u32, success: bool) -> Result<()> {
        let config = self.config();
        let labels = if success {
            &config.labels_on_success
        } else {
            &config.labels_on_failure
        };
        if labels.is_empty() {
            debug!(uid, success, "No labels configured");
            return Ok(());
        }

        let result = {
            let mut session = self.inner.lock_session().await;
            session.add_labels(uid, labels).await
        };
        match result {
            Ok(()) => {
                info!(uid, success, "Labels applied");
                Ok(())
            }
            Err(e) => {
                let e = into_action_error(e);
                warn!(uid, "Labeling failed: {e}");
                self.inner.emit_error(e.clone());
                Err(e)
            }
        }
    }

    /// Move message `uid` to the processed mailbox, creating the mailbox
    /// first if it does not exist.
    ///
    /// A failed creation is emitted but the move is still attempted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Action`] if the move fails.
    pub async fn move_to_processed_mailbox(&self, uid: u32) -> Result<()> {
        let target = &self.config().processed_mailbox;
        let mut session = self.inner.lock_session().await;

        let exists = match session.status(target).await {
            Ok(status) => status.is_some(),
            Err(e) => {
                warn!(mailbox = %target, "STATUS failed, assuming mailbox is missing: {e}");
                false
            }
        };
        if !exists {
            info!(mailbox = %target, "Creating processed mailbox");
            if let Err(e) = session.add_box(target).await {
                let e = into_action_error(e);
                warn!(mailbox = %target, "Mailbox creation failed: {e}");
                self.inner.emit_error(e);
            }
        }

        match session.move_message(uid, target).await {
            Ok(()) => {
                info!(uid, mailbox = %target, "Message moved");
                Ok(())
            }
            Err(e) => {
                let e = into_action_error(e);
                warn!(uid, mailbox = %target, "Move failed: {e}");
                self.inner.emit_error(e.clone());
                Err(e)
            }
        }
    }
}

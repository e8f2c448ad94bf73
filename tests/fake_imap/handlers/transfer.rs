//! UID COPY and UID MOVE command handler.
//!
//! Both append the messages to another folder under fresh UIDs. MOVE
//! (RFC 6851) also removes them from the selected folder and reports
//! each removal as `* N EXPUNGE` before completing:
//!
//! ```text
//!   Client:  A0007 UID MOVE 4 Processed
//!   Server:  * 2 EXPUNGE
//!   Server:  A0007 OK MOVE completed
//! ```
//!
//! A missing destination is refused with `NO [TRYCREATE]`.

use super::{Selected, require_selected, require_writable, uids_in};
use crate::fake_imap::io::{reply, write_line};
use crate::fake_imap::mailbox::{Mailbox, TransferError};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Copy,
    Move,
}

impl Transfer {
    const fn command(self) -> &'static str {
        match self {
            Self::Copy => "COPY",
            Self::Move => "MOVE",
        }
    }
}

/// Handle UID COPY / UID MOVE. `known` is the message count the
/// session last reported and drops with every EXPUNGE sent.
#[allow(clippy::too_many_arguments)]
pub async fn handle_uid_transfer<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    transfer: Transfer,
    sequence_set: &SequenceSet,
    dest: &str,
    mailbox: &Mutex<Mailbox>,
    selected: Option<&Selected>,
    known: &mut usize,
    stream: &mut BufReader<S>,
) {
    let selected = match transfer {
        Transfer::Copy => require_selected(tag, selected, stream).await,
        Transfer::Move => require_writable(tag, selected, stream).await,
    };
    let Some(selected) = selected else {
        return;
    };

    let result = {
        let mut mb = mailbox.lock().unwrap();
        let max_uid = mb
            .get_folder(&selected.name)
            .map_or(0, |f| f.uid_next().saturating_sub(1));
        let uids = uids_in(sequence_set, max_uid);
        mb.transfer(&selected.name, dest, &uids, transfer == Transfer::Move)
    };

    match result {
        Ok(expunged) => {
            for seq in expunged {
                if write_line(stream, &format!("* {seq} EXPUNGE\r\n")).await.is_err() {
                    return;
                }
                *known = known.saturating_sub(1);
            }
            let _ = reply(stream, tag, &format!("OK {} completed", transfer.command())).await;
        }
        Err(TransferError::NoDestination) => {
            let _ = reply(stream, tag, "NO [TRYCREATE] Destination mailbox does not exist").await;
        }
        Err(TransferError::NoSource) => {
            let _ = reply(stream, tag, "NO Mailbox has been deleted").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::uid_set;
    use crate::fake_imap::io::transcript;
    use crate::fake_imap::mailbox::MailboxBuilder;

    fn mailbox() -> Mutex<Mailbox> {
        let raw = b"Subject: Test\r\n\r\nBody";
        Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, raw)
                .email(4, false, raw)
                .folder("Processed")
                .email(9, true, raw)
                .build(),
        )
    }

    async fn run(
        transfer: Transfer,
        dest: &str,
        mailbox: &Mutex<Mailbox>,
        selected: &Selected,
        known: &mut usize,
    ) -> String {
        let set = uid_set(&[4]);
        transcript(|mut s| async move {
            handle_uid_transfer(
                "A1",
                transfer,
                &set,
                dest,
                mailbox,
                Some(selected),
                known,
                &mut s,
            )
            .await;
        })
        .await
    }

    fn uids(mailbox: &Mutex<Mailbox>, folder: &str) -> Vec<u32> {
        let mb = mailbox.lock().unwrap();
        mb.get_folder(folder).unwrap().emails.iter().map(|e| e.uid).collect()
    }

    #[tokio::test]
    async fn copy_keeps_source() {
        let mailbox = mailbox();
        let mut known = 2;

        let inbox = Selected::read_write("INBOX");
        let output = run(Transfer::Copy, "Processed", &mailbox, &inbox, &mut known).await;

        assert_eq!(output, "A1 OK COPY completed\r\n");
        assert_eq!(uids(&mailbox, "INBOX"), [1, 4]);
        assert_eq!(uids(&mailbox, "Processed"), [9, 10]);
        assert_eq!(known, 2);
    }

    #[tokio::test]
    async fn move_reports_expunge() {
        let mailbox = mailbox();
        let mut known = 2;

        let inbox = Selected::read_write("INBOX");
        let output = run(Transfer::Move, "Processed", &mailbox, &inbox, &mut known).await;

        assert_eq!(output, "* 2 EXPUNGE\r\nA1 OK MOVE completed\r\n");
        assert_eq!(uids(&mailbox, "INBOX"), [1]);
        assert_eq!(uids(&mailbox, "Processed"), [9, 10]);
        assert_eq!(known, 1);
    }

    #[tokio::test]
    async fn missing_destination_asks_to_create() {
        let mailbox = mailbox();
        let mut known = 2;

        let inbox = Selected::read_write("INBOX");
        let output = run(Transfer::Move, "Archive", &mailbox, &inbox, &mut known).await;

        assert_eq!(output, "A1 NO [TRYCREATE] Destination mailbox does not exist\r\n");
        assert_eq!(uids(&mailbox, "INBOX"), [1, 4]);
    }

    #[tokio::test]
    async fn move_out_of_examined_folder_is_refused() {
        let mailbox = mailbox();
        let mut known = 2;
        let examined = Selected {
            name: "INBOX".into(),
            read_only: true,
        };

        let output = run(Transfer::Move, "Processed", &mailbox, &examined, &mut known).await;

        assert_eq!(output, "A1 NO Mailbox is read-only\r\n");
        assert_eq!(uids(&mailbox, "INBOX"), [1, 4]);
    }
}

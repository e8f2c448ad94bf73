//! UID STORE command handler.
//!
//! `+FLAGS`, `-FLAGS` and `FLAGS` map onto [`FlagUpdate`]. Each
//! touched message is echoed as `* N FETCH (UID u FLAGS (...))`
//! unless the client asked for `.SILENT`. This is how a listener
//! labels messages and how the COPY fallback of a move marks the
//! original `\Deleted`.

use super::{Selected, require_writable, uids_in};
use crate::fake_imap::io::{reply, write_line};
use crate::fake_imap::mailbox::{FlagUpdate, Mailbox};
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Parsed STORE command arguments.
pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

/// Wire form of a flag. Extension flags are not stored.
fn wire_name(flag: &Flag<'_>) -> Option<String> {
    let name = match flag {
        Flag::Seen => "\\Seen",
        Flag::Deleted => "\\Deleted",
        Flag::Answered => "\\Answered",
        Flag::Flagged => "\\Flagged",
        Flag::Draft => "\\Draft",
        Flag::Keyword(atom) => atom.inner(),
        _ => return None,
    };
    Some(name.to_string())
}

/// Handle the UID STORE command.
pub async fn handle_uid_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &StoreArgs<'_>,
    mailbox: &Mutex<Mailbox>,
    selected: Option<&Selected>,
    stream: &mut BufReader<S>,
) {
    let Some(selected) = require_writable(tag, selected, stream).await else {
        return;
    };
    let update = match args.kind {
        StoreType::Add => FlagUpdate::Add,
        StoreType::Remove => FlagUpdate::Remove,
        StoreType::Replace => FlagUpdate::Replace,
    };
    let flags: Vec<String> = args.flags.iter().filter_map(wire_name).collect();

    let updated = {
        let mut mb = mailbox.lock().unwrap();
        mb.get_folder_mut(&selected.name).map(|folder| {
            let uids = uids_in(args.sequence_set, folder.uid_next().saturating_sub(1));
            folder
                .emails
                .iter_mut()
                .enumerate()
                .filter(|(_, e)| uids.contains(&e.uid))
                .map(|(i, email)| {
                    email.update_flags(update, &flags);
                    format!(
                        "* {} FETCH (UID {} FLAGS ({}))\r\n",
                        i + 1,
                        email.uid,
                        email.flags().join(" ")
                    )
                })
                .collect::<Vec<_>>()
        })
    };
    let Some(updated) = updated else {
        let _ = reply(stream, tag, "NO Mailbox has been deleted").await;
        return;
    };

    if !matches!(args.response, StoreResponse::Silent) {
        for line in updated {
            if write_line(stream, &line).await.is_err() {
                return;
            }
        }
    }
    let _ = reply(stream, tag, "OK STORE completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::uid_set;
    use crate::fake_imap::io::transcript;
    use crate::fake_imap::mailbox::MailboxBuilder;

    fn inbox() -> Mutex<Mailbox> {
        let raw = b"Subject: Test\r\n\r\nBody";
        Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, raw)
                .email(2, true, raw)
                .build(),
        )
    }

    async fn store(
        mailbox: &Mutex<Mailbox>,
        selected: &Selected,
        kind: StoreType,
        response: StoreResponse,
        flags: &[Flag<'_>],
    ) -> String {
        let set = uid_set(&[1, 2]);
        let args = StoreArgs {
            sequence_set: &set,
            kind: &kind,
            response: &response,
            flags,
        };
        let args = &args;
        transcript(|mut s| async move {
            handle_uid_store("A1", args, mailbox, Some(selected), &mut s).await;
        })
        .await
    }

    fn flags_of(mailbox: &Mutex<Mailbox>) -> Vec<Vec<String>> {
        let mb = mailbox.lock().unwrap();
        mb.get_folder("INBOX").unwrap().emails.iter().map(|e| e.flags()).collect()
    }

    #[tokio::test]
    async fn add_echoes_new_flags() {
        let mailbox = inbox();
        let processed = Flag::Keyword("processed".try_into().unwrap());

        let output = store(
            &mailbox,
            &Selected::read_write("INBOX"),
            StoreType::Add,
            StoreResponse::Answer,
            &[Flag::Flagged, processed],
        )
        .await;

        assert_eq!(
            output,
            "* 1 FETCH (UID 1 FLAGS (\\Flagged processed))\r\n\
             * 2 FETCH (UID 2 FLAGS (\\Seen \\Flagged processed))\r\n\
             A1 OK STORE completed\r\n"
        );
    }

    #[tokio::test]
    async fn silent_remove_and_replace() {
        let mailbox = inbox();
        let inbox_rw = Selected::read_write("INBOX");

        let output = store(
            &mailbox,
            &inbox_rw,
            StoreType::Remove,
            StoreResponse::Silent,
            &[Flag::Seen],
        )
        .await;
        assert_eq!(output, "A1 OK STORE completed\r\n");
        assert_eq!(flags_of(&mailbox), [Vec::<String>::new(), Vec::new()]);

        store(
            &mailbox,
            &inbox_rw,
            StoreType::Replace,
            StoreResponse::Silent,
            &[Flag::Deleted],
        )
        .await;
        assert_eq!(flags_of(&mailbox), [["\\Deleted"], ["\\Deleted"]]);
    }

    #[tokio::test]
    async fn examined_folder_is_untouched() {
        let mailbox = inbox();
        let examined = Selected {
            name: "INBOX".into(),
            read_only: true,
        };

        let output = store(
            &mailbox,
            &examined,
            StoreType::Add,
            StoreResponse::Answer,
            &[Flag::Seen],
        )
        .await;

        assert_eq!(output, "A1 NO Mailbox is read-only\r\n");
        assert_eq!(flags_of(&mailbox)[0], Vec::<String>::new());
    }
}

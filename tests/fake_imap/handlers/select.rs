//! SELECT and EXAMINE command handler.
//!
//! Both open a folder and report its state; EXAMINE opens it
//! read-only, so the session refuses STORE/EXPUNGE/MOVE and FETCH
//! leaves `\Seen` alone.
//!
//! ```text
//!   Client:  A0004 EXAMINE INBOX
//!   Server:  * FLAGS (\Seen \Answered \Flagged \Deleted \Draft)
//!   Server:  * 2 EXISTS
//!   Server:  * 0 RECENT
//!   Server:  * OK [UIDVALIDITY 1]
//!   Server:  * OK [UIDNEXT 3]
//!   Server:  * OK [PERMANENTFLAGS (\Seen \Deleted \Flagged \*)]
//!   Server:  * OK [UNSEEN 2]
//!   Server:  A0004 OK [READ-ONLY] EXAMINE completed
//! ```

use super::Selected;
use crate::fake_imap::io::{reply, write_line};
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle SELECT (or EXAMINE when `read_only`). Returns the new
/// selection, or `None` if the folder does not exist.
pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    name: &str,
    read_only: bool,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> Option<Selected> {
    let Some(folder) = mailbox.get_folder(name) else {
        let _ = reply(stream, tag, "NO Mailbox does not exist").await;
        return None;
    };

    let mut lines = vec![
        "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)".to_string(),
        format!("* {} EXISTS", folder.emails.len()),
        "* 0 RECENT".to_string(),
        "* OK [UIDVALIDITY 1]".to_string(),
        format!("* OK [UIDNEXT {}]", folder.uid_next()),
        "* OK [PERMANENTFLAGS (\\Seen \\Deleted \\Flagged \\*)]".to_string(),
    ];
    if let Some(first) = folder.emails.iter().position(|e| !e.seen) {
        lines.push(format!("* OK [UNSEEN {}]", first + 1));
    }
    for line in lines {
        if write_line(stream, &format!("{line}\r\n")).await.is_err() {
            return None;
        }
    }

    let status = if read_only {
        "OK [READ-ONLY] EXAMINE completed"
    } else {
        "OK [READ-WRITE] SELECT completed"
    };
    let _ = reply(stream, tag, status).await;

    Some(Selected {
        name: name.to_string(),
        read_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::transcript;
    use crate::fake_imap::mailbox::MailboxBuilder;

    fn mailbox() -> Mailbox {
        let raw = b"Subject: Test\r\n\r\nBody";
        MailboxBuilder::new()
            .folder("INBOX")
            .email(5, true, raw)
            .email(10, false, raw)
            .folder("Empty")
            .build()
    }

    async fn open(name: &'static str, read_only: bool) -> (String, Option<Selected>) {
        let mailbox = mailbox();
        let mut selected = None;
        let output = transcript(|mut s| {
            let selected = &mut selected;
            async move {
                *selected = handle_select("A1", name, read_only, &mailbox, &mut s).await;
            }
        })
        .await;
        (output, selected)
    }

    #[tokio::test]
    async fn select_reports_folder_state() {
        let (output, selected) = open("INBOX", false).await;

        assert_eq!(selected, Some(Selected::read_write("INBOX")));
        assert!(output.contains("* 2 EXISTS\r\n"));
        assert!(output.contains("* OK [UIDNEXT 11]\r\n"));
        assert!(output.contains("* OK [UNSEEN 2]\r\n"));
        assert!(output.ends_with("A1 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[tokio::test]
    async fn examine_is_read_only() {
        let (output, selected) = open("Empty", true).await;

        assert!(selected.unwrap().read_only);
        assert!(output.contains("* 0 EXISTS\r\n"));
        assert!(output.contains("* OK [UIDNEXT 1]\r\n"));
        assert!(!output.contains("UNSEEN"));
        assert!(output.ends_with("A1 OK [READ-ONLY] EXAMINE completed\r\n"));
    }

    #[tokio::test]
    async fn missing_folder() {
        let (output, selected) = open("Nope", false).await;
        assert!(selected.is_none());
        assert_eq!(output, "A1 NO Mailbox does not exist\r\n");
    }
}

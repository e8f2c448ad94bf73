//! IDLE command handler (RFC 2177).
//!
//! After the `+` continuation the server pushes `* N EXISTS` whenever
//! the selected folder's message count changes, until the client
//! sends `DONE`:
//!
//! ```text
//!   Client:  A0009 IDLE
//!   Server:  + idling
//!   Server:  * 3 EXISTS
//!   Client:  DONE
//!   Server:  A0009 OK IDLE terminated
//! ```
//!
//! The folder is checked on a short interval, so mail delivered with
//! `FakeImapServer::deliver` shows up without any client command.

use super::{Selected, require_selected};
use crate::fake_imap::io::{reply, write_line};
use crate::fake_imap::mailbox::Mailbox;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

const CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Handle the IDLE command. Returns `false` if the client went away
/// while idling.
pub async fn handle_idle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    selected: Option<&Selected>,
    known: &mut usize,
    stream: &mut BufReader<S>,
) -> bool {
    let Some(selected) = require_selected(tag, selected, stream).await else {
        return true;
    };
    if write_line(stream, "+ idling\r\n").await.is_err() {
        return false;
    }

    let mut ticker = tokio::time::interval(CHECK_INTERVAL);
    // `read_until` keeps partial input in `line` when the tick wins.
    let mut line = Vec::new();
    loop {
        let read = tokio::select! {
            read = stream.read_until(b'\n', &mut line) => Some(read),
            _ = ticker.tick() => None,
        };

        match read {
            Some(Ok(0) | Err(_)) => return false,
            Some(Ok(_)) => {
                let status = if line.trim_ascii().eq_ignore_ascii_case(b"DONE") {
                    "OK IDLE terminated"
                } else {
                    "BAD Expected DONE"
                };
                return reply(stream, tag, status).await.is_ok();
            }
            None => {
                let exists = mailbox
                    .lock()
                    .unwrap()
                    .get_folder(&selected.name)
                    .map(|f| f.emails.len());
                if let Some(exists) = exists.filter(|n| n != known) {
                    if write_line(stream, &format!("* {exists} EXISTS\r\n")).await.is_err() {
                        return false;
                    }
                    *known = exists;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    async fn next_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("server went quiet")
            .unwrap();
        line
    }

    #[tokio::test]
    async fn pushes_new_mail_until_done() {
        let mailbox = Arc::new(Mutex::new(MailboxBuilder::new().folder("INBOX").build()));
        let (client, server) = tokio::io::duplex(4096);

        let shared = Arc::clone(&mailbox);
        let server = tokio::spawn(async move {
            let mut stream = BufReader::new(server);
            let mut known = 0;
            let inbox = Selected::read_write("INBOX");
            let alive = handle_idle("A1", &shared, Some(&inbox), &mut known, &mut stream).await;
            (alive, known)
        });

        let mut client = BufReader::new(client);
        assert_eq!(next_line(&mut client).await, "+ idling\r\n");

        mailbox.lock().unwrap().deliver("INBOX", 1, b"Subject: new\r\n\r\nhi");
        assert_eq!(next_line(&mut client).await, "* 1 EXISTS\r\n");

        client.get_mut().write_all(b"DONE\r\n").await.unwrap();
        assert_eq!(next_line(&mut client).await, "A1 OK IDLE terminated\r\n");
        assert_eq!(server.await.unwrap(), (true, 1));
    }

    #[tokio::test]
    async fn hangup_while_idling() {
        let mailbox = Mutex::new(MailboxBuilder::new().folder("INBOX").build());
        let (client, server) = tokio::io::duplex(4096);
        drop(client);

        let mut stream = BufReader::new(server);
        let mut known = 0;
        let inbox = Selected::read_write("INBOX");
        assert!(!handle_idle("A1", &mailbox, Some(&inbox), &mut known, &mut stream).await);
    }
}

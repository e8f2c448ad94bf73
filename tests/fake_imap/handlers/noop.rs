//! NOOP command handler.
//!
//! Polling clients rely on NOOP to learn about mailbox changes: the
//! server reports them as untagged responses before the completion.
//! Here that is the message count of the selected folder, whenever it
//! differs from what the session last reported.

use crate::fake_imap::io::{reply, write_line};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the NOOP command. `exists` is the current message count of
/// the selected folder; `known` the count this session last reported.
pub async fn handle_noop<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    exists: Option<usize>,
    known: &mut usize,
    stream: &mut BufReader<S>,
) {
    if let Some(exists) = exists.filter(|n| n != known) {
        let _ = write_line(stream, &format!("* {exists} EXISTS\r\n")).await;
        *known = exists;
    }
    let _ = reply(stream, tag, "OK NOOP completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::transcript;

    #[tokio::test]
    async fn quiet_without_changes() {
        let output = transcript(|mut s| async move {
            let mut known = 2;
            handle_noop("A1", Some(2), &mut known, &mut s).await;
            handle_noop("A2", None, &mut known, &mut s).await;
        })
        .await;
        assert_eq!(output, "A1 OK NOOP completed\r\nA2 OK NOOP completed\r\n");
    }

    #[tokio::test]
    async fn reports_new_count_once() {
        let output = transcript(|mut s| async move {
            let mut known = 2;
            handle_noop("A1", Some(3), &mut known, &mut s).await;
            handle_noop("A2", Some(3), &mut known, &mut s).await;
            assert_eq!(known, 3);
        })
        .await;
        assert_eq!(
            output,
            "* 3 EXISTS\r\nA1 OK NOOP completed\r\nA2 OK NOOP completed\r\n"
        );
    }
}

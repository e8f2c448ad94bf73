//! Attachment persistence

use async_trait::async_trait;
use std::io;
use tracing::debug;

/// Destination for attachment bytes.
#[async_trait]
pub trait AttachmentSink: Send + Sync {
    /// Write `content` to `path`, replacing any existing file.
    async fn write(&self, path: &str, content: &[u8]) -> io::Result<()>;
}

/// Writes attachments to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsAttachmentSink;

#[async_trait]
impl AttachmentSink for FsAttachmentSink {
    async fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        debug!(path, bytes = content.len(), "writing attachment");
        tokio::fs::write(path, content).await
    }
}

/// Output path for an attachment.
///
/// `directory` is a literal prefix, not a path component: `"out/"` and
/// `"a.pdf"` give `"out/a.pdf"`, while `"out"` gives `"outa.pdf"`.
/// Path separators inside `filename` are replaced with `_` so a crafted
/// filename cannot leave the directory.
#[must_use]
pub fn attachment_path(directory: &str, filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{directory}{safe}")
}

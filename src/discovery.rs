//! Discovery pipeline: search, bounded fetch fan-out, parse, emit

use crate::attachment::attachment_path;
use crate::error::Error;
use crate::event::ListenerEvent;
use crate::listener::Inner;
use crate::parser::{Attachment, ParsedMessage, parse_message};
use crate::session::MailSession;
use futures::{StreamExt, future, stream};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a single message fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    /// Fetched but unparseable; reported on its own.
    Unparsed,
    FetchFailed,
    Skipped,
}

impl<S: MailSession> Inner<S> {
    /// Search with the configured filter and deliver every match.
    ///
    /// Returns the number of matched messages. All failures are emitted
    /// as `error` events.
    pub(crate) async fn discover(&self, shutdown: &CancellationToken) -> usize {
        let filter = &self.config.search_filter;
        let searched = {
            let mut session = self.lock_session().await;
            session.search(filter).await
        };
        let uids = match searched {
            Ok(uids) => uids,
            Err(e) => {
                warn!("Search '{}' failed: {e}", filter);
                self.emit_error(e);
                return 0;
            }
        };

        if uids.is_empty() {
            debug!("No messages matching '{}'", filter);
            return 0;
        }
        let total = uids.len();
        info!("Found {} messages matching '{}'", total, filter);

        let failed = stream::iter(uids)
            .map(|uid| self.process(uid, shutdown))
            .buffer_unordered(self.config.fetch_concurrency.get())
            .filter(|outcome| future::ready(*outcome == Outcome::FetchFailed))
            .count()
            .await;

        if failed > 0 {
            self.emit_error(Error::Fetch(format!(
                "{failed} of {total} messages could not be fetched"
            )));
        }
        total
    }

    async fn process(&self, uid: u32, shutdown: &CancellationToken) -> Outcome {
        if shutdown.is_cancelled() {
            return Outcome::Skipped;
        }

        let fetched = {
            let mut session = self.lock_session().await;
            session.fetch(uid, self.config.mark_seen).await
        };
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(uid, "Fetch failed: {e}");
                self.emit_error(e);
                return Outcome::FetchFailed;
            }
        };

        match parse_message(&fetched.raw, &self.config.parser) {
            Ok(message) => {
                self.deliver(fetched.seqno, fetched.uid, message).await;
                Outcome::Delivered
            }
            Err(e) => {
                warn!(uid, "Parse failed: {e}");
                self.emit_error(e);
                Outcome::Unparsed
            }
        }
    }

    async fn deliver(&self, seqno: u32, uid: u32, mut message: ParsedMessage) {
        let options = &self.config.attachments;
        let streaming = options.enabled && options.stream;
        // Streaming leaves the metadata on the message and hands the
        // bytes to the sink only.
        let attachments: Vec<Attachment> = if streaming {
            message
                .attachments
                .iter_mut()
                .map(|attachment| {
                    let content = std::mem::take(&mut attachment.content);
                    Attachment {
                        content,
                        ..attachment.clone()
                    }
                })
                .collect()
        } else {
            message.attachments.clone()
        };

        let headers = message.headers.clone();
        let body = message.body();
        debug!(uid, seqno, subject = ?message.subject, "Delivering message");
        self.emit(ListenerEvent::Mail {
            seqno,
            uid,
            message: Arc::new(message),
        });
        self.emit(ListenerEvent::Headers { seqno, headers });
        self.emit(ListenerEvent::Body { seqno, body });

        for mut attachment in attachments {
            let path = if options.enabled {
                let path = attachment_path(&options.directory, &attachment.filename);
                let written = self.sink.write(&path, &attachment.content).await;
                if streaming {
                    attachment.content = Vec::new();
                }
                match written {
                    Ok(()) => Some(path),
                    Err(source) => {
                        warn!(uid, path = %path, "Attachment write failed: {source}");
                        self.emit_error(Error::Persistence {
                            path,
                            source: Arc::new(source),
                        });
                        None
                    }
                }
            } else {
                None
            };
            self.emit(ListenerEvent::Attachment {
                attachment,
                path,
                seqno,
                uid,
            });
        }
    }
}

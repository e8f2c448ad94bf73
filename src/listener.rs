//! Mailbox watcher
//!
//! [`MailListener`] owns one [`MailSession`] and drives it through
//! connect, mailbox open and the watch loop, emitting
//! [`ListenerEvent`]s on an unbounded channel.
//!
//! The session sits behind an async mutex. The watch loop holds it only
//! for a single wait, so any other caller (actions, [`MailListener::scan`])
//! can interrupt the wait through the shared [`Notify`] and take its turn.

use crate::attachment::{AttachmentSink, FsAttachmentSink};
use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::event::{ConnectionState, ListenerEvent};
use crate::session::{MailSession, Notification};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) struct Inner<S> {
    pub(crate) config: ListenerConfig,
    session: Mutex<S>,
    pub(crate) sink: Arc<dyn AttachmentSink>,
    events: mpsc::UnboundedSender<ListenerEvent>,
    state: watch::Sender<ConnectionState>,
    interrupt: Notify,
}

impl<S: MailSession> Inner<S> {
    /// Lock the session, interrupting a pending wait if it is busy.
    pub(crate) async fn lock_session(&self) -> MutexGuard<'_, S> {
        if let Ok(guard) = self.session.try_lock() {
            return guard;
        }
        self.interrupt.notify_one();
        self.session.lock().await
    }

    pub(crate) fn emit(&self, event: ListenerEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }

    pub(crate) fn emit_error(&self, error: Error) {
        self.emit(ListenerEvent::Error { error });
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "Listener state");
        self.state.send_replace(state);
    }

    fn disconnected(&self) {
        self.emit(ListenerEvent::Disconnected);
        self.set_state(ConnectionState::Closed);
    }

    /// Connect if needed and open the configured mailbox read-write.
    ///
    /// An invalid configuration fails before any protocol traffic.
    /// Emits `server:connected` and `mailbox` on success. Failures are
    /// emitted and returned.
    async fn open(&self) -> Result<()> {
        if let Err(e) = self.config.validate() {
            error!("Invalid listener configuration: {e}");
            self.set_state(ConnectionState::Errored);
            self.emit_error(e.clone());
            return Err(e);
        }

        let mut session = self.lock_session().await;

        if !session.is_connected() {
            self.set_state(ConnectionState::Connecting);
            if let Err(e) = session.connect().await {
                error!("Connection failed: {e}");
                self.set_state(ConnectionState::Errored);
                self.emit_error(e.clone());
                return Err(e);
            }
        }
        self.set_state(ConnectionState::Ready);

        match session.open_box(&self.config.mailbox, false).await {
            Ok(info) => {
                info!(mailbox = %info.name, exists = info.exists, "Listening on mailbox");
                self.emit(ListenerEvent::Connected);
                self.emit(ListenerEvent::Mailbox { info });
                Ok(())
            }
            Err(e) => {
                error!(mailbox = %self.config.mailbox, "Mailbox open failed: {e}");
                self.emit_error(e.clone());
                Err(e)
            }
        }
    }

    async fn watch(&self, shutdown: &CancellationToken) {
        if self.open().await.is_err() {
            return;
        }
        if self.config.fetch_unread_on_start {
            self.discover(shutdown).await;
        }
        self.set_state(ConnectionState::Watching);

        loop {
            let notification = {
                let mut session = self.session.lock().await;
                if shutdown.is_cancelled() {
                    return;
                }
                session
                    .wait_for_change(self.config.idle_timeout, &self.interrupt)
                    .await
            };
            if shutdown.is_cancelled() {
                return;
            }

            match notification {
                Ok(Notification::NewMail { exists }) => {
                    info!(exists, "New mail notification");
                    self.discover(shutdown).await;
                }
                Ok(Notification::Changed) => {
                    debug!("Mailbox update notification");
                    self.discover(shutdown).await;
                }
                Ok(Notification::Timeout | Notification::Interrupted) => {}
                Ok(Notification::Closed) => {
                    info!("Server closed the connection");
                    self.disconnected();
                    return;
                }
                Err(e) => {
                    let connected = self.session.lock().await.is_connected();
                    warn!("Waiting for mailbox changes failed: {e}");
                    self.emit_error(e);
                    if !connected {
                        self.disconnected();
                        return;
                    }
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = shutdown.cancelled() => return,
                    }
                }
            }
        }
    }
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Watches one mailbox and reports what arrives in it.
///
/// # Examples
///
/// ```no_run
/// use mail_listener::{ImapConnection, ListenerConfig, ListenerEvent, MailListener};
///
/// # async fn run() -> mail_listener::Result<()> {
/// let config = ListenerConfig::from_env()?;
/// let session = ImapConnection::for_listener(&config);
/// let (listener, mut events) = MailListener::new(config, session);
///
/// listener.start().await;
/// while let Some(event) = events.recv().await {
///     if let ListenerEvent::Mail { uid, message, .. } = event {
///         println!("{uid}: {:?}", message.subject);
///         listener.add_label(uid, true).await.ok();
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct MailListener<S> {
    pub(crate) inner: Arc<Inner<S>>,
    state: watch::Receiver<ConnectionState>,
    task: Mutex<Option<Running>>,
}

impl<S: MailSession + 'static> MailListener<S> {
    /// Listener that writes attachments to the local filesystem.
    #[must_use]
    pub fn new(
        config: ListenerConfig,
        session: S,
    ) -> (Self, mpsc::UnboundedReceiver<ListenerEvent>) {
        Self::with_sink(config, session, Arc::new(FsAttachmentSink))
    }

    #[must_use]
    pub fn with_sink(
        config: ListenerConfig,
        session: S,
        sink: Arc<dyn AttachmentSink>,
    ) -> (Self, mpsc::UnboundedReceiver<ListenerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Idle);
        let inner = Arc::new(Inner {
            config,
            session: Mutex::new(session),
            sink,
            events,
            state,
            interrupt: Notify::new(),
        });
        let listener = Self {
            inner,
            state: state_rx,
            task: Mutex::new(None),
        };
        (listener, receiver)
    }

    #[must_use]
    pub fn config(&self) -> &ListenerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Connect, open the mailbox and start watching in the background.
    ///
    /// Calling this while the watch task is still running does nothing.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            warn!("Listener already running, ignoring start");
            return;
        }

        info!(mailbox = %self.inner.config.mailbox, "Starting listener");
        let shutdown = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { inner.watch(&token).await });
        *task = Some(Running { handle, shutdown });
    }

    /// Run one discovery pass now, connecting and opening the mailbox
    /// first if needed.
    ///
    /// Returns the number of messages the search matched.
    ///
    /// # Errors
    ///
    /// Returns the connection or mailbox-open error (also emitted) if
    /// the session could not be prepared. Pipeline failures are only
    /// emitted.
    pub async fn scan(&self) -> Result<usize> {
        let connected = self.inner.lock_session().await.is_connected();
        if !connected {
            self.inner.open().await?;
        }
        Ok(self.inner.discover(&CancellationToken::new()).await)
    }

    /// Stop watching and log out without an `ending` notice.
    pub async fn stop(&self) {
        info!("Stopping listener");
        self.shutdown_task().await;
        self.logout().await;
    }

    /// Announce `server:ending`, stop watching and log out gracefully.
    pub async fn end(&self) {
        info!("Ending listener");
        self.inner.emit(ListenerEvent::Ending);
        self.shutdown_task().await;
        self.logout().await;
    }

    /// Announce `server:destroying` and drop the connection at once.
    pub async fn destroy(&self) {
        info!("Destroying listener");
        self.inner.emit(ListenerEvent::Destroying);
        if let Some(running) = self.task.lock().await.take() {
            running.shutdown.cancel();
            running.handle.abort();
            if let Err(e) = running.handle.await
                && !e.is_cancelled()
            {
                error!("Watch task failed: {e}");
            }
        }
        self.inner.session.lock().await.destroy().await;
        self.inner.disconnected();
    }

    async fn shutdown_task(&self) {
        let Some(running) = self.task.lock().await.take() else {
            return;
        };
        running.shutdown.cancel();
        self.inner.interrupt.notify_one();
        if let Err(e) = running.handle.await {
            error!("Watch task failed: {e}");
        }
    }

    async fn logout(&self) {
        let result = self.inner.session.lock().await.end().await;
        if let Err(e) = result {
            warn!("Logout failed: {e}");
            self.inner.emit_error(e);
        }
        self.inner.disconnected();
    }
}

impl<S> Drop for MailListener<S> {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.shutdown.cancel();
            running.handle.abort();
        }
    }
}

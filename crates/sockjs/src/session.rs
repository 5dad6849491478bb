//! The session state machine.
//!
//! A session is the logical, ordered, bidirectional message channel that
//! outlives the individual HTTP requests carrying it. At most one receiver
//! is attached at any instant; messages sent while no receiver is attached
//! wait in the send buffer and are flushed as a single `a[...]` frame on the
//! next attach. Heartbeat and disconnect deadlines are cancellable tokio
//! tasks tied to state transitions.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use axum::http::request::Parts;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::frame;
use crate::receiver::{Receiver, ReceiverKind};

/// Lifecycle of a session. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Created, no receiver has attached yet.
    Opening,
    /// A receiver attached at least once; the open frame has been sent.
    Active,
    /// The close frame is frozen and replayed to every further receiver.
    Closing,
    /// Terminal. The receive queue is closed and the close signal tripped.
    Closed,
}

struct Inner {
    state: SessionState,
    send_buffer: Vec<String>,
    receiver: Option<Arc<dyn Receiver>>,
    receiver_kind: ReceiverKind,
    recv_tx: Option<UnboundedSender<String>>,
    close_frame: Option<String>,
    heartbeat: Option<CancellationToken>,
    disconnect: Option<CancellationToken>,
}

/// A logical connection multiplexed across detached HTTP requests.
///
/// Handed to the application by the server when a receiver-side request
/// names an unknown session ID. Must be created inside a tokio runtime; the
/// heartbeat and disconnect deadlines run as spawned tasks holding only a
/// weak handle, so they never keep a dead session alive.
pub struct Session {
    id: String,
    request: Option<Parts>,
    disconnect_delay: Duration,
    heartbeat_delay: Duration,
    this: Weak<Session>,
    inner: Mutex<Inner>,
    recv_rx: tokio::sync::Mutex<UnboundedReceiver<String>>,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        id: String,
        request: Option<Parts>,
        disconnect_delay: Duration,
        heartbeat_delay: Duration,
    ) -> Arc<Self> {
        let (recv_tx, recv_rx) = mpsc::unbounded_channel();
        let session = Arc::new_cyclic(|this| Self {
            id,
            request,
            disconnect_delay,
            heartbeat_delay,
            this: this.clone(),
            inner: Mutex::new(Inner {
                state: SessionState::Opening,
                send_buffer: Vec::new(),
                receiver: None,
                receiver_kind: ReceiverKind::None,
                recv_tx: Some(recv_tx),
                close_frame: None,
                heartbeat: None,
                disconnect: None,
            }),
            recv_rx: tokio::sync::Mutex::new(recv_rx),
            closed: CancellationToken::new(),
        });
        {
            let mut inner = session.lock();
            session.arm_disconnect_timer(&mut inner);
        }
        session
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The opaque session ID chosen by the client.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the HTTP request that created the session.
    pub fn request(&self) -> Option<&Parts> {
        self.request.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// The transport of the most recently attached receiver.
    pub fn receiver_kind(&self) -> ReceiverKind {
        self.lock().receiver_kind
    }

    /// Trips once the session reaches `Closed`.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Queues a message for delivery. With a receiver attached the whole
    /// buffer is flushed immediately as one `a[...]` frame; otherwise it
    /// waits for the next attach.
    pub fn send(&self, message: impl Into<String>) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.state >= SessionState::Closing {
            return Err(SessionError::SessionNotOpen);
        }
        inner.send_buffer.push(message.into());
        self.flush(&mut inner);
        Ok(())
    }

    /// Waits for the next inbound message. Returns `SessionNotOpen` once the
    /// receive queue is closed and drained.
    pub async fn recv(&self) -> Result<String, SessionError> {
        let mut rx = self.recv_rx.lock().await;
        rx.recv().await.ok_or(SessionError::SessionNotOpen)
    }

    /// Closes the session: freezes the `c[code,"reason"]` frame, delivers it
    /// to the current receiver if any, and replays it to every receiver that
    /// attaches later. The receive queue closes immediately.
    pub fn close(&self, code: i32, reason: &str) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.state >= SessionState::Closing {
            return Err(SessionError::SessionNotOpen);
        }
        tracing::debug!(session = %self.id, code, reason, "closing session");
        let close_frame = frame::close_frame(code, reason);
        inner.close_frame = Some(close_frame.clone());
        inner.state = SessionState::Closing;
        inner.recv_tx = None;
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.cancel();
        }
        if let Some(receiver) = inner.receiver.clone() {
            let _ = receiver.send_frame(&close_frame);
            receiver.close();
        }
        Ok(())
    }

    /// Pushes an inbound message onto the receive queue.
    pub(crate) fn accept(&self, message: String) -> Result<(), SessionError> {
        let inner = self.lock();
        match &inner.recv_tx {
            Some(tx) => tx.send(message).map_err(|_| SessionError::SessionNotOpen),
            None => Err(SessionError::SessionNotOpen),
        }
    }

    /// Installs `receiver` as the single attached receiver.
    ///
    /// Fails with `ReceiverAttached` while another receiver is present. On a
    /// closing or closed session the attach succeeds, but the receiver gets
    /// only the frozen close frame and is finished immediately. From
    /// `Opening` the open frame goes out first, then buffered messages as
    /// one `a[...]` frame, then heartbeats start.
    pub(crate) fn attach_receiver(&self, receiver: Arc<dyn Receiver>) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.receiver.is_some() {
            return Err(SessionError::ReceiverAttached);
        }
        if let Some(disconnect) = inner.disconnect.take() {
            disconnect.cancel();
        }
        inner.receiver_kind = receiver.kind();
        inner.receiver = Some(receiver.clone());
        self.spawn_watcher(&receiver);
        if let Some(close_frame) = inner.close_frame.clone() {
            let _ = receiver.send_frame(&close_frame);
            receiver.close();
            return Ok(());
        }
        if inner.state == SessionState::Opening {
            tracing::debug!(session = %self.id, kind = ?receiver.kind(), "session active");
            let _ = receiver.send_frame(frame::OPEN_FRAME);
            inner.state = SessionState::Active;
        }
        self.flush(&mut inner);
        self.spawn_heartbeat(&mut inner);
        Ok(())
    }

    /// Drops the current receiver and re-arms the disconnect deadline.
    /// Idempotent; re-arming simply restarts the deadline.
    pub(crate) fn detach_receiver(&self) {
        let mut inner = self.lock();
        inner.receiver = None;
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.cancel();
        }
        if let Some(disconnect) = inner.disconnect.take() {
            disconnect.cancel();
        }
        if inner.state < SessionState::Closed {
            self.arm_disconnect_timer(&mut inner);
        }
    }

    /// Drains the send buffer into the attached receiver as one `a[...]`
    /// frame. On a send error the messages go back, in order, for the next
    /// receiver.
    fn flush(&self, inner: &mut Inner) {
        let Some(receiver) = inner.receiver.clone() else {
            return;
        };
        if inner.send_buffer.is_empty() || !receiver.can_send() {
            return;
        }
        let pending = std::mem::take(&mut inner.send_buffer);
        if receiver.send_bulk(&pending).is_err() {
            inner.send_buffer = pending;
        }
    }

    /// Detaches as soon as the receiver finishes or its client goes away. A
    /// new receiver cannot attach until this has run, so the detach always
    /// targets the receiver being watched.
    fn spawn_watcher(&self, receiver: &Arc<dyn Receiver>) {
        let this = self.this.clone();
        let done = receiver.done();
        let interrupted = receiver.interrupted();
        tokio::spawn(async move {
            tokio::select! {
                _ = done.cancelled() => {}
                _ = interrupted.cancelled() => {}
            }
            if let Some(session) = this.upgrade() {
                session.detach_receiver();
            }
        });
    }

    fn spawn_heartbeat(&self, inner: &mut Inner) {
        let token = CancellationToken::new();
        inner.heartbeat = Some(token.clone());
        let this = self.this.clone();
        let delay = self.heartbeat_delay;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + delay;
            let mut ticks = tokio::time::interval_at(start, delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticks.tick() => {
                        let Some(session) = this.upgrade() else {
                            return;
                        };
                        let receiver = {
                            let inner = session.lock();
                            if inner.state != SessionState::Active {
                                return;
                            }
                            match inner.receiver.clone() {
                                Some(receiver) => receiver,
                                None => return,
                            }
                        };
                        if receiver.can_send() {
                            let _ = receiver.send_frame(frame::HEARTBEAT_FRAME);
                        }
                    }
                }
            }
        });
    }

    fn arm_disconnect_timer(&self, inner: &mut Inner) {
        let token = CancellationToken::new();
        inner.disconnect = Some(token.clone());
        let this = self.this.clone();
        let delay = self.disconnect_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(session) = this.upgrade() {
                        session.disconnect_timeout();
                    }
                }
            }
        });
    }

    /// The disconnect deadline elapsed with no receiver attached.
    fn disconnect_timeout(&self) {
        let mut inner = self.lock();
        if inner.receiver.is_some() || inner.state == SessionState::Closed {
            return;
        }
        tracing::debug!(session = %self.id, "no receiver within disconnect delay, session closed");
        inner.state = SessionState::Closed;
        inner.recv_tx = None;
        if inner.close_frame.is_none() {
            inner.close_frame = Some(frame::close_frame(3000, "Go away!"));
        }
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.cancel();
        }
        drop(inner);
        self.closed.cancel();
    }
}

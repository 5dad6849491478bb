//! Transport receivers for the HTTP-based SockJS transports.
//!
//! Every transport shares one receiver implementation: frames are encoded to
//! the transport's wire format and pushed into the response body channel,
//! with a byte budget that finishes the receiver when exhausted. Polling
//! transports finish after a single frame. The HTTP client going away is
//! observed through the body channel closing and trips the interrupt signal.

pub(crate) mod htmlfile;
pub(crate) mod jsonp;
pub(crate) mod xhr;

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{PayloadError, ReceiverClosed};
use crate::frame;
use crate::receiver::{Receiver, ReceiverKind};
use crate::server::{App, valid_segment};

pub(crate) const JAVASCRIPT_CONTENT_TYPE: &str = "application/javascript; charset=UTF-8";
pub(crate) const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";
pub(crate) const PLAIN_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// How outbound frames become response bytes.
#[derive(Debug, Clone)]
pub(crate) enum Framing {
    /// Frame followed by `\n` (xhr polling and streaming).
    Newline,
    /// Frame wrapped as `<script>\np("...");\n</script>\r\n` (htmlfile).
    Script,
    /// Frame wrapped as `{callback}("...");\r\n` (jsonp).
    Callback(String),
}

impl Framing {
    fn encode(&self, frame: &str) -> Bytes {
        match self {
            Framing::Newline => Bytes::from(format!("{frame}\n")),
            Framing::Script => {
                let quoted = frame::single_message(frame);
                Bytes::from(format!("<script>\np({});\n</script>\r\n", &quoted[1..]))
            }
            Framing::Callback(callback) => {
                let quoted = frame::single_message(frame);
                Bytes::from(format!("{callback}({});\r\n", &quoted[1..]))
            }
        }
    }
}

/// Whether the receiver finishes after one frame group or runs until its
/// byte budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryMode {
    Polling,
    Streaming,
}

struct Writer {
    tx: Option<UnboundedSender<Result<Bytes, io::Error>>>,
    written: usize,
}

/// Receiver bound to one HTTP response.
pub(crate) struct HttpReceiver {
    kind: ReceiverKind,
    framing: Framing,
    mode: DeliveryMode,
    response_limit: usize,
    writer: Mutex<Writer>,
    done: CancellationToken,
    interrupted: CancellationToken,
}

impl HttpReceiver {
    /// Creates the receiver together with the response body that streams its
    /// frames. The prelude, if any, is written and counted immediately.
    pub(crate) fn new(
        kind: ReceiverKind,
        framing: Framing,
        mode: DeliveryMode,
        response_limit: usize,
        prelude: Option<Bytes>,
    ) -> (Arc<Self>, Body) {
        let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, io::Error>>();
        let receiver = Arc::new(Self {
            kind,
            framing,
            mode,
            response_limit,
            writer: Mutex::new(Writer {
                tx: Some(tx.clone()),
                written: 0,
            }),
            done: CancellationToken::new(),
            interrupted: CancellationToken::new(),
        });
        if let Some(prelude) = prelude {
            let mut writer = receiver.lock_writer();
            let len = prelude.len();
            if tx.send(Ok(prelude)).is_ok() {
                writer.written += len;
            }
        }
        // The response body dropping (client gone, or response complete) is
        // the only disconnect signal the HTTP layer gives us.
        let done = receiver.done.clone();
        let interrupted = receiver.interrupted.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = done.cancelled() => {}
                _ = tx.closed() => {
                    interrupted.cancel();
                    done.cancel();
                }
            }
        });
        (receiver, Body::from_stream(UnboundedReceiverStream::new(rx)))
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, writer: &mut Writer) {
        writer.tx = None;
        self.done.cancel();
    }
}

impl Receiver for HttpReceiver {
    fn kind(&self) -> ReceiverKind {
        self.kind
    }

    fn can_send(&self) -> bool {
        !self.done.is_cancelled()
    }

    fn send_bulk(&self, messages: &[String]) -> Result<(), ReceiverClosed> {
        if messages.is_empty() {
            return Ok(());
        }
        self.send_frame(&frame::message_array(messages))
    }

    fn send_frame(&self, frame: &str) -> Result<(), ReceiverClosed> {
        if !self.can_send() {
            return Err(ReceiverClosed);
        }
        let chunk = self.framing.encode(frame);
        let len = chunk.len();
        let mut writer = self.lock_writer();
        let delivered = match writer.tx.as_ref() {
            Some(tx) => tx.send(Ok(chunk)).is_ok(),
            None => return Err(ReceiverClosed),
        };
        if !delivered {
            self.finish(&mut writer);
            return Err(ReceiverClosed);
        }
        writer.written += len;
        if self.mode == DeliveryMode::Polling || writer.written >= self.response_limit {
            self.finish(&mut writer);
        }
        Ok(())
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    fn interrupted(&self) -> CancellationToken {
        self.interrupted.clone()
    }

    fn close(&self) {
        let mut writer = self.lock_writer();
        self.finish(&mut writer);
    }
}

/// Everything the shared attach path needs to know about one transport.
pub(crate) struct TransportSpec {
    pub(crate) kind: ReceiverKind,
    pub(crate) framing: Framing,
    pub(crate) mode: DeliveryMode,
    pub(crate) content_type: &'static str,
    pub(crate) prelude: Option<Bytes>,
}

/// Looks up or creates the session, builds the transport's receiver and
/// attaches it. When another receiver is already attached the response is a
/// single synthesized `c[2010,...]` frame in the transport's own format.
pub(crate) async fn attach(
    app: App,
    server: String,
    session_id: String,
    parts: Parts,
    spec: TransportSpec,
) -> Response {
    if !valid_segment(&server) || !valid_segment(&session_id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let session = app.session_for_attach(&session_id, parts).await;
    let (receiver, body) = HttpReceiver::new(
        spec.kind,
        spec.framing.clone(),
        spec.mode,
        app.response_limit,
        spec.prelude.clone(),
    );
    match session.attach_receiver(receiver) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, spec.content_type)],
            body,
        )
            .into_response(),
        Err(_) => {
            tracing::debug!(session = %session_id, "another receiver still attached");
            another_connection_response(&spec)
        }
    }
}

fn another_connection_response(spec: &TransportSpec) -> Response {
    let close = frame::close_frame(2010, "Another connection still open");
    let mut body = Vec::new();
    if let Some(prelude) = &spec.prelude {
        body.extend_from_slice(prelude);
    }
    body.extend_from_slice(&spec.framing.encode(&close));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, spec.content_type)],
        body,
    )
        .into_response()
}

/// Decodes a send-side payload and pushes its messages into the session's
/// receive queue. Validation order follows the protocol: payload presence,
/// JSON shape, then session existence.
pub(crate) async fn send_payload(
    app: &App,
    server: &str,
    session_id: &str,
    body: &[u8],
) -> Result<(), Response> {
    if !valid_segment(server) || !valid_segment(session_id) {
        return Err(StatusCode::BAD_REQUEST.into_response());
    }
    let messages = frame::decode_payload(body).map_err(|err| match err {
        PayloadError::Empty => (StatusCode::BAD_REQUEST, "Payload expected.").into_response(),
        PayloadError::Broken => {
            (StatusCode::BAD_REQUEST, "Broken JSON encoding.").into_response()
        }
    })?;
    let Some(session) = app.session_lookup(session_id).await else {
        return Err(StatusCode::NOT_FOUND.into_response());
    };
    for message in messages {
        if session.accept(message).is_err() {
            return Err(StatusCode::NOT_FOUND.into_response());
        }
    }
    Ok(())
}

/// Query string carrying the client callback name (`?c=...`).
#[derive(Debug, serde::Deserialize)]
pub(crate) struct CallbackQuery {
    c: Option<String>,
}

/// Extracts and validates the callback name htmlfile and jsonp interpolate
/// into their responses, or produces the 400 the client gets instead.
pub(crate) fn required_callback(query: CallbackQuery) -> Result<String, Response> {
    let callback = query.c.unwrap_or_default();
    if callback.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "\"callback\" parameter required").into_response());
    }
    if !valid_callback(&callback) {
        return Err((StatusCode::BAD_REQUEST, "invalid \"callback\" parameter").into_response());
    }
    Ok(callback)
}

/// Anything outside `[A-Za-z0-9_.]` is rejected to keep script injection
/// out of the interpolated pages.
fn valid_callback(callback: &str) -> bool {
    !callback.is_empty()
        && callback
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

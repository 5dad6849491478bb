//! The xhr transport family: long-polling reads, streaming reads and the
//! send-side endpoint shared by both.

use axum::extract::{Path, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::{
    DeliveryMode, Framing, JAVASCRIPT_CONTENT_TYPE, PLAIN_CONTENT_TYPE, TransportSpec, attach,
    send_payload,
};
use crate::receiver::ReceiverKind;
use crate::server::App;

/// Browsers sitting behind buffering proxies only hand chunks to the page
/// once enough bytes arrived; streaming responses open with 2 KiB of `h`.
const STREAMING_PRELUDE_SIZE: usize = 2048;

/// `POST /{server}/{session}/xhr`: one frame per poll.
pub(crate) async fn xhr_poll(
    State(app): State<App>,
    Path((server, session)): Path<(String, String)>,
    parts: Parts,
) -> Response {
    attach(
        app,
        server,
        session,
        parts,
        TransportSpec {
            kind: ReceiverKind::Xhr,
            framing: Framing::Newline,
            mode: DeliveryMode::Polling,
            content_type: JAVASCRIPT_CONTENT_TYPE,
            prelude: None,
        },
    )
    .await
}

/// `POST /{server}/{session}/xhr_streaming`: frames until the response
/// limit is reached.
pub(crate) async fn xhr_streaming(
    State(app): State<App>,
    Path((server, session)): Path<(String, String)>,
    parts: Parts,
) -> Response {
    attach(
        app,
        server,
        session,
        parts,
        TransportSpec {
            kind: ReceiverKind::XhrStreaming,
            framing: Framing::Newline,
            mode: DeliveryMode::Streaming,
            content_type: JAVASCRIPT_CONTENT_TYPE,
            prelude: Some(streaming_prelude()),
        },
    )
    .await
}

fn streaming_prelude() -> Bytes {
    let mut prelude = vec![b'h'; STREAMING_PRELUDE_SIZE];
    prelude.push(b'\n');
    Bytes::from(prelude)
}

/// `POST /{server}/{session}/xhr_send`: inject messages into an existing
/// session. Never creates one; unknown IDs are 404.
pub(crate) async fn xhr_send(
    State(app): State<App>,
    Path((server, session)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    match send_payload(&app, &server, &session, &body).await {
        Ok(()) => (
            StatusCode::NO_CONTENT,
            [(header::CONTENT_TYPE, PLAIN_CONTENT_TYPE)],
        )
            .into_response(),
        Err(response) => response,
    }
}

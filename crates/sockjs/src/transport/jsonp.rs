//! The jsonp transport: polling reads delivered as a script invoking the
//! page's callback, and a send-side endpoint that also accepts form posts.

use axum::extract::{Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;

use super::{
    CallbackQuery, DeliveryMode, Framing, JAVASCRIPT_CONTENT_TYPE, PLAIN_CONTENT_TYPE,
    TransportSpec, attach, required_callback, send_payload,
};
use crate::receiver::ReceiverKind;
use crate::server::App;

/// `GET /{server}/{session}/jsonp?c=callback`: one frame per poll.
pub(crate) async fn jsonp(
    State(app): State<App>,
    Path((server, session)): Path<(String, String)>,
    Query(query): Query<CallbackQuery>,
    parts: Parts,
) -> Response {
    let callback = match required_callback(query) {
        Ok(callback) => callback,
        Err(response) => return response,
    };
    attach(
        app,
        server,
        session,
        parts,
        TransportSpec {
            kind: ReceiverKind::Jsonp,
            framing: Framing::Callback(callback),
            mode: DeliveryMode::Polling,
            content_type: JAVASCRIPT_CONTENT_TYPE,
            prelude: None,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
struct SendForm {
    d: Option<String>,
}

/// `POST /{server}/{session}/jsonp_send`: like `xhr_send`, but the payload
/// may arrive as the `d` field of a form post instead of the raw body.
pub(crate) async fn jsonp_send(
    State(app): State<App>,
    Path((server, session)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = if is_form_post(&headers) {
        match serde_urlencoded::from_bytes::<SendForm>(&body) {
            Ok(form) => Bytes::from(form.d.unwrap_or_default()),
            Err(_) => Bytes::new(),
        }
    } else {
        body
    };
    match send_payload(&app, &server, &session, &payload).await {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PLAIN_CONTENT_TYPE)],
            "ok",
        )
            .into_response(),
        Err(response) => response,
    }
}

fn is_form_post(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_posts_are_detected_by_content_type() {
        let mut headers = HeaderMap::new();
        assert!(!is_form_post(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        assert!(is_form_post(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded; charset=UTF-8".parse().unwrap(),
        );
        assert!(is_form_post(&headers));
    }

    #[test]
    fn form_payload_is_the_d_field() {
        let decoded: SendForm =
            serde_urlencoded::from_bytes(br#"d=%5B%22hello%22%5D"#).unwrap();
        assert_eq!(decoded.d.as_deref(), Some(r#"["hello"]"#));
    }
}

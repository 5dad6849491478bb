//! The htmlfile transport: a streaming response disguised as an endless HTML
//! page, with frames delivered to a parent-page callback through inline
//! `<script>` chunks.

use axum::extract::{Path, Query, State};
use axum::http::request::Parts;
use axum::response::Response;
use bytes::Bytes;

use super::{
    CallbackQuery, DeliveryMode, Framing, HTML_CONTENT_TYPE, TransportSpec, attach,
    required_callback,
};
use crate::receiver::ReceiverKind;
use crate::server::App;

const IFRAME_TEMPLATE: &str = r#"<!doctype html>
<html><head>
  <meta http-equiv="X-UA-Compatible" content="IE=edge" />
  <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
</head><body><h2>Don't panic!</h2>
  <script>
    document.domain = document.domain;
    var c = parent.{{callback}};
    c.start();
    function p(d) {c.message(d);};
    window.onload = function() {c.stop();};
  </script>
"#;

/// IE only starts interpreting the page once it has this many bytes.
const PRELUDE_MIN_SIZE: usize = 1024;

/// `GET /{server}/{session}/htmlfile?c=callback`.
pub(crate) async fn htmlfile(
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
            kind: ReceiverKind::HtmlFile,
            framing: Framing::Script,
            mode: DeliveryMode::Streaming,
            content_type: HTML_CONTENT_TYPE,
            prelude: Some(prelude(&callback)),
        },
    )
    .await
}

/// The rendered template, right-padded with spaces to at least 1024 bytes
/// and terminated with a blank line.
fn prelude(callback: &str) -> Bytes {
    let mut page = IFRAME_TEMPLATE.replace("{{callback}}", callback);
    if page.len() < PRELUDE_MIN_SIZE {
        page.push_str(&" ".repeat(PRELUDE_MIN_SIZE - page.len()));
    }
    page.push_str("\r\n\r\n");
    Bytes::from(page)
}

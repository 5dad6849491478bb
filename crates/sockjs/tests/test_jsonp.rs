mod common;

use std::time::Duration;

use reqwest::StatusCode;
use sockjs::SockJsConfig;
use tokio::time::timeout;

#[tokio::test]
async fn poll_wraps_frames_in_the_callback() -> anyhow::Result<()> {
    common::init();
    let (_server, base) = common::start(SockJsConfig::default()).await?;

    let response = reqwest::get(format!("{base}/000/session/jsonp?c=cb")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "application/javascript; charset=UTF-8"
    );
    assert_eq!(response.text().await?, "cb(\"o\");\r\n");
    Ok(())
}

#[tokio::test]
async fn callback_is_required_and_validated() -> anyhow::Result<()> {
    common::init();
    let (_server, base) = common::start(SockJsConfig::default()).await?;

    let response = reqwest::get(format!("{base}/000/session/jsonp")).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await?, "\"callback\" parameter required");

    let response = reqwest::get(format!("{base}/000/session/jsonp?c=x()")).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await?, "invalid \"callback\" parameter");
    Ok(())
}

#[tokio::test]
async fn send_accepts_raw_json_bodies() -> anyhow::Result<()> {
    common::init();
    let (mut server, base) = common::start(SockJsConfig::default()).await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/000/session/jsonp?c=cb"))
        .send()
        .await?;
    assert_eq!(response.text().await?, "cb(\"o\");\r\n");
    let session = timeout(Duration::from_secs(1), server.next_session())
        .await?
        .expect("server should hand out the new session");

    let response = client
        .post(format!("{base}/000/session/jsonp_send"))
        .body("[\"hello\"]")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/plain; charset=UTF-8"
    );
    assert_eq!(response.text().await?, "ok");
    assert_eq!(session.recv().await, Ok("hello".to_string()));
    Ok(())
}

#[tokio::test]
async fn send_accepts_form_posts_with_d_field() -> anyhow::Result<()> {
    common::init();
    let (mut server, base) = common::start(SockJsConfig::default()).await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/000/session/jsonp?c=cb"))
        .send()
        .await?;
    assert_eq!(response.text().await?, "cb(\"o\");\r\n");
    let session = timeout(Duration::from_secs(1), server.next_session())
        .await?
        .expect("server should hand out the new session");

    let response = client
        .post(format!("{base}/000/session/jsonp_send"))
        .header(
            reqwest::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body("d=%5B%22world%22%5D")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "ok");
    assert_eq!(session.recv().await, Ok("world".to_string()));

    // a form post without the payload field is an absent payload
    let response = client
        .post(format!("{base}/000/session/jsonp_send"))
        .header(
            reqwest::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body("x=y")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await?, "Payload expected.");
    Ok(())
}

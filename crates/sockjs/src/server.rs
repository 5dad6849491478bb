//! The HTTP-facing dispatcher: URL wiring, the session registry, and the
//! hand-off of new sessions to the application.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::request::Parts;
use axum::routing::{get, post};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::session::Session;
use crate::transport::{htmlfile, jsonp, xhr};

type SessionStore = Arc<RwLock<HashMap<String, Arc<Session>>>>;

/// Server configuration with the SockJS protocol defaults.
#[derive(Debug, Clone)]
pub struct SockJsConfig {
    pub bind: SocketAddr,
    /// Interval between `h` frames while a receiver is attached.
    pub heartbeat_delay: Duration,
    /// Grace period without any receiver before a session is closed.
    pub disconnect_delay: Duration,
    /// Byte budget for a streaming response before the receiver finishes
    /// and the client is expected to reconnect.
    pub response_limit: usize,
    /// Cancelling this token closes every live session with
    /// `c[3000,"Go away!"]` and shuts the HTTP server down.
    pub ct: CancellationToken,
}

impl SockJsConfig {
    pub const DEFAULT_HEARTBEAT_DELAY: Duration = Duration::from_secs(25);
    pub const DEFAULT_DISCONNECT_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_RESPONSE_LIMIT: usize = 128 * 1024;
}

impl Default for SockJsConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            heartbeat_delay: Self::DEFAULT_HEARTBEAT_DELAY,
            disconnect_delay: Self::DEFAULT_DISCONNECT_DELAY,
            response_limit: Self::DEFAULT_RESPONSE_LIMIT,
            ct: CancellationToken::new(),
        }
    }
}

/// Shared state behind the axum handlers.
#[derive(Clone)]
pub(crate) struct App {
    sessions: SessionStore,
    session_tx: mpsc::UnboundedSender<Arc<Session>>,
    heartbeat_delay: Duration,
    disconnect_delay: Duration,
    pub(crate) response_limit: usize,
}

impl App {
    fn new(config: &SockJsConfig) -> (Self, mpsc::UnboundedReceiver<Arc<Session>>) {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: Default::default(),
                session_tx,
                heartbeat_delay: config.heartbeat_delay,
                disconnect_delay: config.disconnect_delay,
                response_limit: config.response_limit,
            },
            session_rx,
        )
    }

    /// Returns the session for a receiver-side request, creating it (and
    /// handing it to the application) when the ID is unknown.
    pub(crate) async fn session_for_attach(&self, session_id: &str, parts: Parts) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(session_id) {
            return session.clone();
        }
        tracing::debug!(session = %session_id, "new session");
        let session = Session::new(
            session_id.to_owned(),
            Some(parts),
            self.disconnect_delay,
            self.heartbeat_delay,
        );
        sessions.insert(session_id.to_owned(), session.clone());
        let _ = self.session_tx.send(session.clone());

        // drop the registry entry once the session fully closes
        let sessions = self.sessions.clone();
        let closed = session.closed();
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            closed.cancelled().await;
            sessions.write().await.remove(&session_id);
            tracing::debug!(session = %session_id, "session removed");
        });
        session
    }

    /// Send-side requests never create sessions.
    pub(crate) async fn session_lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }
}

/// Path segments for `server` and `session` must be non-empty and must not
/// contain dots.
pub(crate) fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('.')
}

/// A running SockJS endpoint.
///
/// `new` yields the axum `Router` for embedding into a larger application;
/// `serve` / `serve_with_config` bind and run it. New sessions arrive
/// through [`next_session`](Self::next_session) or are dispatched by
/// [`with_session_handler`](Self::with_session_handler).
pub struct SockJsServer {
    session_rx: mpsc::UnboundedReceiver<Arc<Session>>,
    pub config: SockJsConfig,
}

impl SockJsServer {
    pub async fn serve(bind: SocketAddr) -> io::Result<Self> {
        Self::serve_with_config(SockJsConfig {
            bind,
            ..SockJsConfig::default()
        })
        .await
    }

    pub async fn serve_with_config(mut config: SockJsConfig) -> io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(config.bind).await?;
        // Update config with actual bound address (important when port is 0)
        config.bind = listener.local_addr()?;
        let (server, router) = Self::new(config);
        let ct = server.config.ct.child_token();
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            ct.cancelled().await;
            tracing::info!("sockjs server cancelled");
        });
        tokio::spawn(async move {
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "sockjs server shutdown with error");
            }
        });
        Ok(server)
    }

    /// Builds the server and its `Router` for embedding into a larger axum
    /// application. Must be called inside a tokio runtime.
    pub fn new(config: SockJsConfig) -> (SockJsServer, Router) {
        let (app, session_rx) = App::new(&config);

        // shutdown tells every live session to go away
        let sessions = app.sessions.clone();
        let ct = config.ct.clone();
        tokio::spawn(async move {
            ct.cancelled().await;
            let live = sessions.read().await.values().cloned().collect::<Vec<_>>();
            for session in live {
                let _ = session.close(3000, "Go away!");
            }
        });

        let router = Router::new()
            .route("/{server}/{session}/xhr", post(xhr::xhr_poll))
            .route("/{server}/{session}/xhr_streaming", post(xhr::xhr_streaming))
            .route("/{server}/{session}/xhr_send", post(xhr::xhr_send))
            .route("/{server}/{session}/htmlfile", get(htmlfile::htmlfile))
            .route("/{server}/{session}/jsonp", get(jsonp::jsonp))
            .route("/{server}/{session}/jsonp_send", post(jsonp::jsonp_send))
            .with_state(app);

        (SockJsServer { session_rx, config }, router)
    }

    /// Waits for the next session created by a receiver-side request.
    pub async fn next_session(&mut self) -> Option<Arc<Session>> {
        self.session_rx.recv().await
    }

    /// Spawns `handler` for every new session and returns the server's
    /// cancellation token.
    pub fn with_session_handler<F, Fut>(mut self, handler: F) -> CancellationToken
    where
        F: Fn(Arc<Session>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ct = self.config.ct.clone();
        tokio::spawn(async move {
            while let Some(session) = self.next_session().await {
                tokio::spawn(handler(session));
            }
        });
        ct
    }

    pub fn cancel(&self) {
        self.config.ct.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> Parts {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/server/session/xhr")
            .body(())
            .unwrap();
        request.into_parts().0
    }

    #[test]
    fn segments_reject_empty_and_dotted() {
        assert!(valid_segment("server"));
        assert!(valid_segment("123"));
        assert!(!valid_segment(""));
        assert!(!valid_segment(".."));
        assert!(!valid_segment("a.b"));
    }

    #[tokio::test]
    async fn attach_creates_sessions_and_send_side_does_not() {
        let config = SockJsConfig::default();
        let (app, mut session_rx) = App::new(&config);

        assert!(app.session_lookup("session").await.is_none());
        let created = app.session_for_attach("session", parts()).await;
        assert_eq!(created.id(), "session");

        // the application is handed exactly the created session
        let handed = session_rx.recv().await.unwrap();
        assert!(Arc::ptr_eq(&created, &handed));

        // a second attach-side request reuses it
        let reused = app.session_for_attach("session", parts()).await;
        assert!(Arc::ptr_eq(&created, &reused));
        assert!(app.session_lookup("session").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn registry_entry_is_removed_when_the_session_closes() {
        let config = SockJsConfig {
            disconnect_delay: Duration::from_millis(10),
            ..SockJsConfig::default()
        };
        let (app, _session_rx) = App::new(&config);
        let session = app.session_for_attach("session", parts()).await;
        session.closed().cancelled().await;
        // the cleanup task runs right after the close signal
        for _ in 0..10 {
            if app.session_lookup("session").await.is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(app.session_lookup("session").await.is_none());
    }

    #[tokio::test]
    async fn server_new_returns_actual_config() {
        let config = SockJsConfig::default();
        let (server, router) = SockJsServer::new(config);
        assert_eq!(
            server.config.heartbeat_delay,
            SockJsConfig::DEFAULT_HEARTBEAT_DELAY
        );
        drop(router);
    }
}

//! A SockJS-compatible server core: WebSocket-like, ordered, bidirectional
//! message channels emulated over plain HTTP.
//!
//! A logical [`Session`] is multiplexed across short- or long-lived HTTP
//! requests. Receiver-side requests (`xhr`, `xhr_streaming`, `htmlfile`,
//! `jsonp`) carry frames to the client; send-side requests (`xhr_send`,
//! `jsonp_send`) inject messages into the session's receive queue. The
//! application talks to a session through [`Session::send`],
//! [`Session::recv`] and [`Session::close`].
//!
//! ```ignore
//! let server = sockjs::SockJsServer::serve("127.0.0.1:8080".parse()?).await?;
//! server.with_session_handler(|session| async move {
//!     while let Ok(message) = session.recv().await {
//!         let _ = session.send(message); // echo
//!     }
//! });
//! ```

mod error;
pub use error::{PayloadError, ReceiverClosed, SessionError};

/// SockJS wire frame encoding and send-side payload decoding.
pub mod frame;

mod receiver;
pub use receiver::ReceiverKind;

mod server;
pub use server::{SockJsConfig, SockJsServer};

mod session;
pub use session::{Session, SessionState};

mod transport;

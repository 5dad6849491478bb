use tokio_util::sync::CancellationToken;

use crate::error::ReceiverClosed;

/// Transport flavor of a receiver, retained by the session so applications
/// can tell which transport a client ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    None,
    Xhr,
    XhrStreaming,
    HtmlFile,
    EventSource,
    Jsonp,
    WebSocket,
    RawWebSocket,
}

/// Sink for one HTTP request's outbound direction.
///
/// A receiver lives at most as long as its HTTP request. It accepts frames
/// only until its done signal trips: because the transport delivered its one
/// poll result, because the byte budget ran out, or because the client went
/// away. The session watches both signals and detaches on either.
pub(crate) trait Receiver: Send + Sync + 'static {
    fn kind(&self) -> ReceiverKind;

    /// True while the receiver can still accept frames.
    fn can_send(&self) -> bool;

    /// Encodes and transmits `messages` as one `a[...]` frame. Batching is
    /// mandatory; several ready messages never produce several frames.
    fn send_bulk(&self, messages: &[String]) -> Result<(), ReceiverClosed>;

    /// Transmits one already-encoded frame (`o`, `h` or `c[...]`) literally.
    fn send_frame(&self, frame: &str) -> Result<(), ReceiverClosed>;

    /// Trips when the receiver has finished.
    fn done(&self) -> CancellationToken;

    /// Trips when the HTTP client disconnected mid-request.
    fn interrupted(&self) -> CancellationToken;

    /// Causes the done signal to trip.
    fn close(&self);
}

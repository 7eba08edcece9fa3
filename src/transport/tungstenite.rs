//! Socket factory backed by `tokio-tungstenite`.
//!
//! Each socket is driven by its own tokio task that owns the WebSocket
//! stream. The handle talks to that task over a channel and reads the ready
//! state from a shared atomic, so every [`RawSocket`] operation returns
//! immediately.
//!
//! # Event Loop
//!
//! The driver task handles:
//!
//! - The opening handshake (subprotocols, extra headers, optional timeout)
//! - Incoming frames (data, pong, close)
//! - Outgoing frames queued by the handle (data, ping, close)
//! - The close timeout, armed once either side starts the close handshake
//!
//! Failures follow the browser convention: `Error` first, then `Close`
//! with code 1006. A close handshake the peer never finishes also ends in
//! `Close` with code 1006.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, trace, warn};
use url::Url;

use crate::connection::timer::Deadline;
use crate::error::{Error, Result};
use crate::protocol::{CloseFrame, Payload};

use super::{
    RawSocket, ReadyState, SendCallback, SocketEvent, SocketEvents, SocketFactory,
    TransportOptions,
};

// ============================================================================
// Types
// ============================================================================

/// Client stream produced by the handshake.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sender half of a socket's event stream.
type EventSender = mpsc::UnboundedSender<SocketEvent>;

/// Outbound work for the driver task.
enum Outbound {
    /// Write a data frame.
    Send {
        payload: Payload,
        callback: Option<SendCallback>,
    },
    /// Write a ping frame.
    Ping(Vec<u8>),
    /// Start the close handshake.
    Close(Option<CloseFrame>),
}

// ============================================================================
// TungsteniteFactory
// ============================================================================

/// Default [`SocketFactory`] using `tokio-tungstenite`.
///
/// `wss://` addresses need the `rustls-tls` or `native-tls` feature.
///
/// # Panics
///
/// [`SocketFactory::create`] spawns the driver task and must be called from
/// within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteFactory;

impl TungsteniteFactory {
    /// Creates the factory.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SocketFactory for TungsteniteFactory {
    fn create(
        &self,
        url: &Url,
        protocols: &[String],
        options: &TransportOptions,
    ) -> (Arc<dyn RawSocket>, SocketEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));

        let task = tokio::spawn(drive(
            url.clone(),
            protocols.to_vec(),
            options.clone(),
            Arc::clone(&ready),
            outbound_rx,
            events_tx,
        ));

        debug!(url = %url, "Socket created");

        let socket = TungsteniteSocket {
            ready,
            outbound_tx,
            task: Mutex::new(Some(task.abort_handle())),
        };

        (Arc::new(socket), events_rx)
    }
}

// ============================================================================
// TungsteniteSocket
// ============================================================================

/// Handle to one driver task.
struct TungsteniteSocket {
    /// Ready state shared with the driver.
    ready: Arc<AtomicU8>,
    /// Channel to the driver.
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Abort handle, taken on terminate.
    task: Mutex<Option<AbortHandle>>,
}

impl RawSocket for TungsteniteSocket {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready.load(Ordering::Acquire))
    }

    fn send(&self, payload: Payload, callback: Option<SendCallback>) {
        if let Err(mpsc::error::SendError(Outbound::Send {
            callback: Some(callback),
            ..
        })) = self.outbound_tx.send(Outbound::Send { payload, callback })
        {
            callback(Err(Error::ConnectionClosed));
        }
    }

    fn ping(&self, payload: Vec<u8>) {
        let _ = self.outbound_tx.send(Outbound::Ping(payload));
    }

    fn close(&self, frame: Option<CloseFrame>) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        let _ = self.outbound_tx.send(Outbound::Close(frame));
    }

    fn terminate(&self) {
        set_ready(&self.ready, ReadyState::Closed);
        if let Some(task) = self.task.lock().take() {
            task.abort();
            trace!("Socket driver aborted");
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Runs one socket from handshake to close.
async fn drive(
    url: Url,
    protocols: Vec<String>,
    options: TransportOptions,
    ready: Arc<AtomicU8>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: EventSender,
) {
    let stream = match handshake(&url, &protocols, &options).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(url = %url, error = %e, "Handshake failed");
            set_ready(&ready, ReadyState::Closed);
            let _ = events_tx.send(SocketEvent::Error(e.to_string()));
            let _ = events_tx.send(SocketEvent::Close(CloseFrame::new(
                CloseFrame::ABNORMAL,
                "",
            )));
            return;
        }
    };

    set_ready(&ready, ReadyState::Open);
    let _ = events_tx.send(SocketEvent::Open);

    let close_timeout = options.close_timeout_or_default();
    let frame = run_event_loop(stream, &ready, outbound_rx, &events_tx, close_timeout).await;

    set_ready(&ready, ReadyState::Closed);
    debug!(code = frame.code, reason = %frame.reason, "Socket closed");
    let _ = events_tx.send(SocketEvent::Close(frame));
}

/// Performs the opening handshake.
async fn handshake(url: &Url, protocols: &[String], options: &TransportOptions) -> Result<WsStream> {
    let request = build_request(url, protocols, options)?;

    let mut config = WebSocketConfig::default();
    if let Some(max) = options.max_payload {
        config = config.max_message_size(Some(max));
    }
    if let Some(max) = options.max_frame_size {
        config = config.max_frame_size(Some(max));
    }

    let connect = connect_async_with_config(request, Some(config), false);
    let (stream, _response) = match options.handshake_timeout {
        Some(limit) => timeout(limit, connect).await.map_err(|_| {
            Error::connection(format!(
                "Opening handshake timed out after {}ms",
                limit.as_millis()
            ))
        })??,
        None => connect.await?,
    };

    Ok(stream)
}

/// Builds the upgrade request with subprotocols and extra headers.
fn build_request(url: &Url, protocols: &[String], options: &TransportOptions) -> Result<Request> {
    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();

    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| Error::config(format!("Invalid subprotocol list: {e}")))?;
        headers.insert("Sec-WebSocket-Protocol", value);
    }

    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("Invalid header value for '{name}': {e}")))?;
        headers.insert(name, value);
    }

    Ok(request)
}

/// Pumps frames until the socket closes. Returns the close frame to report.
async fn run_event_loop(
    stream: WsStream,
    ready: &AtomicU8,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: &EventSender,
    close_timeout: Duration,
) -> CloseFrame {
    let (mut ws_write, mut ws_read) = stream.split();
    let mut peer_close: Option<CloseFrame> = None;
    let mut closing = false;
    let mut close_deadline = Deadline::new();

    loop {
        tokio::select! {
            // Incoming frames from the peer
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events_tx.send(SocketEvent::Message(Payload::Text(text.as_str().to_owned())));
                    }

                    Some(Ok(Message::Binary(bytes))) => {
                        let _ = events_tx.send(SocketEvent::Message(Payload::Binary(bytes.to_vec())));
                    }

                    Some(Ok(Message::Pong(_))) => {
                        let _ = events_tx.send(SocketEvent::Pong);
                    }

                    Some(Ok(Message::Close(frame))) => {
                        set_ready(ready, ReadyState::Closing);
                        if !closing {
                            closing = true;
                            close_deadline.arm(close_timeout);
                        }
                        peer_close = Some(frame.map_or_else(
                            || CloseFrame::new(CloseFrame::NO_STATUS, ""),
                            |frame| CloseFrame::new(u16::from(frame.code), frame.reason.as_str()),
                        ));
                        trace!("Close frame received");
                    }

                    Some(Err(WsError::ConnectionClosed)) | None => break,

                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        let _ = events_tx.send(SocketEvent::Error(e.to_string()));
                        break;
                    }

                    // Pings are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            }

            // Frames queued through the handle
            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Send { payload, callback }) => {
                        let message = match payload {
                            Payload::Text(text) => Message::text(text),
                            Payload::Binary(bytes) => Message::binary(bytes),
                        };
                        let result = ws_write.send(message).await.map_err(Error::from);
                        if let Some(callback) = callback {
                            callback(result);
                        }
                    }

                    Some(Outbound::Ping(data)) => {
                        if let Err(e) = ws_write.send(Message::Ping(data.into())).await {
                            debug!(error = %e, "Failed to send ping");
                        }
                    }

                    Some(Outbound::Close(frame)) => {
                        set_ready(ready, ReadyState::Closing);
                        if !closing {
                            closing = true;
                            close_deadline.arm(close_timeout);
                        }
                        let frame = frame.map(|frame| WsCloseFrame {
                            code: frame.code.into(),
                            reason: Utf8Bytes::from(frame.reason),
                        });
                        if let Err(e) = ws_write.send(Message::Close(frame)).await {
                            debug!(error = %e, "Failed to send close frame");
                        }
                    }

                    // Handle dropped
                    None => break,
                }
            }

            // Peer never finished the close handshake
            () = close_deadline.expired() => {
                debug!(timeout = ?close_timeout, "Close handshake timed out");
                break;
            }
        }
    }

    peer_close.unwrap_or_else(|| CloseFrame::new(CloseFrame::ABNORMAL, ""))
}

/// Stores a ready state.
#[inline]
fn set_ready(ready: &AtomicU8, state: ReadyState) {
    ready.store(state as u8, Ordering::Release);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Binds a local echo server that answers pings and closes on "bye".
    async fn echo_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        match message {
                            Message::Text(text) if text.as_str() == "bye" => {
                                let _ = ws
                                    .close(Some(WsCloseFrame {
                                        code: 4000.into(),
                                        reason: Utf8Bytes::from_static("server done"),
                                    }))
                                    .await;
                            }
                            Message::Text(_) | Message::Binary(_) => {
                                let _ = ws.send(message).await;
                            }
                            Message::Ping(data) => {
                                let _ = ws.send(Message::Pong(data)).await;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        Url::parse(&format!("ws://127.0.0.1:{port}")).expect("valid url")
    }

    /// Binds a server that completes the handshake, then never reads again.
    async fn silent_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let _held = ws;
                    std::future::pending::<()>().await;
                });
            }
        });

        Url::parse(&format!("ws://127.0.0.1:{port}")).expect("valid url")
    }

    async fn next_event(events: &mut SocketEvents) -> SocketEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("event stream open")
    }

    #[tokio::test]
    async fn test_open_then_echo() {
        let url = echo_server().await;
        let (socket, mut events) =
            TungsteniteFactory::new().create(&url, &[], &TransportOptions::default());

        assert_eq!(next_event(&mut events).await, SocketEvent::Open);
        assert_eq!(socket.ready_state(), ReadyState::Open);

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        socket.send(
            Payload::from("hello"),
            Some(Box::new(move |result: Result<()>| {
                let _ = done_tx.send(result.is_ok());
            })),
        );

        assert!(done_rx.await.expect("callback invoked"));
        assert_eq!(
            next_event(&mut events).await,
            SocketEvent::Message(Payload::from("hello"))
        );
    }

    #[tokio::test]
    async fn test_ping_yields_pong() {
        let url = echo_server().await;
        let (socket, mut events) =
            TungsteniteFactory::new().create(&url, &[], &TransportOptions::default());

        assert_eq!(next_event(&mut events).await, SocketEvent::Open);
        socket.ping(b"ping".to_vec());
        assert_eq!(next_event(&mut events).await, SocketEvent::Pong);
    }

    #[tokio::test]
    async fn test_peer_close_reports_code_and_reason() {
        let url = echo_server().await;
        let (socket, mut events) =
            TungsteniteFactory::new().create(&url, &[], &TransportOptions::default());

        assert_eq!(next_event(&mut events).await, SocketEvent::Open);
        socket.send(Payload::from("bye"), None);

        assert_eq!(
            next_event(&mut events).await,
            SocketEvent::Close(CloseFrame::new(4000, "server done"))
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_unanswered_close_times_out_as_abnormal() {
        let url = silent_server().await;
        let options = TransportOptions::new().with_close_timeout(Duration::from_millis(200));
        let (socket, mut events) = TungsteniteFactory::new().create(&url, &[], &options);

        assert_eq!(next_event(&mut events).await, SocketEvent::Open);
        let started = std::time::Instant::now();
        socket.close(Some(CloseFrame::new(1000, "bye")));

        assert_eq!(
            next_event(&mut events).await,
            SocketEvent::Close(CloseFrame::new(CloseFrame::ABNORMAL, ""))
        );
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("valid url");
        let (socket, mut events) =
            TungsteniteFactory::new().create(&url, &[], &TransportOptions::default());

        assert!(matches!(next_event(&mut events).await, SocketEvent::Error(_)));
        assert_eq!(
            next_event(&mut events).await,
            SocketEvent::Close(CloseFrame::new(CloseFrame::ABNORMAL, ""))
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_terminate_closes_immediately() {
        let url = echo_server().await;
        let (socket, mut events) =
            TungsteniteFactory::new().create(&url, &[], &TransportOptions::default());

        assert_eq!(next_event(&mut events).await, SocketEvent::Open);
        socket.terminate();
        assert_eq!(socket.ready_state(), ReadyState::Closed);

        // Aborted driver drops its sender without a close event
        let next = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("stream ends");
        assert_eq!(next, None);
    }

    #[test]
    fn test_build_request_sets_protocols_and_headers() {
        let url = Url::parse("ws://localhost:9000/feed").expect("valid url");
        let options = TransportOptions::new().with_header("X-Api-Key", "secret");
        let request = build_request(
            &url,
            &["graphql-ws".to_owned(), "json".to_owned()],
            &options,
        )
        .expect("request");

        assert_eq!(
            request.headers().get("Sec-WebSocket-Protocol"),
            Some(&HeaderValue::from_static("graphql-ws, json"))
        );
        assert_eq!(
            request.headers().get("x-api-key"),
            Some(&HeaderValue::from_static("secret"))
        );
    }

    #[test]
    fn test_build_request_rejects_bad_header() {
        let url = Url::parse("ws://localhost:9000").expect("valid url");
        let options = TransportOptions::new().with_header("bad header", "x");
        assert!(build_request(&url, &[], &options).is_err());
    }
}

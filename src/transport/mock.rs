//! In-memory socket factory for driving the state machine in tests.
//!
//! Sockets never open on their own: the test decides when a socket opens,
//! pongs, errors or closes, and inspects what the connection sent to it.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::protocol::{CloseFrame, Payload};

use super::{
    RawSocket, ReadyState, SendCallback, SocketEvent, SocketEvents, SocketFactory,
    TransportOptions,
};

// ============================================================================
// MockFactory
// ============================================================================

/// Factory that hands every created socket to the test.
pub(crate) struct MockFactory {
    created_tx: mpsc::UnboundedSender<MockSocket>,
}

impl MockFactory {
    /// Creates the factory and the receiver of created sockets.
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        let (created_tx, created_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { created_tx }), created_rx)
    }
}

impl SocketFactory for MockFactory {
    fn create(
        &self,
        url: &Url,
        protocols: &[String],
        _options: &TransportOptions,
    ) -> (Arc<dyn RawSocket>, SocketEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let socket = MockSocket {
            inner: Arc::new(MockInner {
                url: url.clone(),
                protocols: protocols.to_vec(),
                ready: AtomicU8::new(ReadyState::Connecting as u8),
                events_tx,
                sent: Mutex::new(Vec::new()),
                pings: AtomicUsize::new(0),
                close_requests: Mutex::new(Vec::new()),
                terminated: AtomicBool::new(false),
            }),
        };
        let _ = self.created_tx.send(socket.clone());
        (Arc::new(socket), events_rx)
    }
}

// ============================================================================
// MockSocket
// ============================================================================

struct MockInner {
    url: Url,
    protocols: Vec<String>,
    ready: AtomicU8,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    sent: Mutex<Vec<Payload>>,
    pings: AtomicUsize,
    close_requests: Mutex<Vec<Option<CloseFrame>>>,
    terminated: AtomicBool,
}

/// Test-controlled socket. Clones share state.
#[derive(Clone)]
pub(crate) struct MockSocket {
    inner: Arc<MockInner>,
}

impl MockSocket {
    fn set_ready(&self, state: ReadyState) {
        self.inner.ready.store(state as u8, Ordering::SeqCst);
    }

    fn push(&self, event: SocketEvent) {
        // Detached listeners make this a no-op
        let _ = self.inner.events_tx.send(event);
    }

    /// Completes the opening handshake.
    pub(crate) fn open(&self) {
        self.set_ready(ReadyState::Open);
        self.push(SocketEvent::Open);
    }

    /// Delivers a pong.
    pub(crate) fn pong(&self) {
        self.push(SocketEvent::Pong);
    }

    /// Delivers a data frame.
    pub(crate) fn message(&self, payload: impl Into<Payload>) {
        self.push(SocketEvent::Message(payload.into()));
    }

    /// Reports a transport error.
    pub(crate) fn error(&self, message: &str) {
        self.push(SocketEvent::Error(message.to_owned()));
    }

    /// Closes from the peer side.
    pub(crate) fn peer_close(&self, code: u16, reason: &str) {
        self.set_ready(ReadyState::Closed);
        self.push(SocketEvent::Close(CloseFrame::new(code, reason)));
    }

    pub(crate) fn url(&self) -> &Url {
        &self.inner.url
    }

    pub(crate) fn protocols(&self) -> &[String] {
        &self.inner.protocols
    }

    pub(crate) fn sent(&self) -> Vec<Payload> {
        self.inner.sent.lock().clone()
    }

    pub(crate) fn pings(&self) -> usize {
        self.inner.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn close_requests(&self) -> Vec<Option<CloseFrame>> {
        self.inner.close_requests.lock().clone()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }
}

impl RawSocket for MockSocket {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.inner.ready.load(Ordering::SeqCst))
    }

    fn send(&self, payload: Payload, callback: Option<SendCallback>) {
        self.inner.sent.lock().push(payload);
        if let Some(callback) = callback {
            callback(Ok(()));
        }
    }

    fn ping(&self, _payload: Vec<u8>) {
        self.inner.pings.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self, frame: Option<CloseFrame>) {
        self.set_ready(ReadyState::Closing);
        self.inner.close_requests.lock().push(frame);
    }

    fn terminate(&self) {
        self.set_ready(ReadyState::Closed);
        self.inner.terminated.store(true, Ordering::SeqCst);
    }
}

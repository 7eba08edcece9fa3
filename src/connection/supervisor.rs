//! Lifecycle state machine.
//!
//! One [`Supervisor`] task per connection owns every piece of mutable
//! lifecycle state and serializes all transitions through a single
//! `tokio::select!` loop:
//!
//! - Commands from the handles (close, or all handles dropped)
//! - Events of the current socket generation
//! - The ack deadline (no pong in time)
//! - The reconnect backoff
//! - The probe ticker
//!
//! # Transitions
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | Init | hook done, socket created | Connecting |
//! | Connecting | `Open` | Connected |
//! | Connecting / Connected | `Close`, `Error`, ack deadline | Reconnecting |
//! | Reconnecting | backoff elapsed | Init |
//! | any | close | Closed |
//!
//! Every failure trigger funnels into `reconnect`, which is a no-op while a
//! reconnect is already scheduled or after close. Entering Reconnecting
//! drops the generation's event receiver before terminating its socket, so
//! nothing from a retired socket can reach the current state.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};
use url::{Position, Url};

use crate::error::{Error, Result};
use crate::protocol::{CloseFrame, ConnectionEvent, EventBus, Payload};
use crate::transport::{RawSocket, SocketEvent, SocketEvents, SocketFactory};

use super::options::ConnectionOptions;
use super::state::LifecycleState;
use super::timer::{Deadline, Ticker};

// ============================================================================
// Constants
// ============================================================================

/// Body of every liveness probe.
const PING_PAYLOAD: &[u8] = b"ping";

// ============================================================================
// Types
// ============================================================================

/// Error returned by a pre-connect hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Pre-connect hook, called with the number of connect attempts made so far.
pub type BeforeConnect =
    Arc<dyn Fn(u32) -> BoxFuture<'static, std::result::Result<(), HookError>> + Send + Sync>;

/// Requests from handles to the supervisor.
pub(crate) enum ConnectionCommand {
    /// Close for good, optionally with a close frame.
    Close(Option<CloseFrame>),
}

/// Whether the event loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between the handles and the supervisor.
pub(crate) struct Shared {
    /// Address used by the next connect.
    pub(crate) address: Mutex<String>,
    /// Current socket handle, replaced wholesale on each connect.
    pub(crate) socket: Mutex<Option<Arc<dyn RawSocket>>>,
    /// Set once by close or a fatal error, never cleared.
    pub(crate) closed: AtomicBool,
    /// Listener registry.
    pub(crate) bus: EventBus,
    /// Published lifecycle state.
    pub(crate) state_tx: watch::Sender<LifecycleState>,
}

impl Shared {
    /// Creates the shared state for a connection to `address`.
    pub(crate) fn new(address: String) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Init);
        Self {
            address: Mutex::new(address),
            socket: Mutex::new(None),
            closed: AtomicBool::new(false),
            bus: EventBus::new(),
            state_tx,
        }
    }

    /// Returns the current socket, if one was ever created.
    #[inline]
    pub(crate) fn current_socket(&self) -> Option<Arc<dyn RawSocket>> {
        self.socket.lock().clone()
    }

    /// Returns `true` once closed.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Address Helpers
// ============================================================================

/// Parses and validates a WebSocket address.
pub(crate) fn parse_address(address: &str) -> Result<Url> {
    let url = Url::parse(address).map_err(|e| Error::invalid_address(address, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::invalid_address(
            address,
            format!("unsupported scheme '{other}', expected ws or wss"),
        )),
    }
}

/// Formats `scheme://host:port` for status messages.
fn describe_target(url: &Url) -> String {
    format!(
        "{}://{}",
        url.scheme(),
        &url[Position::BeforeHost..Position::AfterPort]
    )
}

/// Receives the next event of the current generation, if any.
async fn next_event(events: &mut Option<SocketEvents>) -> Option<SocketEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Owner of one connection's lifecycle.
pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    options: ConnectionOptions,
    ack_deadline: Duration,
    before_connect: Option<BeforeConnect>,
    factory: Arc<dyn SocketFactory>,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,

    /// Connect calls so far. Never reset.
    attempt: u32,
    /// True only between a detected failure and the next connect.
    reconnecting: bool,
    /// Close processed.
    closed: bool,
    /// Target of the current generation.
    url: Option<Url>,
    /// Event stream of the current generation. `None` once detached.
    events: Option<SocketEvents>,

    probe: Ticker,
    ack: Deadline,
    backoff: Deadline,
}

impl Supervisor {
    /// Creates a supervisor. Nothing happens until [`Supervisor::run`].
    pub(crate) fn new(
        shared: Arc<Shared>,
        options: ConnectionOptions,
        before_connect: Option<BeforeConnect>,
        factory: Arc<dyn SocketFactory>,
        commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> Self {
        let ack_deadline = options.ack_deadline();
        Self {
            shared,
            options,
            ack_deadline,
            before_connect,
            factory,
            commands,
            attempt: 0,
            reconnecting: false,
            closed: false,
            url: None,
            events: None,
            probe: Ticker::new(),
            ack: Deadline::new(),
            backoff: Deadline::new(),
        }
    }

    /// Runs the state machine until closed, failed or orphaned.
    pub(crate) async fn run(mut self) {
        let mut flow = self.init().await;
        while flow == Flow::Continue {
            flow = self.step().await;
        }

        // Nothing is emitted past this point; release callbacks and any
        // handles they captured
        self.shared.bus.clear();
        debug!(attempt = self.attempt, "Supervisor stopped");
    }

    /// Waits for the next trigger and applies it.
    async fn step(&mut self) -> Flow {
        tokio::select! {
            biased;

            command = self.commands.recv() => self.on_command(command),

            event = next_event(&mut self.events) => self.on_socket_event(event),

            () = self.ack.expired() => {
                self.on_ack_timeout();
                Flow::Continue
            }

            () = self.backoff.expired() => self.on_backoff_elapsed().await,

            () = self.probe.tick() => {
                self.probe_peer();
                Flow::Continue
            }
        }
    }
}

// ============================================================================
// Supervisor - Connect
// ============================================================================

impl Supervisor {
    /// Runs the pre-connect hook, then connects.
    async fn init(&mut self) -> Flow {
        self.publish(LifecycleState::Init);

        if let Some(hook) = self.before_connect.clone() {
            let attempt = self.attempt;
            trace!(attempt, "Running pre-connect hook");

            let outcome = tokio::select! {
                biased;
                command = self.commands.recv() => return self.on_command(command),
                outcome = hook(attempt) => outcome,
            };

            if let Err(e) = outcome {
                self.fail(Error::before_connect(attempt, e));
                return Flow::Stop;
            }
        }

        // A close may have arrived while the hook was finishing
        if let Ok(command) = self.commands.try_recv() {
            return self.on_command(Some(command));
        }

        self.connect()
    }

    /// Creates the next socket generation.
    fn connect(&mut self) -> Flow {
        self.attempt += 1;
        let attempt = self.attempt;

        let address = self.shared.address.lock().clone();
        let url = match parse_address(&address) {
            Ok(url) => url,
            Err(e) => {
                self.fail(e);
                return Flow::Stop;
            }
        };

        let (socket, events) =
            self.factory
                .create(&url, &self.options.protocols, &self.options.transport);

        *self.shared.socket.lock() = Some(socket);
        self.events = Some(events);
        self.url = Some(url);
        self.probe.arm(self.options.ping_interval);

        debug!(attempt, address = %address, "Connecting");
        self.publish(LifecycleState::Connecting { attempt });
        Flow::Continue
    }
}

// ============================================================================
// Supervisor - Socket Events
// ============================================================================

impl Supervisor {
    fn on_socket_event(&mut self, event: Option<SocketEvent>) -> Flow {
        let Some(event) = event else {
            self.events = None;
            if self.closed {
                return Flow::Stop;
            }
            warn!(attempt = self.attempt, "Socket event stream ended without close");
            self.reconnect();
            return Flow::Continue;
        };

        if self.closed {
            return self.drain(event);
        }

        match event {
            SocketEvent::Open => self.on_open(),
            SocketEvent::Pong => self.on_pong(),
            SocketEvent::Message(payload) => self.on_message(payload),
            SocketEvent::Close(frame) => {
                debug!(attempt = self.attempt, code = frame.code, reason = %frame.reason, "Socket closed");
                self.emit_close(frame);
                self.reconnect();
            }
            SocketEvent::Error(message) => {
                warn!(attempt = self.attempt, error = %message, "Socket error");
                self.status(format!("Error ({}) - {message}", self.attempt));
                self.reconnect();
            }
        }

        Flow::Continue
    }

    fn on_open(&mut self) {
        let attempt = self.attempt;
        let target = self.url.as_ref().map(describe_target).unwrap_or_default();

        self.reconnecting = false;
        self.emit(ConnectionEvent::Open);
        self.status(format!("Connected ({attempt}) - {target}"));
        info!(attempt, address = %target, "Connected");

        self.ack.arm(self.ack_deadline);
        self.publish(LifecycleState::Connected { attempt });
    }

    /// Restarts the full ack window from this pong.
    fn on_pong(&mut self) {
        self.ack.cancel();
        self.emit(ConnectionEvent::Pong);
        self.ack.arm(self.ack_deadline);
        trace!(attempt = self.attempt, "Pong received");
    }

    fn on_message(&self, payload: Payload) {
        let bus = &self.shared.bus;
        if !bus.has_listeners() {
            return;
        }

        let json = payload.to_json();
        bus.emit(ConnectionEvent::Message(payload));
        if let Some(value) = json {
            bus.emit(ConnectionEvent::Json(value));
        }
    }

    /// Handles an event arriving after close: only data and the final
    /// close are forwarded.
    fn drain(&mut self, event: SocketEvent) -> Flow {
        match event {
            SocketEvent::Message(payload) => {
                self.on_message(payload);
                Flow::Continue
            }
            SocketEvent::Close(frame) => {
                self.events = None;
                self.emit_close(frame);
                Flow::Stop
            }
            SocketEvent::Open | SocketEvent::Pong | SocketEvent::Error(_) => {
                trace!(?event, "Ignoring socket event after close");
                Flow::Continue
            }
        }
    }

    fn emit_close(&self, frame: CloseFrame) {
        self.shared.bus.emit(ConnectionEvent::Close {
            code: frame.code,
            reason: frame.reason,
        });
    }
}

// ============================================================================
// Supervisor - Timers
// ============================================================================

impl Supervisor {
    fn on_ack_timeout(&mut self) {
        let deadline_ms = self.ack_deadline.as_millis();
        warn!(attempt = self.attempt, deadline_ms, "No pong within ack deadline");
        self.status(format!(
            "Lost Connection ({}) - No ping back for {deadline_ms}ms.",
            self.attempt
        ));
        self.reconnect();
    }

    fn probe_peer(&self) {
        if let Some(socket) = self.shared.current_socket()
            && socket.ready_state().is_open()
        {
            trace!(attempt = self.attempt, "Sending ping");
            socket.ping(PING_PAYLOAD.to_vec());
        }
    }

    async fn on_backoff_elapsed(&mut self) -> Flow {
        self.reconnecting = false;
        self.status(format!("Reconnecting ({})", self.attempt));
        debug!(attempt = self.attempt, "Backoff elapsed, reconnecting");
        self.init().await
    }

    fn clear_liveness_timers(&mut self) {
        self.probe.cancel();
        self.ack.cancel();
    }

    fn clear_timers(&mut self) {
        self.clear_liveness_timers();
        self.backoff.cancel();
    }
}

// ============================================================================
// Supervisor - Reconnect & Close
// ============================================================================

impl Supervisor {
    /// Single entry point for every failure trigger.
    fn reconnect(&mut self) {
        self.clear_liveness_timers();

        if self.reconnecting || self.closed || self.shared.is_closed() {
            return;
        }

        let attempt = self.attempt;
        let delay = self.options.reconnect_interval;
        self.reconnecting = true;

        self.status(format!(
            "Disconnected ({attempt}) - Retry in {}ms",
            delay.as_millis()
        ));
        warn!(attempt, delay_ms = delay.as_millis(), "Disconnected, scheduling reconnect");

        self.retire_socket();
        self.backoff.arm(delay);
        self.publish(LifecycleState::Reconnecting { attempt });
    }

    /// Detaches the current generation, then terminates its socket.
    fn retire_socket(&mut self) {
        self.events = None;
        if let Some(socket) = self.shared.current_socket() {
            socket.terminate();
        }
    }

    fn on_command(&mut self, command: Option<ConnectionCommand>) -> Flow {
        match command {
            Some(ConnectionCommand::Close(frame)) => self.close(frame),
            None => {
                self.shutdown();
                Flow::Stop
            }
        }
    }

    /// Explicit close. Terminal.
    fn close(&mut self, frame: Option<CloseFrame>) -> Flow {
        if !self.closed {
            self.clear_timers();
            self.closed = true;
            self.reconnecting = false;
            self.shared.closed.store(true, Ordering::SeqCst);

            if let Some(socket) = self.shared.current_socket() {
                socket.close(frame);
            }

            self.shared
                .bus
                .emit(ConnectionEvent::Status(format!("Closed ({})", self.attempt)));
            info!(attempt = self.attempt, "Closed");
            self.publish(LifecycleState::Closed);
        }

        // Keep listening for the graceful close of the current socket
        if self.events.is_some() {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    /// Every handle was dropped.
    fn shutdown(&mut self) {
        debug!(attempt = self.attempt, "All handles dropped, shutting down");
        self.clear_timers();
        self.events = None;
        if let Some(socket) = self.shared.socket.lock().take() {
            socket.terminate();
        }
        self.closed = true;
        self.shared.closed.store(true, Ordering::SeqCst);
        self.publish(LifecycleState::Closed);
    }

    /// Stops for good on a non-retryable error.
    fn fail(&mut self, err: Error) {
        error!(attempt = self.attempt, error = %err, "Connection stopped");
        self.clear_timers();
        self.closed = true;
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.bus.emit(ConnectionEvent::Fatal(err.to_string()));
        self.publish(LifecycleState::Closed);
    }
}

// ============================================================================
// Supervisor - Emission
// ============================================================================

impl Supervisor {
    /// Emits a lifecycle event unless the connection is closed.
    fn emit(&self, event: ConnectionEvent) {
        if !self.shared.is_closed() {
            self.shared.bus.emit(event);
        }
    }

    fn status(&self, text: String) {
        self.emit(ConnectionEvent::Status(text));
    }

    fn publish(&self, state: LifecycleState) {
        self.shared.state_tx.send_replace(state);
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Echo client demo.
//!
//! Connects to a WebSocket echo server, sends a JSON greeting after every
//! open and prints everything the connection reports.
//!
//! Usage:
//!   cargo run --example echo_client -- ws://127.0.0.1:9001 [--debug]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use resilient_ws::{ConnectionEvent, ResilientConnection, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "resilient_ws=debug"
    } else {
        "resilient_ws=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let address = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "ws://127.0.0.1:9001".to_owned());

    init_logging(debug);

    let connection = ResilientConnection::builder(address)
        .reconnect_interval(Duration::from_secs(2))
        .ping_interval(Duration::from_secs(5))
        .before_connect(|attempt| async move {
            println!("[hook] attempts so far: {attempt}");
            Ok::<(), resilient_ws::HookError>(())
        })
        .connect()?;

    let mut events = connection.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Ok(event) = event else { break };
                match event {
                    ConnectionEvent::Open => {
                        connection.send_json(&json!({ "type": "hello" }))?;
                    }
                    ConnectionEvent::Status(text) => println!("[status] {text}"),
                    ConnectionEvent::Json(value) => println!("[json] {value}"),
                    ConnectionEvent::Message(payload) => println!("[message] {payload}"),
                    ConnectionEvent::Close { code, reason } => println!("[close] {code} {reason}"),
                    ConnectionEvent::Fatal(message) => {
                        println!("[fatal] {message}");
                        break;
                    }
                    ConnectionEvent::Pong => {}
                }
            }
        }
    }

    connection.close();
    Ok(())
}

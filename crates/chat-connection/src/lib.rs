//! Client-side lifecycle manager for a persistent chat WebSocket.
//!
//! Opens the connection lazily, keeps it alive across abnormal closures with
//! bounded exponential backoff, closes it after a period of inactivity, and
//! holds the most recent outbound message until the connection is open.
//!
//! # Features
//! - Five-state lifecycle: disconnected, connecting, connected, inactive, errored
//! - Automatic reconnection after abnormal closure only
//! - Connect-on-demand sends with a single pending message (most recent wins)
//! - Re-armable inactivity timeout
//! - Deterministic core: [`Connection`] is a synchronous state machine over
//!   abstract [`Transport`](transport::Transport) and
//!   [`Scheduler`](scheduler::Scheduler) capabilities
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), chat_connection::Error> {
//! use chat_connection::{ChatClient, ConnectionConfig, Event};
//!
//! let config = ConnectionConfig::new("ws://127.0.0.1:8001/chat")?;
//! let mut client = ChatClient::spawn(config);
//! client.send("hello")?;
//!
//! while let Some(event) = client.next().await {
//!     match event {
//!         Event::Message(msg) => println!("{:?}: {}", msg.direction, msg.text),
//!         Event::StateChanged { state } => println!("status: {state}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
pub mod config;
mod inactivity;
mod machine;
pub mod scheduler;
pub mod transport;
mod types;
pub mod ws;

pub use backoff::BackoffPolicy;
pub use client::ChatClient;
pub use config::{ConnectionConfig, ConnectionOptions};
pub use inactivity::InactivityMonitor;
pub use machine::Connection;
pub use types::{ChatMessage, ConnectionState, Direction, Error, Event};

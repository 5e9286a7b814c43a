//! # UltiLink - Device Command-Interface Protocol Stack
//!
//! UltiLink lets a constrained client browse a software catalog and launch
//! entries on an embedded device that is reachable only through a single
//! narrow, half-duplex, register-addressed command channel.
//!
//! Four tightly coupled layers, leaves first:
//!
//! - [`transport`] executes one command/response round-trip at a time
//!   against the polled register interface, including multi-block replies.
//! - [`frame`] tags every frame with a logical target id (filesystem,
//!   network, control) so one channel serves independent subsystems.
//! - [`socket`] synthesizes open/read/write/close byte streams over the
//!   network target.
//! - [`protocol`] is the newline-delimited catalog protocol: a client
//!   endpoint over the socket layer and a multi-peer TCP server fed by
//!   injected catalog, payload and launch capabilities.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use ultilink::registers::MmioBus;
//! use ultilink::transport::Transport;
//! use ultilink::socket::SocketStack;
//! use ultilink::protocol::LineClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = Transport::new(MmioBus::map(0xDF1C)?);
//!     transport.probe()?;
//!     let stack = SocketStack::new(Arc::new(Mutex::new(transport)));
//!     let mut client = LineClient::connect(stack, "catalog.local", 6465).await?;
//!     for cat in client.categories().await? {
//!         println!("{} ({})", cat.name, cat.count);
//!     }
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod dos;
pub mod error;
pub mod frame;
pub mod launch;
pub mod logging;
pub mod protocol;
pub mod registers;
pub mod socket;
pub mod transport;

// Re-export commonly used types
pub use catalog::{CatalogProvider, Entry, FileType, MemoryCatalog, PayloadSource};
pub use config::Config;
pub use error::{ClientError, DosError, LaunchError, SocketError, TransportError};
pub use frame::{CommandFrame, Target};
pub use launch::Launcher;
pub use protocol::{LineClient, LineServer};
pub use registers::{LinkState, RegisterBus};
pub use socket::{SocketHandle, SocketRead, SocketStack};
pub use transport::{Exchange, Status, Transport};

// vim: ts=4

//! Line-oriented application protocol
//!
//! A stateless, textual, newline-delimited request/response protocol for
//! catalog browsing and launching, carried over one socket layer connection
//! per peer. The server side listens on a normal TCP socket; the client
//! side rides on the device's synthesized socket abstraction.

pub mod client;
pub mod command;
pub mod server;

// Re-export public API
pub use client::{CategoryRow, LineClient, Listing, ListingRow};
pub use command::{parse, Command, CommandError};
pub use server::LineServer;

// vim: ts=4

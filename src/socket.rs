//! Socket layer: byte streams synthesized over the network target
//!
//! Presents open/read/write/close against a numbered logical connection,
//! where every operation is really one discrete command/response round-trip
//! on the shared transport. The transport mutex is the exclusive-access
//! guard mandated by the channel: concurrent users serialize here.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::SocketError;
use crate::frame::{CommandFrame, Target, MAX_SOCKET_CHUNK};
use crate::logging::*;
use crate::registers::RegisterBus;
use crate::transport::Transport;

// Network target commands
pub const NET_CMD_TCP_CONNECT: u8 = 0x07;
pub const NET_CMD_SOCKET_CLOSE: u8 = 0x09;
pub const NET_CMD_SOCKET_READ: u8 = 0x10;
pub const NET_CMD_SOCKET_WRITE: u8 = 0x11;

// Status codes of the network target's socket-condition family
const ST_HOST_UNRESOLVED: &str = "30";
const ST_OPEN_FAILED: &str = "31";
const ST_CONNECT_FAILED: &str = "32";
const ST_INVALID_HANDLE: &str = "33";
const ST_NO_DATA: &str = "34";
const ST_CLOSED_BY_HOST: &str = "35";

/// Delay before re-issuing a read that came back empty
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Small integer identifying one open connection on the device.
///
/// Invalidated on close or remote reset; the device may reuse the number,
/// so a handle is only trusted between the open call that returned it and
/// the matching close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketHandle(pub u8);

impl std::fmt::Display for SocketHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Outcome of one read round-trip.
///
/// `Empty` and `Closed` both carry a zero byte count on the wire and are
/// told apart by status alone, never by count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketRead {
	/// Bytes actually returned by the device
	Bytes(Vec<u8>),

	/// Transient empty read; the connection is still up
	Empty,

	/// Connection closed by the host: end of stream
	Closed,
}

/// Socket abstraction over the shared transport
#[derive(Clone)]
pub struct SocketStack<B: RegisterBus> {
	transport: Arc<Mutex<Transport<B>>>,
}

impl<B: RegisterBus> SocketStack<B> {
	pub fn new(transport: Arc<Mutex<Transport<B>>>) -> SocketStack<B> {
		SocketStack { transport }
	}

	/// Access to the shared transport guard (for co-tenants like the
	/// filesystem channel)
	pub fn transport(&self) -> Arc<Mutex<Transport<B>>> {
		self.transport.clone()
	}

	/// Open a TCP connection: port as little-endian u16, host as a
	/// NUL-terminated string. On success byte 0 of the reply is the handle.
	pub async fn open(&self, host: &str, port: u16) -> Result<SocketHandle, SocketError> {
		let mut payload = Vec::with_capacity(host.len() + 3);
		payload.extend_from_slice(&port.to_le_bytes());
		payload.extend_from_slice(host.as_bytes());
		payload.push(0x00);
		let frame = CommandFrame::new(Target::Network, NET_CMD_TCP_CONNECT, payload)?;

		let reply = self.transport.lock().await.exchange(&frame)?;
		if !reply.status.ok() {
			return Err(match reply.status.code.as_str() {
				ST_HOST_UNRESOLVED => SocketError::HostUnresolved { host: host.to_string() },
				ST_OPEN_FAILED => SocketError::OpenFailed { host: host.to_string() },
				ST_CONNECT_FAILED => SocketError::ConnectFailed { host: host.to_string(), port },
				_ => SocketError::Failed {
					code: reply.status.code,
					message: reply.status.message,
				},
			});
		}
		let handle = *reply
			.data
			.first()
			.ok_or(SocketError::OpenFailed { host: host.to_string() })?;
		debug!("Opened socket {} to {}:{}", handle, host, port);
		Ok(SocketHandle(handle))
	}

	/// One read round-trip. The reply's leading two bytes are a
	/// little-endian count of bytes actually returned.
	pub async fn read(
		&self,
		handle: SocketHandle,
		max_len: usize,
	) -> Result<SocketRead, SocketError> {
		let max_len = max_len.min(MAX_SOCKET_CHUNK) as u16;
		let mut payload = vec![handle.0];
		payload.extend_from_slice(&max_len.to_le_bytes());
		let frame = CommandFrame::new(Target::Network, NET_CMD_SOCKET_READ, payload)?;

		let reply = self.transport.lock().await.exchange(&frame)?;
		match reply.status.code.as_str() {
			ST_NO_DATA => return Ok(SocketRead::Empty),
			ST_CLOSED_BY_HOST => {}
			ST_INVALID_HANDLE => return Err(SocketError::InvalidHandle { handle: handle.0 }),
			"00" => {}
			_ => {
				return Err(SocketError::Failed {
					code: reply.status.code,
					message: reply.status.message,
				})
			}
		}

		if reply.data.len() < 2 {
			return Err(SocketError::Failed {
				code: reply.status.code,
				message: "Short read reply".to_string(),
			});
		}
		let count = u16::from_le_bytes([reply.data[0], reply.data[1]]) as usize;
		if count == 0 {
			// Zero count plus the closed-by-host status is end-of-stream;
			// a zero count with success status is treated as transient.
			return if reply.status.code == ST_CLOSED_BY_HOST {
				Ok(SocketRead::Closed)
			} else {
				Ok(SocketRead::Empty)
			};
		}
		let avail = reply.data.len() - 2;
		Ok(SocketRead::Bytes(reply.data[2..2 + count.min(avail)].to_vec()))
	}

	/// One write round-trip; may write fewer bytes than requested
	pub async fn write(&self, handle: SocketHandle, buf: &[u8]) -> Result<usize, SocketError> {
		let chunk = &buf[..buf.len().min(MAX_SOCKET_CHUNK)];
		let mut payload = Vec::with_capacity(chunk.len() + 1);
		payload.push(handle.0);
		payload.extend_from_slice(chunk);
		let frame = CommandFrame::new(Target::Network, NET_CMD_SOCKET_WRITE, payload)?;

		let reply = self.transport.lock().await.exchange(&frame)?;
		match reply.status.code.as_str() {
			"00" => {}
			ST_INVALID_HANDLE => return Err(SocketError::InvalidHandle { handle: handle.0 }),
			_ => {
				return Err(SocketError::Failed {
					code: reply.status.code,
					message: reply.status.message,
				})
			}
		}
		if reply.data.len() >= 2 {
			Ok(u16::from_le_bytes([reply.data[0], reply.data[1]]) as usize)
		} else {
			// Devices predating the count reply wrote the whole chunk
			Ok(chunk.len())
		}
	}

	/// Write the whole buffer, looping over short writes
	pub async fn write_all(&self, handle: SocketHandle, buf: &[u8]) -> Result<(), SocketError> {
		let mut sent = 0;
		while sent < buf.len() {
			let n = self.write(handle, &buf[sent..]).await?;
			if n == 0 {
				return Err(SocketError::Failed {
					code: "00".to_string(),
					message: "Write made no progress".to_string(),
				});
			}
			sent += n;
		}
		Ok(())
	}

	/// Best-effort close; failure (e.g. already closed) is non-fatal
	pub async fn close(&self, handle: SocketHandle) {
		let frame = CommandFrame {
			target: Target::Network,
			command: NET_CMD_SOCKET_CLOSE,
			payload: vec![handle.0],
		};
		match self.transport.lock().await.exchange(&frame) {
			Ok(reply) if !reply.status.ok() => {
				debug!("Close of socket {} returned status {}", handle, reply.status);
			}
			Ok(_) => {}
			Err(e) => debug!("Close of socket {} failed: {}", handle, e),
		}
	}
}

/// Buffers raw read chunks and yields one logical text line at a time.
///
/// Carriage return + line feed is normalized to a single line boundary.
/// Blocks (subject to the caller's own timeout) until a line feed is seen
/// or the stream ends.
pub struct LineBuffer {
	pending: Vec<u8>,
	eof: bool,
}

impl LineBuffer {
	pub fn new() -> LineBuffer {
		LineBuffer { pending: Vec::new(), eof: false }
	}

	/// Next line without its terminator, or `None` at end of stream
	pub async fn read_line<B: RegisterBus>(
		&mut self,
		stack: &SocketStack<B>,
		handle: SocketHandle,
	) -> Result<Option<String>, SocketError> {
		loop {
			if let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
				let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
				line.pop();
				if line.last() == Some(&b'\r') {
					line.pop();
				}
				return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
			}

			if self.eof {
				if self.pending.is_empty() {
					return Ok(None);
				}
				// Final unterminated line
				let mut line = std::mem::take(&mut self.pending);
				if line.last() == Some(&b'\r') {
					line.pop();
				}
				return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
			}

			match stack.read(handle, MAX_SOCKET_CHUNK).await? {
				SocketRead::Bytes(chunk) => self.pending.extend_from_slice(&chunk),
				SocketRead::Empty => tokio::time::sleep(EMPTY_READ_BACKOFF).await,
				SocketRead::Closed => self.eof = true,
			}
		}
	}

	/// True once the closed-by-host status has been observed
	pub fn at_eof(&self) -> bool {
		self.eof && self.pending.is_empty()
	}
}

impl Default for LineBuffer {
	fn default() -> Self {
		LineBuffer::new()
	}
}

// vim: ts=4

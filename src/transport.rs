//! Register transport: one command/response round-trip at a time
//!
//! The transport owns the register bus and executes exchanges against the
//! polled control/status interface. It is the single mutual-exclusion domain
//! of the whole stack: at most one frame is in flight on the channel at any
//! instant, across all targets and logical sockets. Higher layers share one
//! `Transport` behind a mutex instead of touching registers.
//!
//! Two deliberate strengthenings over the original firmware client:
//! polling is bounded by a configurable timeout (surfaced as
//! [`TransportError::Unresponsive`]) and the clear-error/retry loop around
//! the push is bounded (surfaced as [`TransportError::PushRejected`]).

use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::frame::{CommandFrame, Target};
use crate::logging::*;
use crate::registers::*;

/// Identify command, valid on every target
pub const CMD_IDENTIFY: u8 = 0x01;

/// Echo command, valid on every target, side-effect-free
pub const CMD_ECHO: u8 = 0xF0;

/// Poll interval between status register reads
const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Status message attached to every exchange: `"<code>,<description>"`,
/// code `"00"` means success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
	pub code: String,
	pub message: String,
}

impl Status {
	/// Parse the raw status queue bytes
	pub fn parse(bytes: &[u8]) -> Status {
		let text = String::from_utf8_lossy(bytes);
		let text = text.trim_end_matches('\0').trim();
		match text.split_once(',') {
			Some((code, message)) => {
				Status { code: code.to_string(), message: message.to_string() }
			}
			None => Status { code: text.to_string(), message: String::new() },
		}
	}

	pub fn ok(&self) -> bool {
		self.code == "00"
	}
}

impl std::fmt::Display for Status {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.message.is_empty() {
			write!(f, "{}", self.code)
		} else {
			write!(f, "{},{}", self.code, self.message)
		}
	}
}

/// Result of one completed exchange: accumulated reply bytes (all blocks)
/// plus the final status message
#[derive(Debug, Clone)]
pub struct Exchange {
	pub data: Vec<u8>,
	pub status: Status,
}

/// The register transport state machine
pub struct Transport<B: RegisterBus> {
	bus: B,
	poll_timeout: Duration,
	push_retries: u32,
}

impl<B: RegisterBus> Transport<B> {
	pub fn new(bus: B) -> Transport<B> {
		Transport { bus, poll_timeout: Duration::from_millis(500), push_retries: 3 }
	}

	/// Override the bounded-poll and push-retry limits (from configuration)
	pub fn with_limits(bus: B, poll_timeout: Duration, push_retries: u32) -> Transport<B> {
		Transport { bus, poll_timeout, push_retries }
	}

	/// Check for the fixed identifier byte before issuing any command.
	/// An unmapped base address reads as all-ones on every register.
	pub fn probe(&mut self) -> Result<(), TransportError> {
		let status = self.bus.status();
		let id = self.bus.identifier();
		if status == UNMAPPED && id == UNMAPPED {
			return Err(TransportError::NotPresent);
		}
		if id != IDENTIFIER {
			debug!("Probe read identifier {:#04x}, expected {:#04x}", id, IDENTIFIER);
			return Err(TransportError::NotPresent);
		}
		Ok(())
	}

	/// Execute one command/response round-trip.
	///
	/// Pushes the frame, waits for completion, drains every reply block and
	/// the status string. The accept signal is issued after every drained
	/// block on every exit path, including error statuses; skipping it
	/// wedges the machine for all subsequent commands.
	pub fn exchange(&mut self, frame: &CommandFrame) -> Result<Exchange, TransportError> {
		let bytes = frame.encode();
		self.push(&bytes)?;

		let mut data = Vec::new();
		let mut status_bytes: Vec<u8> = Vec::new();

		loop {
			// Wait for the command to leave the busy state
			let state = match self.wait_reply() {
				Ok(state) => state,
				Err(e) => {
					// The machine may still be holding a block; accepting
					// here is the only way to avoid leaving it wedged.
					self.accept();
					return Err(e);
				}
			};

			while self.bus.status() & STAT_DATA_AV != 0 {
				data.push(self.bus.response_data());
			}
			let mut drained = Vec::new();
			while self.bus.status() & STAT_STAT_AV != 0 {
				drained.push(self.bus.status_data());
			}
			if !drained.is_empty() {
				status_bytes = drained;
			}

			self.accept();

			match state {
				LinkState::LastBlock => break,
				LinkState::MoreBlocks => continue,
				// wait_reply only returns data states
				_ => break,
			}
		}

		let status = Status::parse(&status_bytes);
		if !status.ok() {
			debug!("Exchange on {} target ended with status {}", frame.target, status);
		}
		Ok(Exchange { data, status })
	}

	/// Liveness probe: identify is side-effect-free on every target
	pub fn identify(&mut self, target: Target) -> Result<Exchange, TransportError> {
		self.exchange(&CommandFrame::bare(target, CMD_IDENTIFY))
	}

	/// Echo probe: the reply payload mirrors the request payload
	pub fn echo(&mut self, target: Target, payload: &[u8]) -> Result<Exchange, TransportError> {
		let frame = CommandFrame::new(target, CMD_ECHO, payload.to_vec())?;
		self.exchange(&frame)
	}

	/// Stage the frame bytes and push, clearing the error flag and retrying
	/// up to the configured bound
	fn push(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
		let mut attempts = 0;
		loop {
			self.wait_idle()?;

			for b in bytes {
				self.bus.push_data(*b);
			}
			self.bus.control(CTRL_PUSH_CMD);

			if self.bus.status() & STAT_ERROR == 0 {
				return Ok(());
			}

			self.bus.control(CTRL_CLR_ERR);
			attempts += 1;
			if attempts > self.push_retries {
				return Err(TransportError::PushRejected { attempts });
			}
			warn!("Device error flag set on push, retrying ({}/{})", attempts, self.push_retries);
		}
	}

	/// Issue the accept signal and wait for the handshake bit to clear.
	/// Infallible by design: the accept must go out even when the exchange
	/// is being abandoned.
	fn accept(&mut self) {
		self.bus.control(CTRL_DATA_ACC);
		let deadline = Instant::now() + self.poll_timeout;
		while self.bus.status() & STAT_DATA_ACC != 0 {
			if Instant::now() >= deadline {
				warn!("Accept handshake did not clear within the poll timeout");
				break;
			}
			std::thread::sleep(POLL_INTERVAL);
		}
	}

	fn wait_idle(&mut self) -> Result<(), TransportError> {
		self.poll_until(|status| LinkState::from_status(status) == LinkState::Idle)?;
		Ok(())
	}

	/// Poll until the machine reaches a data state
	fn wait_reply(&mut self) -> Result<LinkState, TransportError> {
		let status = self.poll_until(|status| LinkState::from_status(status).has_reply())?;
		Ok(LinkState::from_status(status))
	}

	fn poll_until(&mut self, done: impl Fn(u8) -> bool) -> Result<u8, TransportError> {
		let deadline = Instant::now() + self.poll_timeout;
		loop {
			let status = self.bus.status();
			if done(status) {
				return Ok(status);
			}
			if Instant::now() >= deadline {
				return Err(TransportError::Unresponsive {
					waited_ms: self.poll_timeout.as_millis() as u64,
				});
			}
			std::thread::sleep(POLL_INTERVAL);
		}
	}
}


// vim: ts=4

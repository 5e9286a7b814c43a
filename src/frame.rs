//! Command frame encoding
//!
//! One frame is the unit pushed through the command queue: a target id byte,
//! a command id byte and an optional payload. Frames live for exactly one
//! exchange and are never persisted.

use crate::error::TransportError;

/// Command data queue capacity; a frame must fit in one push
pub const DATA_QUEUE_SIZE: usize = 896;

/// Status data queue capacity
pub const STATUS_QUEUE_SIZE: usize = 256;

/// Largest socket read chunk: block size minus the leading two count bytes
/// and room for the read command header
pub const MAX_SOCKET_CHUNK: usize = DATA_QUEUE_SIZE - 4;

/// Logical subsystems multiplexed over the single command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
	Filesystem,
	Network,
	Control,
}

impl Target {
	/// Wire id of this target (the first byte of every frame)
	pub fn id(self) -> u8 {
		match self {
			Target::Filesystem => 0x01,
			Target::Network => 0x03,
			Target::Control => 0x04,
		}
	}

	pub fn from_id(id: u8) -> Option<Target> {
		match id {
			0x01 => Some(Target::Filesystem),
			0x03 => Some(Target::Network),
			0x04 => Some(Target::Control),
			_ => None,
		}
	}
}

impl std::fmt::Display for Target {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Target::Filesystem => "filesystem",
			Target::Network => "network",
			Target::Control => "control",
		};
		write!(f, "{}", name)
	}
}

/// One command's encoded bytes: target id, command id, payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
	pub target: Target,
	pub command: u8,
	pub payload: Vec<u8>,
}

impl CommandFrame {
	/// Build a frame, rejecting payloads that cannot fit the command queue
	pub fn new(target: Target, command: u8, payload: Vec<u8>) -> Result<CommandFrame, TransportError> {
		if payload.len() + 2 > DATA_QUEUE_SIZE {
			return Err(TransportError::FrameTooLong { len: payload.len() + 2 });
		}
		Ok(CommandFrame { target, command, payload })
	}

	/// Frame without payload
	pub fn bare(target: Target, command: u8) -> CommandFrame {
		CommandFrame { target, command, payload: Vec::new() }
	}

	/// Serialize for the command data queue
	pub fn encode(&self) -> Vec<u8> {
		let mut bytes = Vec::with_capacity(self.payload.len() + 2);
		bytes.push(self.target.id());
		bytes.push(self.command);
		bytes.extend_from_slice(&self.payload);
		bytes
	}

	/// Parse raw queue bytes back into a frame
	pub fn decode(bytes: &[u8]) -> Result<CommandFrame, TransportError> {
		if bytes.len() < 2 {
			return Err(TransportError::FrameTooLong { len: bytes.len() });
		}
		let target =
			Target::from_id(bytes[0]).ok_or(TransportError::BadTarget { id: bytes[0] })?;
		Ok(CommandFrame { target, command: bytes[1], payload: bytes[2..].to_vec() })
	}
}


// vim: ts=4

//! Error types for UltiLink operations
//!
//! One error enum per protocol layer, following the taxonomy of the stack:
//! transport-level, socket-level, filesystem-channel and application-level.

use std::error::Error;
use std::fmt;
use std::io;

/// Register transport errors
#[derive(Debug)]
pub enum TransportError {
	/// The identifier probe failed: nothing is mapped at the base address
	NotPresent,

	/// The device did not leave the busy state within the poll timeout
	Unresponsive { waited_ms: u64 },

	/// The device kept raising the error flag; push abandoned after clearing it
	PushRejected { attempts: u32 },

	/// Frame exceeds the command queue capacity
	FrameTooLong { len: usize },

	/// Payload byte is not a valid target id (decode only)
	BadTarget { id: u8 },

	/// I/O error (register window mapping)
	Io(io::Error),
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::NotPresent => write!(f, "Device not present"),
			TransportError::Unresponsive { waited_ms } => {
				write!(f, "Device unresponsive after {}ms", waited_ms)
			}
			TransportError::PushRejected { attempts } => {
				write!(f, "Command push rejected {} times", attempts)
			}
			TransportError::FrameTooLong { len } => {
				write!(f, "Command frame of {} bytes exceeds queue capacity", len)
			}
			TransportError::BadTarget { id } => write!(f, "Unknown target id {:#04x}", id),
			TransportError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::Io(e)
	}
}

/// Socket layer errors
#[derive(Debug)]
pub enum SocketError {
	/// Underlying transport failure
	Transport(TransportError),

	/// Host name could not be resolved by the device
	HostUnresolved { host: String },

	/// The device could not allocate a socket
	OpenFailed { host: String },

	/// The remote end refused or the connect timed out
	ConnectFailed { host: String, port: u16 },

	/// Operation on a handle the device does not know
	InvalidHandle { handle: u8 },

	/// Any other non-success status from the network target
	Failed { code: String, message: String },
}

impl fmt::Display for SocketError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SocketError::Transport(e) => write!(f, "Transport error: {}", e),
			SocketError::HostUnresolved { host } => write!(f, "Host not found: {}", host),
			SocketError::OpenFailed { host } => write!(f, "Socket open failed for {}", host),
			SocketError::ConnectFailed { host, port } => {
				write!(f, "Connect to {}:{} failed", host, port)
			}
			SocketError::InvalidHandle { handle } => write!(f, "Invalid socket handle {}", handle),
			SocketError::Failed { code, message } => {
				write!(f, "Network command failed ({}): {}", code, message)
			}
		}
	}
}

impl Error for SocketError {}

impl From<TransportError> for SocketError {
	fn from(e: TransportError) -> Self {
		SocketError::Transport(e)
	}
}

/// Filesystem channel errors
#[derive(Debug)]
pub enum DosError {
	/// Underlying transport failure
	Transport(TransportError),

	/// Non-success status from the filesystem target
	Failed { code: String, message: String },
}

impl fmt::Display for DosError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DosError::Transport(e) => write!(f, "Transport error: {}", e),
			DosError::Failed { code, message } => {
				write!(f, "Filesystem command failed ({}): {}", code, message)
			}
		}
	}
}

impl Error for DosError {}

impl From<TransportError> for DosError {
	fn from(e: TransportError) -> Self {
		DosError::Transport(e)
	}
}

/// Launch capability errors
#[derive(Debug)]
pub enum LaunchError {
	/// The launcher has no dispatch for this file type
	Unsupported { file_type: String },

	/// Device-side upload or mount failed
	Dos(DosError),

	/// Descriptive failure from the launch sequence
	Failed { message: String },
}

impl fmt::Display for LaunchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LaunchError::Unsupported { file_type } => {
				write!(f, "Unsupported file type: {}", file_type)
			}
			LaunchError::Dos(e) => write!(f, "Device upload failed: {}", e),
			LaunchError::Failed { message } => write!(f, "Run failed: {}", message),
		}
	}
}

impl Error for LaunchError {}

impl From<DosError> for LaunchError {
	fn from(e: DosError) -> Self {
		LaunchError::Dos(e)
	}
}

/// Catalog provider errors (answered locally, never reach the device)
#[derive(Debug)]
pub enum CatalogError {
	/// Category name does not exist in the catalog
	UnknownCategory { name: String },
}

impl fmt::Display for CatalogError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CatalogError::UnknownCategory { name } => write!(f, "Unknown category: {}", name),
		}
	}
}

impl Error for CatalogError {}

/// Line protocol client errors
#[derive(Debug)]
pub enum ClientError {
	/// Socket layer failure
	Socket(SocketError),

	/// Peer closed the stream mid-response
	Disconnected,

	/// Reply did not match the protocol grammar
	Malformed { line: String },

	/// Peer answered with an ERR line
	Server { message: String },
}

impl fmt::Display for ClientError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ClientError::Socket(e) => write!(f, "Socket error: {}", e),
			ClientError::Disconnected => write!(f, "Server closed the connection"),
			ClientError::Malformed { line } => write!(f, "Malformed reply: {}", line),
			ClientError::Server { message } => write!(f, "Server error: {}", message),
		}
	}
}

impl Error for ClientError {}

impl From<SocketError> for ClientError {
	fn from(e: SocketError) -> Self {
		ClientError::Socket(e)
	}
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
	/// Config file could not be read
	Io(io::Error),

	/// Config file could not be parsed
	Parse { message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Io(e) => write!(f, "Cannot read config: {}", e),
			ConfigError::Parse { message } => write!(f, "Invalid configuration: {}", message),
		}
	}
}

impl Error for ConfigError {}

impl From<io::Error> for ConfigError {
	fn from(e: io::Error) -> Self {
		ConfigError::Io(e)
	}
}

// vim: ts=4

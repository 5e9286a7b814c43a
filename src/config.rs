//! Configuration for the server, the client endpoint and the transport
//!
//! A single serde struct with built-in defaults, optionally overridden by a
//! TOML config file. CLI flags (clap, in `main.rs`) take priority over both.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Unified configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// Line protocol server
	/// TCP port the line protocol server listens on
	pub listen_port: u16,

	/// Greeting text sent as `OK <greeting>` on accept
	pub greeting: String,

	/// Idle read timeout per peer connection, in seconds
	pub idle_timeout_secs: u64,

	/// Default page size used by the query subcommand
	pub page_size: usize,

	/// Catalog JSON file served to clients
	pub catalog_path: PathBuf,

	/// Directory entry paths are resolved against
	pub content_root: PathBuf,

	// Register transport
	/// Physical base address of the register block
	pub device_base: usize,

	/// Bounded status poll timeout, in milliseconds
	pub poll_timeout_ms: u64,

	/// How many times a rejected push is retried after clearing the
	/// error flag
	pub push_retries: u32,

	// Client endpoint
	/// Line protocol server host, as resolved by the device
	pub server_host: String,

	/// Line protocol server port
	pub server_port: u16,

	// Device launcher
	/// Device-side directory uploads are staged in
	pub staging_dir: String,

	/// Drive the device launcher mounts disk images into
	pub mount_drive: u8,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			listen_port: 6465,
			greeting: "UltiLink Browser".to_string(),
			idle_timeout_secs: 300,
			page_size: 20,
			catalog_path: PathBuf::from("catalog.json"),
			content_root: PathBuf::from("."),
			device_base: 0,
			poll_timeout_ms: 500,
			push_retries: 3,
			server_host: "127.0.0.1".to_string(),
			server_port: 6465,
			staging_dir: "/Usb0/incoming".to_string(),
			mount_drive: 0,
		}
	}
}

impl Config {
	/// Load from a TOML file, falling back to defaults when no path is
	/// given
	pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
		match path {
			Some(path) => {
				let raw = std::fs::read_to_string(path)?;
				toml::from_str(&raw)
					.map_err(|e| ConfigError::Parse { message: e.to_string() })
			}
			None => Ok(Config::default()),
		}
	}

	pub fn idle_timeout(&self) -> Duration {
		Duration::from_secs(self.idle_timeout_secs)
	}

	pub fn poll_timeout(&self) -> Duration {
		Duration::from_millis(self.poll_timeout_ms)
	}
}


// vim: ts=4

//! Launch capability: run a resolved payload on the device
//!
//! The line protocol only branches on the file type tag; everything format-
//! specific lives behind the [`Launcher`] trait. The device launcher covers
//! what the command channel itself can express: upload into a staging
//! directory and mount disk images. Program, cartridge and audio images
//! need the device's sideband run path, which is outside this stack.

use async_trait::async_trait;

use crate::catalog::FileType;
use crate::dos::DosChannel;
use crate::error::LaunchError;
use crate::logging::*;
use crate::registers::RegisterBus;

/// Launch capability consumed by the line protocol server
#[async_trait]
pub trait Launcher: Send + Sync {
	/// Perform the device-specific upload/mount/run sequence for one
	/// payload, keyed by its file type tag
	async fn launch(
		&self,
		file_type: FileType,
		name: &str,
		bytes: &[u8],
	) -> Result<(), LaunchError>;
}

/// Logs the request and succeeds; used when no device is attached
pub struct DryRunLauncher;

#[async_trait]
impl Launcher for DryRunLauncher {
	async fn launch(
		&self,
		file_type: FileType,
		name: &str,
		bytes: &[u8],
	) -> Result<(), LaunchError> {
		info!("Dry run: would launch {} ({}, {} bytes)", name, file_type, bytes.len());
		Ok(())
	}
}

/// Uploads payloads through the filesystem target and mounts disk images
pub struct DeviceLauncher<B: RegisterBus> {
	dos: DosChannel<B>,
	staging_dir: String,
	mount_drive: u8,
	/// The device keeps one open file per channel, so the whole
	/// upload/mount sequence is an exclusive section
	gate: tokio::sync::Mutex<()>,
}

impl<B: RegisterBus> DeviceLauncher<B> {
	pub fn new(dos: DosChannel<B>, staging_dir: String, mount_drive: u8) -> DeviceLauncher<B> {
		DeviceLauncher { dos, staging_dir, mount_drive, gate: tokio::sync::Mutex::new(()) }
	}

	/// Sanitize an entry name into a device-side filename
	fn staged_name(name: &str, file_type: FileType) -> String {
		let stem: String = name
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
			.take(32)
			.collect();
		format!("{}.{}", stem, file_type)
	}
}

#[async_trait]
impl<B: RegisterBus> Launcher for DeviceLauncher<B> {
	async fn launch(
		&self,
		file_type: FileType,
		name: &str,
		bytes: &[u8],
	) -> Result<(), LaunchError> {
		if !file_type.is_disk_image() {
			return Err(LaunchError::Unsupported { file_type: file_type.to_string() });
		}

		let _guard = self.gate.lock().await;
		let staged = Self::staged_name(name, file_type);
		self.dos.change_dir(&self.staging_dir).await?;
		self.dos.upload(&staged, bytes).await?;
		self.dos.mount_disk(self.mount_drive, &staged).await?;
		info!("Mounted {} as drive {} image", staged, self.mount_drive);
		Ok(())
	}
}


// vim: ts=4

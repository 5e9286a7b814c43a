//! Filesystem channel: file and mount operations on the filesystem target
//!
//! Wraps the filesystem target's command set behind a typed API. The device
//! keeps one open file per channel, so calls follow an open/transfer/close
//! discipline. Shares the transport guard with every other target.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::DosError;
use crate::frame::{CommandFrame, Target, DATA_QUEUE_SIZE};
use crate::logging::*;
use crate::registers::RegisterBus;
use crate::transport::{Exchange, Transport};

// Filesystem target commands
pub const DOS_CMD_OPEN_FILE: u8 = 0x02;
pub const DOS_CMD_CLOSE_FILE: u8 = 0x03;
pub const DOS_CMD_READ_DATA: u8 = 0x04;
pub const DOS_CMD_WRITE_DATA: u8 = 0x05;
pub const DOS_CMD_CHANGE_DIR: u8 = 0x11;
pub const DOS_CMD_GET_PATH: u8 = 0x12;
pub const DOS_CMD_MOUNT_DISK: u8 = 0x23;
pub const DOS_CMD_UNMOUNT_DISK: u8 = 0x24;

// Open attribute bits
pub const ATTRIB_READ: u8 = 0x01;
pub const ATTRIB_WRITE: u8 = 0x02;
pub const ATTRIB_CREATE: u8 = 0x04;

/// Largest data slice per write command: queue size minus target id,
/// command id and the two pad bytes
pub const MAX_WRITE_CHUNK: usize = DATA_QUEUE_SIZE - 4;

/// Typed access to the filesystem target
#[derive(Clone)]
pub struct DosChannel<B: RegisterBus> {
	transport: Arc<Mutex<Transport<B>>>,
}

impl<B: RegisterBus> DosChannel<B> {
	pub fn new(transport: Arc<Mutex<Transport<B>>>) -> DosChannel<B> {
		DosChannel { transport }
	}

	/// Open a file on the device; attrib is a combination of the
	/// `ATTRIB_*` bits
	pub async fn open_file(&self, attrib: u8, name: &str) -> Result<(), DosError> {
		let mut payload = Vec::with_capacity(name.len() + 1);
		payload.push(attrib);
		payload.extend_from_slice(name.as_bytes());
		self.run(DOS_CMD_OPEN_FILE, payload).await?;
		Ok(())
	}

	pub async fn close_file(&self) -> Result<(), DosError> {
		self.run(DOS_CMD_CLOSE_FILE, Vec::new()).await?;
		Ok(())
	}

	/// Read up to `len` bytes from the open file. The reply may span
	/// multiple blocks; the transport reassembles them.
	pub async fn read_data(&self, len: u16) -> Result<Vec<u8>, DosError> {
		let reply = self.run(DOS_CMD_READ_DATA, len.to_le_bytes().to_vec()).await?;
		Ok(reply.data)
	}

	/// Write one slice to the open file; callers chunk by
	/// [`MAX_WRITE_CHUNK`]
	pub async fn write_data(&self, data: &[u8]) -> Result<(), DosError> {
		let mut payload = Vec::with_capacity(data.len() + 2);
		// Two pad bytes precede the data in the write command layout
		payload.push(0x00);
		payload.push(0x00);
		payload.extend_from_slice(data);
		self.run(DOS_CMD_WRITE_DATA, payload).await?;
		Ok(())
	}

	/// Upload a whole buffer as a new file in the current directory
	pub async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(), DosError> {
		self.open_file(ATTRIB_CREATE | ATTRIB_WRITE, name).await?;
		let mut written = 0;
		for chunk in bytes.chunks(MAX_WRITE_CHUNK) {
			if let Err(e) = self.write_data(chunk).await {
				// Leave the channel usable for the next caller
				let _ = self.close_file().await;
				return Err(e);
			}
			written += chunk.len();
		}
		self.close_file().await?;
		debug!("Uploaded {} ({} bytes)", name, written);
		Ok(())
	}

	pub async fn change_dir(&self, dir: &str) -> Result<(), DosError> {
		self.run(DOS_CMD_CHANGE_DIR, dir.as_bytes().to_vec()).await?;
		Ok(())
	}

	/// Current directory of the filesystem target
	pub async fn get_path(&self) -> Result<String, DosError> {
		let reply = self.run(DOS_CMD_GET_PATH, Vec::new()).await?;
		Ok(String::from_utf8_lossy(&reply.data).trim_end_matches('\0').to_string())
	}

	/// Mount a disk image into the given drive
	pub async fn mount_disk(&self, drive: u8, image: &str) -> Result<(), DosError> {
		let mut payload = Vec::with_capacity(image.len() + 1);
		payload.push(drive);
		payload.extend_from_slice(image.as_bytes());
		self.run(DOS_CMD_MOUNT_DISK, payload).await?;
		Ok(())
	}

	pub async fn unmount_disk(&self, drive: u8) -> Result<(), DosError> {
		self.run(DOS_CMD_UNMOUNT_DISK, vec![drive]).await?;
		Ok(())
	}

	async fn run(&self, command: u8, payload: Vec<u8>) -> Result<Exchange, DosError> {
		let frame = CommandFrame::new(Target::Filesystem, command, payload)?;
		let reply = self.transport.lock().await.exchange(&frame)?;
		if !reply.status.ok() {
			return Err(DosError::Failed {
				code: reply.status.code.clone(),
				message: reply.status.message.clone(),
			});
		}
		Ok(reply)
	}
}

// vim: ts=4

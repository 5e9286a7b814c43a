//! Register-level definitions for the command interface
//!
//! The device exposes four byte-wide registers at consecutive offsets from a
//! base address. Reads and writes at the same offset address different
//! registers (status/control share offset 0, identifier/command-data share
//! offset 1). All access goes through the [`RegisterBus`] trait so the upper
//! layers can run against an emulated device in tests.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;

use crate::error::TransportError;

// Control register bits (write, offset 0)
pub const CTRL_PUSH_CMD: u8 = 0x01;
pub const CTRL_DATA_ACC: u8 = 0x02;
pub const CTRL_ABORT: u8 = 0x04;
pub const CTRL_CLR_ERR: u8 = 0x08;

// Status register bits (read, offset 0)
pub const STAT_CMD_BUSY: u8 = 0x01;
pub const STAT_DATA_ACC: u8 = 0x02;
pub const STAT_ABORT_P: u8 = 0x04;
pub const STAT_ERROR: u8 = 0x08;
pub const STAT_STATE_MASK: u8 = 0x30;
pub const STAT_STAT_AV: u8 = 0x40;
pub const STAT_DATA_AV: u8 = 0x80;

/// Identifier byte readable at offset 1 while the machine is idle
pub const IDENTIFIER: u8 = 0xC9;

/// Value every register reads as when the base address is not mapped
pub const UNMAPPED: u8 = 0xFF;

/// Command state machine, decoded from the two state bits of the status
/// register. Legal transitions:
/// `Idle -> Busy -> {LastBlock | MoreBlocks}`, then the accept signal moves
/// `LastBlock -> Idle` and `MoreBlocks -> Busy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
	Idle,
	Busy,
	LastBlock,
	MoreBlocks,
}

impl LinkState {
	/// Decode the state field of a raw status byte
	pub fn from_status(status: u8) -> LinkState {
		match status & STAT_STATE_MASK {
			0x00 => LinkState::Idle,
			0x10 => LinkState::Busy,
			0x20 => LinkState::LastBlock,
			_ => LinkState::MoreBlocks,
		}
	}

	/// True for the two data states
	pub fn has_reply(self) -> bool {
		matches!(self, LinkState::LastBlock | LinkState::MoreBlocks)
	}
}

/// Raw access to the four device registers
///
/// Implementations: [`MmioBus`] for real hardware, and the emulated device
/// used by the integration tests.
pub trait RegisterBus: Send {
	/// Read the status register (offset 0)
	fn status(&mut self) -> u8;

	/// Write the control register (offset 0)
	fn control(&mut self, bits: u8);

	/// Read the identifier register (offset 1)
	fn identifier(&mut self) -> u8;

	/// Write one byte into the command data queue (offset 1)
	fn push_data(&mut self, byte: u8);

	/// Read one byte from the response data queue (offset 2)
	fn response_data(&mut self) -> u8;

	/// Read one byte from the status data queue (offset 3)
	fn status_data(&mut self) -> u8;
}

/// Memory-mapped register window over `/dev/mem`
///
/// Maps the page containing the register block and performs volatile
/// single-byte accesses at the four register offsets.
pub struct MmioBus {
	regs: *mut u8,
	map_base: *mut libc::c_void,
	map_len: usize,
}

// The raw pointer targets a fixed hardware window; exclusive use is
// enforced by the Transport that owns the bus.
unsafe impl Send for MmioBus {}

impl MmioBus {
	/// Map the register block at the given physical base address
	pub fn map(phys_base: usize) -> Result<MmioBus, TransportError> {
		let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
		let aligned = phys_base & !(page - 1);
		let offset_in_page = phys_base - aligned;
		let map_len = page;

		let file = OpenOptions::new().read(true).write(true).open("/dev/mem")?;
		let map_base = unsafe {
			libc::mmap(
				std::ptr::null_mut(),
				map_len,
				libc::PROT_READ | libc::PROT_WRITE,
				libc::MAP_SHARED,
				file.as_raw_fd(),
				aligned as libc::off_t,
			)
		};
		if map_base == libc::MAP_FAILED {
			return Err(TransportError::Io(std::io::Error::last_os_error()));
		}

		let regs = unsafe { (map_base as *mut u8).add(offset_in_page) };
		Ok(MmioBus { regs, map_base, map_len })
	}

	fn read(&self, offset: usize) -> u8 {
		unsafe { std::ptr::read_volatile(self.regs.add(offset)) }
	}

	fn write(&self, offset: usize, val: u8) {
		unsafe { std::ptr::write_volatile(self.regs.add(offset), val) }
	}
}

impl Drop for MmioBus {
	fn drop(&mut self) {
		unsafe {
			libc::munmap(self.map_base, self.map_len);
		}
	}
}

impl RegisterBus for MmioBus {
	fn status(&mut self) -> u8 {
		self.read(0)
	}

	fn control(&mut self, bits: u8) {
		self.write(0, bits)
	}

	fn identifier(&mut self) -> u8 {
		self.read(1)
	}

	fn push_data(&mut self, byte: u8) {
		self.write(1, byte)
	}

	fn response_data(&mut self) -> u8 {
		self.read(2)
	}

	fn status_data(&mut self) -> u8 {
		self.read(3)
	}
}


// vim: ts=4

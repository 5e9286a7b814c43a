//! Shared test fixtures: an emulated device and in-memory providers
//!
//! `EmuDevice` implements the register state machine the transport layer is
//! written against: command bytes accumulate in a queue, the push signal
//! executes one frame, replies are served block by block and every block
//! waits for the accept signal. The network target bridges to real TCP
//! sockets with short read timeouts so the no-data and closed-by-host
//! statuses behave like the hardware. Counters record pushes, accepts and
//! served blocks for handshake-discipline assertions.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use ultilink::catalog::{Entry, FileType, MemoryCatalog, Payload, PayloadSource};
use ultilink::dos::{
	ATTRIB_CREATE, ATTRIB_READ, ATTRIB_WRITE, DOS_CMD_CHANGE_DIR, DOS_CMD_CLOSE_FILE,
	DOS_CMD_GET_PATH, DOS_CMD_MOUNT_DISK, DOS_CMD_OPEN_FILE, DOS_CMD_READ_DATA,
	DOS_CMD_UNMOUNT_DISK, DOS_CMD_WRITE_DATA,
};
use ultilink::error::LaunchError;
use ultilink::frame::{Target, DATA_QUEUE_SIZE};
use ultilink::launch::Launcher;
use ultilink::protocol::LineServer;
use ultilink::registers::{
	RegisterBus, CTRL_ABORT, CTRL_CLR_ERR, CTRL_DATA_ACC, CTRL_PUSH_CMD, IDENTIFIER,
	STAT_DATA_AV, STAT_ERROR, STAT_STAT_AV, UNMAPPED,
};
use ultilink::socket::{
	NET_CMD_SOCKET_CLOSE, NET_CMD_SOCKET_READ, NET_CMD_SOCKET_WRITE, NET_CMD_TCP_CONNECT,
};
use ultilink::transport::{CMD_ECHO, CMD_IDENTIFY, Transport};

/// Socket read timeout of the emulated network target; reads that hit it
/// answer with the no-data status
const READ_TIMEOUT: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Idle,
	/// Command accepted but never answered (fault injection)
	Frozen,
	/// Holding one reply block until the accept signal
	Hold { last: bool },
}

struct OpenFile {
	path: String,
	attrib: u8,
	data: Vec<u8>,
	pos: usize,
}

pub struct EmuState {
	phase: Phase,
	cmd_buf: Vec<u8>,
	pending_blocks: VecDeque<Vec<u8>>,
	cur_data: VecDeque<u8>,
	cur_status: VecDeque<u8>,
	status_bytes: Vec<u8>,
	error_flag: bool,

	/// Reply data is split into blocks of this size
	pub block_size: usize,

	// Fault injection
	pub inject_push_errors: u32,
	pub freeze_next: bool,
	pub unmapped: bool,

	// Device-side state
	cwd: String,
	files: HashMap<String, Vec<u8>>,
	open_file: Option<OpenFile>,
	pub mounts: Vec<(u8, String)>,
	sockets: HashMap<u8, TcpStream>,
	next_handle: u8,

	// Instrumentation
	pub frames: Vec<Vec<u8>>,
	pub pushes: usize,
	pub accepts: usize,
	pub blocks_served: usize,
	/// Set when a push arrives while a reply is still pending; a correct
	/// transport never does this
	pub push_while_busy: bool,
}

impl EmuState {
	fn new(block_size: usize) -> EmuState {
		EmuState {
			phase: Phase::Idle,
			cmd_buf: Vec::new(),
			pending_blocks: VecDeque::new(),
			cur_data: VecDeque::new(),
			cur_status: VecDeque::new(),
			status_bytes: Vec::new(),
			error_flag: false,
			block_size,
			inject_push_errors: 0,
			freeze_next: false,
			unmapped: false,
			cwd: "/Usb0".to_string(),
			files: HashMap::new(),
			open_file: None,
			mounts: Vec::new(),
			sockets: HashMap::new(),
			next_handle: 1,
			frames: Vec::new(),
			pushes: 0,
			accepts: 0,
			blocks_served: 0,
			push_while_busy: false,
		}
	}

	fn resolve(&self, name: &str) -> String {
		if name.starts_with('/') {
			name.to_string()
		} else if self.cwd.ends_with('/') {
			format!("{}{}", self.cwd, name)
		} else {
			format!("{}/{}", self.cwd, name)
		}
	}

	fn control(&mut self, bits: u8) {
		if bits & CTRL_PUSH_CMD != 0 {
			self.pushes += 1;
			let frame = std::mem::take(&mut self.cmd_buf);
			if self.phase != Phase::Idle {
				self.push_while_busy = true;
			} else {
				self.frames.push(frame.clone());
				if self.inject_push_errors > 0 {
					self.inject_push_errors -= 1;
					self.error_flag = true;
				} else if self.freeze_next {
					self.phase = Phase::Frozen;
				} else {
					let (data, status) = self.execute(&frame);
					self.load_reply(data, status);
				}
			}
		}
		if bits & CTRL_DATA_ACC != 0 {
			self.accepts += 1;
			match self.phase {
				Phase::Hold { last: true } => {
					self.cur_data.clear();
					self.cur_status.clear();
					self.phase = Phase::Idle;
				}
				Phase::Hold { last: false } => self.next_block(),
				_ => {}
			}
		}
		if bits & CTRL_CLR_ERR != 0 {
			self.error_flag = false;
		}
		if bits & CTRL_ABORT != 0 {
			self.pending_blocks.clear();
			self.cur_data.clear();
			self.cur_status.clear();
			self.phase = Phase::Idle;
		}
	}

	fn load_reply(&mut self, data: Vec<u8>, status: String) {
		self.status_bytes = status.into_bytes();
		self.pending_blocks = if data.is_empty() {
			VecDeque::from(vec![Vec::new()])
		} else {
			data.chunks(self.block_size).map(|c| c.to_vec()).collect()
		};
		self.next_block();
	}

	fn next_block(&mut self) {
		let block = self.pending_blocks.pop_front().unwrap_or_default();
		self.blocks_served += 1;
		self.cur_data = block.into();
		let last = self.pending_blocks.is_empty();
		if last {
			// Status string becomes readable with the final block
			self.cur_status = std::mem::take(&mut self.status_bytes).into();
		}
		self.phase = Phase::Hold { last };
	}

	fn status_byte(&self) -> u8 {
		if self.unmapped {
			return UNMAPPED;
		}
		let mut s = match self.phase {
			Phase::Idle => 0x00,
			Phase::Frozen => 0x10,
			Phase::Hold { last: true } => 0x20,
			Phase::Hold { last: false } => 0x30,
		};
		if !self.cur_data.is_empty() {
			s |= STAT_DATA_AV;
		}
		if !self.cur_status.is_empty() {
			s |= STAT_STAT_AV;
		}
		if self.error_flag {
			s |= STAT_ERROR;
		}
		s
	}

	fn execute(&mut self, frame: &[u8]) -> (Vec<u8>, String) {
		if frame.len() < 2 {
			return (Vec::new(), "22,Invalid parameters".to_string());
		}
		let (target, command, payload) = (frame[0], frame[1], &frame[2..]);
		match (Target::from_id(target), command) {
			(Some(Target::Filesystem), CMD_IDENTIFY) => {
				(b"EMULATED DOS TARGET V1.0".to_vec(), ok())
			}
			(Some(Target::Network), CMD_IDENTIFY) => {
				(b"EMULATED NET TARGET V1.0".to_vec(), ok())
			}
			(Some(Target::Control), CMD_IDENTIFY) => {
				(b"EMULATED CONTROL TARGET V1.0".to_vec(), ok())
			}
			(Some(_), CMD_ECHO) => (payload.to_vec(), ok()),
			(Some(Target::Filesystem), cmd) => self.dos(cmd, payload),
			(Some(Target::Network), cmd) => self.net(cmd, payload),
			(Some(Target::Control), _) => (Vec::new(), "21,Unknown command".to_string()),
			(None, _) => {
				self.error_flag = true;
				(Vec::new(), "22,Invalid parameters".to_string())
			}
		}
	}

	fn dos(&mut self, cmd: u8, payload: &[u8]) -> (Vec<u8>, String) {
		match cmd {
			DOS_CMD_OPEN_FILE => {
				if payload.is_empty() {
					return (Vec::new(), "22,Invalid parameters".to_string());
				}
				if self.open_file.is_some() {
					return (Vec::new(), "40,File open failed".to_string());
				}
				let attrib = payload[0];
				let name = String::from_utf8_lossy(&payload[1..]).to_string();
				let path = self.resolve(&name);
				let data = if attrib & ATTRIB_CREATE != 0 {
					Vec::new()
				} else {
					match self.files.get(&path) {
						Some(data) => data.clone(),
						None if attrib & ATTRIB_READ != 0 => {
							return (Vec::new(), "44,File not found".to_string())
						}
						None => Vec::new(),
					}
				};
				self.open_file = Some(OpenFile { path, attrib, data, pos: 0 });
				(Vec::new(), ok())
			}
			DOS_CMD_CLOSE_FILE => match self.open_file.take() {
				Some(file) => {
					if file.attrib & ATTRIB_WRITE != 0 {
						self.files.insert(file.path, file.data);
					}
					(Vec::new(), ok())
				}
				None => (Vec::new(), "41,No file open".to_string()),
			},
			DOS_CMD_READ_DATA => {
				let len = match payload {
					[lo, hi, ..] => u16::from_le_bytes([*lo, *hi]) as usize,
					_ => return (Vec::new(), "22,Invalid parameters".to_string()),
				};
				match &mut self.open_file {
					Some(file) => {
						let end = (file.pos + len).min(file.data.len());
						let chunk = file.data[file.pos..end].to_vec();
						file.pos = end;
						(chunk, ok())
					}
					None => (Vec::new(), "41,No file open".to_string()),
				}
			}
			DOS_CMD_WRITE_DATA => {
				if payload.len() < 2 {
					return (Vec::new(), "22,Invalid parameters".to_string());
				}
				match &mut self.open_file {
					Some(file) if file.attrib & ATTRIB_WRITE != 0 => {
						file.data.extend_from_slice(&payload[2..]);
						(Vec::new(), ok())
					}
					Some(_) => (Vec::new(), "43,Write error".to_string()),
					None => (Vec::new(), "41,No file open".to_string()),
				}
			}
			DOS_CMD_CHANGE_DIR => {
				self.cwd = String::from_utf8_lossy(payload).to_string();
				(Vec::new(), ok())
			}
			DOS_CMD_GET_PATH => (self.cwd.clone().into_bytes(), ok()),
			DOS_CMD_MOUNT_DISK => {
				if payload.len() < 2 {
					return (Vec::new(), "22,Invalid parameters".to_string());
				}
				let drive = payload[0];
				let image = String::from_utf8_lossy(&payload[1..]).to_string();
				let path = self.resolve(&image);
				if !self.files.contains_key(&path) {
					return (Vec::new(), "44,File not found".to_string());
				}
				self.mounts.push((drive, path));
				(Vec::new(), ok())
			}
			DOS_CMD_UNMOUNT_DISK => (Vec::new(), ok()),
			_ => (Vec::new(), "21,Unknown command".to_string()),
		}
	}

	fn net(&mut self, cmd: u8, payload: &[u8]) -> (Vec<u8>, String) {
		match cmd {
			NET_CMD_TCP_CONNECT => {
				if payload.len() < 3 {
					return (Vec::new(), "22,Invalid parameters".to_string());
				}
				let port = u16::from_le_bytes([payload[0], payload[1]]);
				let host_bytes: Vec<u8> =
					payload[2..].iter().take_while(|b| **b != 0).cloned().collect();
				let host = String::from_utf8_lossy(&host_bytes).to_string();

				let mut addrs = match (host.as_str(), port).to_socket_addrs() {
					Ok(addrs) => addrs,
					Err(_) => return (Vec::new(), "30,Host not found".to_string()),
				};
				let addr = match addrs.next() {
					Some(addr) => addr,
					None => return (Vec::new(), "30,Host not found".to_string()),
				};
				let stream = match TcpStream::connect(addr) {
					Ok(stream) => stream,
					Err(_) => return (Vec::new(), "32,Connection failed".to_string()),
				};
				stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
				stream.set_nodelay(true).ok();

				let handle = self.next_handle;
				self.next_handle = self.next_handle.wrapping_add(1).max(1);
				self.sockets.insert(handle, stream);
				(vec![handle], ok())
			}
			NET_CMD_SOCKET_READ => {
				if payload.len() < 3 {
					return (Vec::new(), "22,Invalid parameters".to_string());
				}
				let handle = payload[0];
				let len = u16::from_le_bytes([payload[1], payload[2]]) as usize;
				let stream = match self.sockets.get_mut(&handle) {
					Some(stream) => stream,
					None => return (Vec::new(), "33,Invalid socket handle".to_string()),
				};
				let mut buf = vec![0u8; len.max(1)];
				match stream.read(&mut buf) {
					Ok(0) => (vec![0, 0], "35,Connection closed by host".to_string()),
					Ok(n) => {
						let mut data = (n as u16).to_le_bytes().to_vec();
						data.extend_from_slice(&buf[..n]);
						(data, ok())
					}
					Err(e)
						if e.kind() == std::io::ErrorKind::WouldBlock
							|| e.kind() == std::io::ErrorKind::TimedOut =>
					{
						(vec![0, 0], "34,No data available".to_string())
					}
					Err(_) => (vec![0, 0], "35,Connection closed by host".to_string()),
				}
			}
			NET_CMD_SOCKET_WRITE => {
				if payload.is_empty() {
					return (Vec::new(), "22,Invalid parameters".to_string());
				}
				let handle = payload[0];
				let data = &payload[1..];
				let stream = match self.sockets.get_mut(&handle) {
					Some(stream) => stream,
					None => return (Vec::new(), "33,Invalid socket handle".to_string()),
				};
				match stream.write_all(data) {
					Ok(()) => ((data.len() as u16).to_le_bytes().to_vec(), ok()),
					Err(_) => (vec![0, 0], "35,Connection closed by host".to_string()),
				}
			}
			NET_CMD_SOCKET_CLOSE => {
				if payload.is_empty() {
					return (Vec::new(), "22,Invalid parameters".to_string());
				}
				match self.sockets.remove(&payload[0]) {
					Some(stream) => {
						stream.shutdown(std::net::Shutdown::Both).ok();
						(Vec::new(), ok())
					}
					None => (Vec::new(), "33,Invalid socket handle".to_string()),
				}
			}
			_ => (Vec::new(), "21,Unknown command".to_string()),
		}
	}
}

fn ok() -> String {
	"00,OK".to_string()
}

/// Emulated register bus; clone to keep an inspection handle while the
/// transport owns the bus
#[derive(Clone)]
pub struct EmuDevice {
	state: Arc<Mutex<EmuState>>,
}

impl EmuDevice {
	pub fn new() -> EmuDevice {
		EmuDevice::with_block_size(DATA_QUEUE_SIZE)
	}

	pub fn with_block_size(block_size: usize) -> EmuDevice {
		EmuDevice { state: Arc::new(Mutex::new(EmuState::new(block_size))) }
	}

	pub fn lock(&self) -> MutexGuard<'_, EmuState> {
		self.state.lock().unwrap()
	}

	/// Place a file into the emulated device filesystem
	pub fn seed_file(&self, path: &str, bytes: &[u8]) {
		self.lock().files.insert(path.to_string(), bytes.to_vec());
	}

	pub fn file(&self, path: &str) -> Option<Vec<u8>> {
		self.lock().files.get(path).cloned()
	}
}

impl RegisterBus for EmuDevice {
	fn status(&mut self) -> u8 {
		self.lock().status_byte()
	}

	fn control(&mut self, bits: u8) {
		self.lock().control(bits)
	}

	fn identifier(&mut self) -> u8 {
		if self.lock().unmapped {
			UNMAPPED
		} else {
			IDENTIFIER
		}
	}

	fn push_data(&mut self, byte: u8) {
		self.lock().cmd_buf.push(byte)
	}

	fn response_data(&mut self) -> u8 {
		self.lock().cur_data.pop_front().unwrap_or(0)
	}

	fn status_data(&mut self) -> u8 {
		self.lock().cur_status.pop_front().unwrap_or(0)
	}
}

/// Shared transport over the emulated bus, with test-friendly limits
pub fn shared_transport(dev: EmuDevice) -> Arc<tokio::sync::Mutex<Transport<EmuDevice>>> {
	Arc::new(tokio::sync::Mutex::new(Transport::with_limits(
		dev,
		Duration::from_millis(200),
		3,
	)))
}

pub fn entry(name: &str, group: &str, year: &str, t: FileType, cat: &str, path: &str) -> Entry {
	Entry {
		id: 0,
		name: name.to_string(),
		group: group.to_string(),
		year: year.to_string(),
		file_type: t,
		category: cat.to_string(),
		path: path.to_string(),
	}
}

pub fn sample_entries() -> Vec<Entry> {
	vec![
		entry("Boulder Run", "Rockers", "1986", FileType::Prg, "Games", "games/boulder.prg"),
		entry("Pipe Panic", "Plumbers", "1988", FileType::D64, "Games", "games/pipe.d64"),
		entry("Starfall", "Rockers", "1987", FileType::Crt, "Games", "games/starfall.crt"),
		entry("Monotune", "Chiptune Crew", "1990", FileType::Sid, "Music", "music/monotune.sid"),
		entry("Megademo IV", "Rockers", "1991", FileType::D64, "Demos", "demos/megademo4.d64"),
		entry("Lost Entry", "Nobody", "1999", FileType::Prg, "Demos", ""),
	]
}

pub fn sample_catalog() -> MemoryCatalog {
	MemoryCatalog::new(sample_entries())
}

/// Payload source backed by an in-memory map keyed on entry path
pub struct MapPayloadSource {
	map: HashMap<String, Vec<u8>>,
}

impl MapPayloadSource {
	pub fn new() -> MapPayloadSource {
		MapPayloadSource { map: HashMap::new() }
	}

	pub fn with(mut self, path: &str, bytes: &[u8]) -> MapPayloadSource {
		self.map.insert(path.to_string(), bytes.to_vec());
		self
	}

	/// Every sample entry with a path gets a small payload
	pub fn for_samples() -> MapPayloadSource {
		let mut source = MapPayloadSource::new();
		for entry in sample_entries() {
			if !entry.path.is_empty() {
				source.map.insert(entry.path.clone(), entry.name.clone().into_bytes());
			}
		}
		source
	}
}

#[async_trait]
impl PayloadSource for MapPayloadSource {
	async fn read(&self, entry: &Entry) -> Result<Payload, std::io::Error> {
		match self.map.get(&entry.path) {
			Some(bytes) => Ok(Payload {
				bytes: bytes.clone(),
				resolved: std::path::PathBuf::from(&entry.path),
			}),
			None => Err(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("No payload for {}", entry.path),
			)),
		}
	}
}

/// Launcher that records every request and succeeds
pub struct RecordingLauncher {
	pub launched: Mutex<Vec<(FileType, String, usize)>>,
}

impl RecordingLauncher {
	pub fn new() -> RecordingLauncher {
		RecordingLauncher { launched: Mutex::new(Vec::new()) }
	}
}

#[async_trait]
impl Launcher for RecordingLauncher {
	async fn launch(
		&self,
		file_type: FileType,
		name: &str,
		bytes: &[u8],
	) -> Result<(), LaunchError> {
		self.launched.lock().unwrap().push((file_type, name.to_string(), bytes.len()));
		Ok(())
	}
}

/// Launcher that always fails, for the ERR reply path
pub struct FailingLauncher;

#[async_trait]
impl Launcher for FailingLauncher {
	async fn launch(&self, _: FileType, name: &str, _: &[u8]) -> Result<(), LaunchError> {
		Err(LaunchError::Failed { message: format!("refused {}", name) })
	}
}

/// Spawn a line protocol server on an ephemeral port
pub async fn spawn_server(
	catalog: MemoryCatalog,
	payloads: Arc<dyn PayloadSource>,
	launcher: Arc<dyn Launcher>,
) -> std::net::SocketAddr {
	let server = Arc::new(LineServer::new(
		Arc::new(catalog),
		payloads,
		launcher,
		"Test Browser".to_string(),
		Duration::from_secs(10),
	));
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(server.listen(listener));
	addr
}

// vim: ts=4

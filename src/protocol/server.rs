//! Line protocol server
//!
//! Listens on a normal TCP socket, accepts many concurrent peers and
//! answers catalog commands with data from the injected providers. The
//! protocol is stateless per command: every LIST/SEARCH/INFO re-derives its
//! result at call time, so a provider update is visible to the very next
//! command. One task per peer; each peer blocks only on its own socket I/O
//! and, for RUN, on the shared device exclusive section inside the
//! launcher.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::catalog::{CatalogProvider, PayloadSource, Slice};
use crate::launch::Launcher;
use crate::logging::*;
use crate::protocol::command::{self, Command};

/// Reply to one request line
enum Response {
	Text(String),
	/// Send the goodbye line, then close the connection
	Quit,
}

/// Line protocol server over injected capabilities
pub struct LineServer {
	catalog: Arc<dyn CatalogProvider>,
	payloads: Arc<dyn PayloadSource>,
	launcher: Arc<dyn Launcher>,
	greeting: String,
	idle_timeout: Duration,
}

impl LineServer {
	pub fn new(
		catalog: Arc<dyn CatalogProvider>,
		payloads: Arc<dyn PayloadSource>,
		launcher: Arc<dyn Launcher>,
		greeting: String,
		idle_timeout: Duration,
	) -> LineServer {
		LineServer { catalog, payloads, launcher, greeting, idle_timeout }
	}

	/// Accept loop; runs until the listener fails
	pub async fn listen(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
		if let Ok(addr) = listener.local_addr() {
			info!("Line protocol server listening on {}", addr);
		}
		loop {
			let (stream, peer) = match listener.accept().await {
				Ok(conn) => conn,
				Err(e) => {
					error!("Accept error: {}", e);
					continue;
				}
			};
			let server = self.clone();
			tokio::spawn(async move {
				server.handle_peer(stream, peer.to_string()).await;
			});
		}
	}

	/// Bind and serve on the given address
	pub async fn serve(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
		let listener = TcpListener::bind(addr).await?;
		self.listen(listener).await
	}

	/// One peer connection, from greeting to close
	pub async fn handle_peer(&self, stream: TcpStream, peer: String) {
		info!("Client connected: {}", peer);
		let (read_half, mut write_half) = stream.into_split();
		let mut reader = BufReader::new(read_half);
		let mut line = String::new();

		let greeting = format!("OK {}\n", self.greeting);
		if write_half.write_all(greeting.as_bytes()).await.is_err() {
			return;
		}

		loop {
			line.clear();
			let read = tokio::time::timeout(self.idle_timeout, reader.read_line(&mut line)).await;
			let n = match read {
				Ok(Ok(n)) => n,
				Ok(Err(e)) => {
					debug!("Client {} read error: {}", peer, e);
					break;
				}
				Err(_) => {
					info!("Client {} idle timeout", peer);
					break;
				}
			};
			if n == 0 {
				debug!("Client {} disconnected", peer);
				break;
			}

			let trimmed = line.trim();
			if trimmed.is_empty() {
				continue;
			}
			debug!("Client {} command: {}", peer, trimmed);

			match self.respond(trimmed).await {
				Response::Text(text) => {
					if write_half.write_all(text.as_bytes()).await.is_err() {
						break;
					}
				}
				Response::Quit => {
					let _ = write_half.write_all(b"OK Goodbye\n").await;
					break;
				}
			}
		}
		info!("Client disconnected: {}", peer);
	}

	/// Dispatch one request line to a handler. Malformed commands answer
	/// with a usage ERR and keep the connection open.
	async fn respond(&self, line: &str) -> Response {
		let catalog = &self.catalog;
		let parsed = command::parse(line, &|name| catalog.is_category(name));
		let cmd = match parsed {
			Ok(cmd) => cmd,
			Err(e) => return Response::Text(format!("ERR {}\n", e.message())),
		};

		match cmd {
			Command::Cats => Response::Text(self.handle_cats()),
			Command::List { category, offset, count } => {
				Response::Text(self.handle_list(&category, offset, count))
			}
			Command::Search { offset, count, category, query } => {
				let slice = self.catalog.search(&query, category.as_deref(), offset, count);
				Response::Text(render_listing(&slice))
			}
			Command::AdvSearch { offset, count, filters } => {
				let slice = self.catalog.adv_search(&filters, offset, count);
				Response::Text(render_listing(&slice))
			}
			Command::Info { id } => Response::Text(self.handle_info(id)),
			Command::Run { id } => Response::Text(self.handle_run(id).await),
			Command::Quit => Response::Quit,
		}
	}

	fn handle_cats(&self) -> String {
		let cats = self.catalog.categories();
		let mut out = format!("OK {}\n", cats.len());
		for (name, count) in cats {
			out.push_str(&format!("{}|{}\n", name, count));
		}
		out.push_str(".\n");
		out
	}

	fn handle_list(&self, category: &str, offset: usize, count: usize) -> String {
		match self.catalog.list(category, offset, count) {
			Ok(slice) => render_listing(&slice),
			Err(e) => format!("ERR {}\n", e),
		}
	}

	fn handle_info(&self, id: u64) -> String {
		let entry = match u32::try_from(id).ok().and_then(|id| self.catalog.get(id)) {
			Some(entry) => entry,
			None => return "ERR Invalid ID\n".to_string(),
		};
		let mut out = String::from("OK\n");
		out.push_str(&format!("NAME|{}\n", entry.name));
		out.push_str(&format!("GROUP|{}\n", entry.group));
		out.push_str(&format!("YEAR|{}\n", entry.year));
		out.push_str(&format!("CAT|{}\n", entry.category));
		out.push_str(&format!("TYPE|{}\n", entry.file_type));
		out.push_str(&format!("PATH|{}\n", entry.path));
		out.push_str(".\n");
		out
	}

	/// Resolve the id, read the payload, dispatch to the launcher.
	/// Argument validation never touches the device.
	async fn handle_run(&self, id: u64) -> String {
		let entry = match u32::try_from(id).ok().and_then(|id| self.catalog.get(id)) {
			Some(entry) => entry,
			None => return "ERR Invalid ID\n".to_string(),
		};

		let payload = match self.payloads.read(&entry).await {
			Ok(payload) => payload,
			Err(e) => {
				error!("Cannot read payload for {}: {}", entry.name, e);
				return format!("ERR Cannot read file: {}\n", e);
			}
		};
		debug!("Resolved entry {} to {}", entry.id, payload.resolved.display());

		match self.launcher.launch(entry.file_type, &entry.name, &payload.bytes).await {
			Ok(()) => {
				info!("Running {} ({})", entry.name, entry.file_type);
				format!("OK Running {}\n", entry.name)
			}
			Err(e) => {
				error!("Launch of {} failed: {}", entry.name, e);
				format!("ERR {}\n", e)
			}
		}
	}
}

/// `OK <returned> <total>`, one pipe-delimited row per entry, closing dot
fn render_listing(slice: &Slice) -> String {
	let mut out = format!("OK {} {}\n", slice.entries.len(), slice.total);
	for entry in &slice.entries {
		out.push_str(&format!(
			"{}|{}|{}|{}|{}\n",
			entry.id, entry.name, entry.group, entry.year, entry.file_type
		));
	}
	out.push_str(".\n");
	out
}

// vim: ts=4

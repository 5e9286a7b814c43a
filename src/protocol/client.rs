//! Line protocol client endpoint
//!
//! Issues newline-terminated text commands over one socket layer connection
//! and parses newline-terminated replies. Every reply begins with `OK` or
//! `ERR`; multi-row replies end with a lone `.` line.

use crate::catalog::Filters;
use crate::error::ClientError;
use crate::logging::*;
use crate::registers::RegisterBus;
use crate::socket::{LineBuffer, SocketHandle, SocketStack};

/// One row of a CATS reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
	pub name: String,
	pub count: usize,
}

/// One row of a listing reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
	pub id: u32,
	pub name: String,
	pub group: String,
	pub year: String,
	pub file_type: String,
}

/// A page of listing rows plus the total match count
#[derive(Debug, Clone)]
pub struct Listing {
	pub rows: Vec<ListingRow>,
	pub total: usize,
}

/// Client endpoint over one open socket
pub struct LineClient<B: RegisterBus> {
	stack: SocketStack<B>,
	handle: SocketHandle,
	lines: LineBuffer,
	/// Greeting text received on connect
	pub greeting: String,
}

impl<B: RegisterBus> LineClient<B> {
	/// Open a connection and consume the greeting line
	pub async fn connect(
		stack: SocketStack<B>,
		host: &str,
		port: u16,
	) -> Result<LineClient<B>, ClientError> {
		let handle = stack.open(host, port).await?;
		let mut lines = LineBuffer::new();
		let greeting = match lines.read_line(&stack, handle).await? {
			Some(line) => line,
			None => {
				stack.close(handle).await;
				return Err(ClientError::Disconnected);
			}
		};
		debug!("Connected, greeting: {}", greeting);
		let greeting = greeting.strip_prefix("OK ").unwrap_or(&greeting).to_string();
		Ok(LineClient { stack, handle, lines, greeting })
	}

	/// List categories with their entry counts
	pub async fn categories(&mut self) -> Result<Vec<CategoryRow>, ClientError> {
		let head = self.request("CATS").await?;
		let expected: usize = head.trim().parse().unwrap_or(0);
		let mut rows = Vec::with_capacity(expected);
		for line in self.read_rows().await? {
			let (name, count) = line
				.rsplit_once('|')
				.ok_or_else(|| ClientError::Malformed { line: line.clone() })?;
			let count =
				count.parse().map_err(|_| ClientError::Malformed { line: line.clone() })?;
			rows.push(CategoryRow { name: name.to_string(), count });
		}
		Ok(rows)
	}

	/// Page through one category
	pub async fn list(
		&mut self,
		category: &str,
		offset: usize,
		count: usize,
	) -> Result<Listing, ClientError> {
		let line = format!("LIST {} {} {}", category, offset, count);
		self.listing(&line).await
	}

	/// Free-text search, optionally within one category
	pub async fn search(
		&mut self,
		query: &str,
		category: Option<&str>,
		offset: usize,
		count: usize,
	) -> Result<Listing, ClientError> {
		let line = match category {
			Some(cat) => format!("SEARCH {} {} {} {}", offset, count, cat, query),
			None => format!("SEARCH {} {} {}", offset, count, query),
		};
		self.listing(&line).await
	}

	/// Structured filter search
	pub async fn adv_search(
		&mut self,
		filters: &Filters,
		offset: usize,
		count: usize,
	) -> Result<Listing, ClientError> {
		let mut line = format!("ADVSEARCH {} {}", offset, count);
		if let Some(cat) = &filters.category {
			line.push_str(&format!(" cat={}", cat));
		}
		if let Some(title) = &filters.title {
			line.push_str(&format!(" title={}", title));
		}
		if let Some(group) = &filters.group {
			line.push_str(&format!(" group={}", group));
		}
		if let Some(file_type) = &filters.file_type {
			line.push_str(&format!(" type={}", file_type));
		}
		if let Some(year) = &filters.year {
			line.push_str(&format!(" year={}", year));
		}
		self.listing(&line).await
	}

	/// Entry details as KEY|value pairs
	pub async fn info(&mut self, id: u32) -> Result<Vec<(String, String)>, ClientError> {
		self.request(&format!("INFO {}", id)).await?;
		let mut pairs = Vec::new();
		for line in self.read_rows().await? {
			let (key, value) =
				line.split_once('|').ok_or_else(|| ClientError::Malformed { line: line.clone() })?;
			pairs.push((key.to_string(), value.to_string()));
		}
		Ok(pairs)
	}

	/// Launch an entry; returns the server's confirmation text
	/// (`Running <name>`)
	pub async fn run(&mut self, id: u32) -> Result<String, ClientError> {
		self.request(&format!("RUN {}", id)).await
	}

	/// Say goodbye and close the socket
	pub async fn quit(mut self) -> Result<(), ClientError> {
		// Best-effort: the server closes right after the goodbye line
		if self.send_line("QUIT").await.is_ok() {
			let _ = self.lines.read_line(&self.stack, self.handle).await;
		}
		self.stack.close(self.handle).await;
		Ok(())
	}

	async fn listing(&mut self, line: &str) -> Result<Listing, ClientError> {
		let head = self.request(line).await?;
		let mut parts = head.split_whitespace();
		let returned: usize = parts
			.next()
			.and_then(|s| s.parse().ok())
			.ok_or_else(|| ClientError::Malformed { line: head.clone() })?;
		let total: usize = parts
			.next()
			.and_then(|s| s.parse().ok())
			.ok_or_else(|| ClientError::Malformed { line: head.clone() })?;

		let mut rows = Vec::with_capacity(returned);
		for line in self.read_rows().await? {
			rows.push(parse_row(&line)?);
		}
		Ok(Listing { rows, total })
	}

	/// Send one command line, read the head line, split off the OK/ERR
	/// marker. Returns the text after `OK`.
	async fn request(&mut self, line: &str) -> Result<String, ClientError> {
		self.send_line(line).await?;
		let head = match self.lines.read_line(&self.stack, self.handle).await? {
			Some(head) => head,
			None => return Err(ClientError::Disconnected),
		};
		if let Some(rest) = head.strip_prefix("ERR") {
			return Err(ClientError::Server { message: rest.trim_start().to_string() });
		}
		match head.strip_prefix("OK") {
			Some(rest) => Ok(rest.trim_start().to_string()),
			None => Err(ClientError::Malformed { line: head }),
		}
	}

	/// Collect rows until the lone `.` terminator
	async fn read_rows(&mut self) -> Result<Vec<String>, ClientError> {
		let mut rows = Vec::new();
		loop {
			match self.lines.read_line(&self.stack, self.handle).await? {
				Some(line) if line == "." => return Ok(rows),
				Some(line) => rows.push(line),
				None => return Err(ClientError::Disconnected),
			}
		}
	}

	async fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
		let mut bytes = line.as_bytes().to_vec();
		bytes.push(b'\n');
		self.stack.write_all(self.handle, &bytes).await?;
		Ok(())
	}
}

fn parse_row(line: &str) -> Result<ListingRow, ClientError> {
	let fields: Vec<&str> = line.split('|').collect();
	if fields.len() != 5 {
		return Err(ClientError::Malformed { line: line.to_string() });
	}
	let id = fields[0].parse().map_err(|_| ClientError::Malformed { line: line.to_string() })?;
	Ok(ListingRow {
		id,
		name: fields[1].to_string(),
		group: fields[2].to_string(),
		year: fields[3].to_string(),
		file_type: fields[4].to_string(),
	})
}


// vim: ts=4

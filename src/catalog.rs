//! Catalog types and the consumed capability traits
//!
//! The line protocol treats catalog entries as opaque records provided by an
//! external index; the only invariant it relies on is that an entry id is
//! stable for the lifetime of one server process and resolvable back to a
//! loadable payload. Indexing and ranking are out of scope — the in-memory
//! reference provider does mechanical substring filtering only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::CatalogError;

/// File type tag the launcher dispatches on. The protocol itself has no
/// knowledge of the formats behind these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
	Prg,
	Crt,
	Sid,
	D64,
	G64,
	D71,
	D81,
}

impl FileType {
	pub fn as_str(self) -> &'static str {
		match self {
			FileType::Prg => "prg",
			FileType::Crt => "crt",
			FileType::Sid => "sid",
			FileType::D64 => "d64",
			FileType::G64 => "g64",
			FileType::D71 => "d71",
			FileType::D81 => "d81",
		}
	}

	/// Disk-image family (mountable), as opposed to program, cartridge
	/// and audio images
	pub fn is_disk_image(self) -> bool {
		matches!(self, FileType::D64 | FileType::G64 | FileType::D71 | FileType::D81)
	}
}

impl FromStr for FileType {
	type Err = ();

	fn from_str(s: &str) -> Result<FileType, ()> {
		match s.to_ascii_lowercase().as_str() {
			"prg" => Ok(FileType::Prg),
			"crt" => Ok(FileType::Crt),
			"sid" => Ok(FileType::Sid),
			"d64" => Ok(FileType::D64),
			"g64" => Ok(FileType::G64),
			"d71" => Ok(FileType::D71),
			"d81" => Ok(FileType::D81),
			_ => Err(()),
		}
	}
}

impl std::fmt::Display for FileType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// One listed, launchable catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
	/// Stable id for the lifetime of one server process; assigned by the
	/// provider at load time
	#[serde(default)]
	pub id: u32,

	pub name: String,

	#[serde(default)]
	pub group: String,

	#[serde(default)]
	pub year: String,

	#[serde(rename = "type")]
	pub file_type: FileType,

	pub category: String,

	/// Path of the payload relative to the content root
	pub path: String,
}

/// Ordered slice of entries plus the total match count
#[derive(Debug, Clone)]
pub struct Slice {
	pub entries: Vec<Entry>,
	pub total: usize,
}

/// Structured filters for advanced search; all active filters must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
	pub category: Option<String>,
	pub title: Option<String>,
	pub group: Option<String>,
	pub file_type: Option<String>,
	pub year: Option<String>,
}

impl Filters {
	pub fn is_empty(&self) -> bool {
		self.category.is_none()
			&& self.title.is_none()
			&& self.group.is_none()
			&& self.file_type.is_none()
			&& self.year.is_none()
	}

	fn matches(&self, entry: &Entry) -> bool {
		if let Some(cat) = &self.category {
			if !cat.eq_ignore_ascii_case("All") && !entry.category.eq_ignore_ascii_case(cat) {
				return false;
			}
		}
		if let Some(title) = &self.title {
			if !entry.name.to_lowercase().contains(&title.to_lowercase()) {
				return false;
			}
		}
		if let Some(group) = &self.group {
			if !entry.group.to_lowercase().contains(&group.to_lowercase()) {
				return false;
			}
		}
		if let Some(file_type) = &self.file_type {
			if !entry.file_type.as_str().eq_ignore_ascii_case(file_type) {
				return false;
			}
		}
		if let Some(year) = &self.year {
			if &entry.year != year {
				return false;
			}
		}
		true
	}
}

/// Catalog lookup capability consumed by the line protocol server.
///
/// Lookups are re-derived at call time; the server caches nothing, so a
/// provider update is visible to the very next command.
pub trait CatalogProvider: Send + Sync {
	/// Category names in display order with their entry counts
	fn categories(&self) -> Vec<(String, usize)>;

	/// Case-insensitive category membership test
	fn is_category(&self, name: &str) -> bool;

	/// Page through one category
	fn list(&self, category: &str, offset: usize, count: usize) -> Result<Slice, CatalogError>;

	/// Free-text substring search over name and group, optionally within
	/// one category ("All" means no filter)
	fn search(&self, query: &str, category: Option<&str>, offset: usize, count: usize) -> Slice;

	/// Structured filter search
	fn adv_search(&self, filters: &Filters, offset: usize, count: usize) -> Slice;

	/// Resolve one entry by id
	fn get(&self, id: u32) -> Option<Entry>;
}

/// Paging rule shared by every listing operation: `count == 0` means
/// everything from offset to end
fn page(total: usize, offset: usize, count: usize) -> std::ops::Range<usize> {
	if offset >= total {
		return 0..0;
	}
	let end = if count == 0 { total } else { (offset + count).min(total) };
	offset..end
}

/// In-memory reference catalog
pub struct MemoryCatalog {
	entries: Vec<Entry>,
	category_order: Vec<String>,
	by_category: BTreeMap<String, Vec<usize>>,
}

impl MemoryCatalog {
	/// Build from a list of entries; ids are assigned by position and
	/// categories keep first-seen order
	pub fn new(mut entries: Vec<Entry>) -> MemoryCatalog {
		let mut category_order = Vec::new();
		let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
		for (i, entry) in entries.iter_mut().enumerate() {
			entry.id = i as u32;
			if !by_category.contains_key(&entry.category) {
				category_order.push(entry.category.clone());
			}
			by_category.entry(entry.category.clone()).or_default().push(i);
		}
		MemoryCatalog { entries, category_order, by_category }
	}

	/// Load a JSON entry list (the database generator's output format)
	pub fn load_json(path: &Path) -> Result<MemoryCatalog, io::Error> {
		let raw = std::fs::read_to_string(path)?;
		let entries: Vec<Entry> = serde_json::from_str(&raw)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		Ok(MemoryCatalog::new(entries))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn resolve_category(&self, name: &str) -> Option<&str> {
		self.category_order
			.iter()
			.find(|cat| cat.eq_ignore_ascii_case(name))
			.map(|cat| cat.as_str())
	}

	fn slice_of(&self, indices: &[usize], offset: usize, count: usize) -> Slice {
		let total = indices.len();
		let entries = page(total, offset, count)
			.map(|i| self.entries[indices[i]].clone())
			.collect();
		Slice { entries, total }
	}
}

impl CatalogProvider for MemoryCatalog {
	fn categories(&self) -> Vec<(String, usize)> {
		self.category_order
			.iter()
			.map(|cat| (cat.clone(), self.by_category.get(cat).map_or(0, |v| v.len())))
			.collect()
	}

	fn is_category(&self, name: &str) -> bool {
		self.resolve_category(name).is_some()
	}

	fn list(&self, category: &str, offset: usize, count: usize) -> Result<Slice, CatalogError> {
		let matched = self
			.resolve_category(category)
			.ok_or_else(|| CatalogError::UnknownCategory { name: category.to_string() })?;
		let indices = &self.by_category[matched];
		Ok(self.slice_of(indices, offset, count))
	}

	fn search(&self, query: &str, category: Option<&str>, offset: usize, count: usize) -> Slice {
		let query = query.to_lowercase();
		let filter_category = category.filter(|cat| !cat.eq_ignore_ascii_case("All"));
		let indices: Vec<usize> = self
			.entries
			.iter()
			.enumerate()
			.filter(|(_, entry)| match filter_category {
				Some(cat) => entry.category.eq_ignore_ascii_case(cat),
				None => true,
			})
			.filter(|(_, entry)| {
				entry.name.to_lowercase().contains(&query)
					|| entry.group.to_lowercase().contains(&query)
			})
			.map(|(i, _)| i)
			.collect();
		self.slice_of(&indices, offset, count)
	}

	fn adv_search(&self, filters: &Filters, offset: usize, count: usize) -> Slice {
		let indices: Vec<usize> = self
			.entries
			.iter()
			.enumerate()
			.filter(|(_, entry)| filters.matches(entry))
			.map(|(i, _)| i)
			.collect();
		self.slice_of(&indices, offset, count)
	}

	fn get(&self, id: u32) -> Option<Entry> {
		self.entries.get(id as usize).cloned()
	}
}

/// Resolved payload bytes plus the absolute location they came from
#[derive(Debug, Clone)]
pub struct Payload {
	pub bytes: Vec<u8>,
	pub resolved: PathBuf,
}

/// Payload source capability: entry to raw bytes
#[async_trait]
pub trait PayloadSource: Send + Sync {
	async fn read(&self, entry: &Entry) -> Result<Payload, io::Error>;
}

/// Reads payloads from a content root on the local filesystem
pub struct FsPayloadSource {
	root: PathBuf,
}

impl FsPayloadSource {
	pub fn new(root: PathBuf) -> FsPayloadSource {
		FsPayloadSource { root }
	}
}

#[async_trait]
impl PayloadSource for FsPayloadSource {
	async fn read(&self, entry: &Entry) -> Result<Payload, io::Error> {
		if entry.path.is_empty() {
			return Err(io::Error::new(io::ErrorKind::NotFound, "Entry has no file path"));
		}
		let resolved = self.root.join(&entry.path);
		let bytes = tokio::fs::read(&resolved).await?;
		Ok(Payload { bytes, resolved })
	}
}


// vim: ts=4

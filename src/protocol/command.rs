//! Line protocol command grammar
//!
//! Commands are case-insensitive keywords with space-separated arguments,
//! one per line. Parsing is deliberately lenient where the reference peer
//! is: paging arguments that fail to parse become zero rather than errors,
//! while entry ids must be numeric.

use crate::catalog::Filters;

/// One parsed request line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	Cats,
	List { category: String, offset: usize, count: usize },
	Search { offset: usize, count: usize, category: Option<String>, query: String },
	AdvSearch { offset: usize, count: usize, filters: Filters },
	Info { id: u64 },
	Run { id: u64 },
	Quit,
}

/// Parse failures; `message()` is the text after `ERR ` on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
	Empty,
	Usage(&'static str),
	InvalidId,
	Unknown(String),
}

impl CommandError {
	pub fn message(&self) -> String {
		match self {
			CommandError::Empty => "Empty command".to_string(),
			CommandError::Usage(usage) => format!("Usage: {}", usage),
			CommandError::InvalidId => "Invalid ID".to_string(),
			CommandError::Unknown(cmd) => format!("Unknown command: {}", cmd),
		}
	}
}

const USAGE_LIST: &str = "LIST <category> <offset> <count>";
const USAGE_SEARCH: &str = "SEARCH <offset> <count> [category] <query>";
const USAGE_ADVSEARCH: &str = "ADVSEARCH <offset> <count> [key=value ...]";
const USAGE_INFO: &str = "INFO <id>";
const USAGE_RUN: &str = "RUN <id>";

/// Paging arguments parse leniently: garbage becomes 0
fn paging_arg(s: &str) -> usize {
	s.parse().unwrap_or(0)
}

/// Parse one request line. `is_category` decides whether the optional
/// third SEARCH argument names a category or starts the query.
pub fn parse(line: &str, is_category: &dyn Fn(&str) -> bool) -> Result<Command, CommandError> {
	let parts: Vec<&str> = line.split_whitespace().collect();
	if parts.is_empty() {
		return Err(CommandError::Empty);
	}

	match parts[0].to_ascii_uppercase().as_str() {
		"CATS" => Ok(Command::Cats),

		"LIST" => {
			if parts.len() < 4 {
				return Err(CommandError::Usage(USAGE_LIST));
			}
			Ok(Command::List {
				category: parts[1].to_string(),
				offset: paging_arg(parts[2]),
				count: paging_arg(parts[3]),
			})
		}

		"SEARCH" => {
			if parts.len() < 4 {
				return Err(CommandError::Usage(USAGE_SEARCH));
			}
			let offset = paging_arg(parts[1]);
			let count = paging_arg(parts[2]);
			let (category, query_start) =
				if is_category(parts[3]) { (Some(parts[3].to_string()), 4) } else { (None, 3) };
			if query_start >= parts.len() {
				return Err(CommandError::Usage(USAGE_SEARCH));
			}
			Ok(Command::Search { offset, count, category, query: parts[query_start..].join(" ") })
		}

		"ADVSEARCH" => {
			if parts.len() < 3 {
				return Err(CommandError::Usage(USAGE_ADVSEARCH));
			}
			let offset = paging_arg(parts[1]);
			let count = paging_arg(parts[2]);
			let mut filters = Filters::default();
			for part in &parts[3..] {
				if let Some((key, value)) = part.split_once('=') {
					if value.is_empty() {
						continue;
					}
					match key.to_ascii_lowercase().as_str() {
						"cat" => filters.category = Some(value.to_string()),
						"title" => filters.title = Some(value.to_string()),
						"group" => filters.group = Some(value.to_string()),
						"type" => filters.file_type = Some(value.to_string()),
						"year" => filters.year = Some(value.to_string()),
						// Unknown keys are ignored, not errors
						_ => {}
					}
				}
			}
			Ok(Command::AdvSearch { offset, count, filters })
		}

		"INFO" => {
			if parts.len() < 2 {
				return Err(CommandError::Usage(USAGE_INFO));
			}
			let id = parts[1].parse().map_err(|_| CommandError::InvalidId)?;
			Ok(Command::Info { id })
		}

		"RUN" => {
			if parts.len() < 2 {
				return Err(CommandError::Usage(USAGE_RUN));
			}
			let id = parts[1].parse().map_err(|_| CommandError::InvalidId)?;
			Ok(Command::Run { id })
		}

		"QUIT" => Ok(Command::Quit),

		other => Err(CommandError::Unknown(other.to_string())),
	}
}


// vim: ts=4

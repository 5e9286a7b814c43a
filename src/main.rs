use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use ultilink::catalog::{FsPayloadSource, MemoryCatalog};
use ultilink::config::Config;
use ultilink::dos::DosChannel;
use ultilink::frame::Target;
use ultilink::launch::{DeviceLauncher, DryRunLauncher, Launcher};
use ultilink::logging::*;
use ultilink::protocol::{LineClient, LineServer};
use ultilink::registers::MmioBus;
use ultilink::socket::SocketStack;
use ultilink::transport::Transport;

///////////////////////
// Utility functions //
///////////////////////

/// Accept "0xDF1C" as well as decimal
fn parse_base(s: &str) -> Result<usize, Box<dyn Error>> {
	let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
		Some(hex) => usize::from_str_radix(hex, 16),
		None => s.parse(),
	};
	parsed.map_err(|_| format!("Invalid base address: {}", s).into())
}

fn open_transport(
	config: &Config,
	base: usize,
) -> Result<Arc<Mutex<Transport<MmioBus>>>, Box<dyn Error>> {
	let bus = MmioBus::map(base)?;
	let mut transport = Transport::with_limits(bus, config.poll_timeout(), config.push_retries);
	transport.probe()?;
	Ok(Arc::new(Mutex::new(transport)))
}

async fn run_serve(config: Config, device_base: Option<usize>) -> Result<(), Box<dyn Error>> {
	let catalog = MemoryCatalog::load_json(&config.catalog_path)?;
	info!("Loaded catalog: {} entries from {}", catalog.len(), config.catalog_path.display());

	let payloads = Arc::new(FsPayloadSource::new(config.content_root.clone()));
	let launcher: Arc<dyn Launcher> = match device_base.or(match config.device_base {
		0 => None,
		base => Some(base),
	}) {
		Some(base) => {
			let transport = open_transport(&config, base)?;
			info!("Device attached at {:#x}, disk images will be mounted", base);
			Arc::new(DeviceLauncher::new(
				DosChannel::new(transport),
				config.staging_dir.clone(),
				config.mount_drive,
			))
		}
		None => {
			info!("No device attached, running in dry-run launch mode");
			Arc::new(DryRunLauncher)
		}
	};

	let server = Arc::new(LineServer::new(
		Arc::new(catalog),
		payloads,
		launcher,
		config.greeting.clone(),
		config.idle_timeout(),
	));
	server.serve(&format!("0.0.0.0:{}", config.listen_port)).await?;
	Ok(())
}

fn run_probe(config: &Config, base: usize) -> Result<(), Box<dyn Error>> {
	let bus = MmioBus::map(base)?;
	let mut transport = Transport::with_limits(bus, config.poll_timeout(), config.push_retries);
	transport.probe()?;
	println!("Device present at {:#x}", base);

	for target in [Target::Filesystem, Target::Network, Target::Control] {
		match transport.identify(target) {
			Ok(reply) if reply.status.ok() => {
				println!("  {}: {}", target, String::from_utf8_lossy(&reply.data).trim_end());
			}
			Ok(reply) => println!("  {}: status {}", target, reply.status),
			Err(e) => println!("  {}: {}", target, e),
		}
	}
	Ok(())
}

async fn run_query(
	config: &Config,
	base: usize,
	words: Vec<String>,
) -> Result<(), Box<dyn Error>> {
	let transport = open_transport(config, base)?;
	let stack = SocketStack::new(transport);
	let mut client =
		LineClient::connect(stack, &config.server_host, config.server_port).await?;
	info!("Connected to {}:{} ({})", config.server_host, config.server_port, client.greeting);

	let keyword = words.first().map(|s| s.to_ascii_uppercase()).unwrap_or_default();
	match keyword.as_str() {
		"CATS" => {
			for cat in client.categories().await? {
				println!("{} ({})", cat.name, cat.count);
			}
		}
		"LIST" if words.len() >= 2 => {
			let offset = words.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
			let count =
				words.get(3).and_then(|s| s.parse().ok()).unwrap_or(config.page_size);
			let listing = client.list(&words[1], offset, count).await?;
			for row in &listing.rows {
				println!("{}|{}|{}|{}|{}", row.id, row.name, row.group, row.year, row.file_type);
			}
			println!("({} of {} entries)", listing.rows.len(), listing.total);
		}
		"SEARCH" if words.len() >= 2 => {
			let query = words[1..].join(" ");
			let listing = client.search(&query, None, 0, config.page_size).await?;
			for row in &listing.rows {
				println!("{}|{}|{}|{}|{}", row.id, row.name, row.group, row.year, row.file_type);
			}
			println!("({} of {} entries)", listing.rows.len(), listing.total);
		}
		"INFO" if words.len() >= 2 => {
			let id = words[1].parse()?;
			for (key, value) in client.info(id).await? {
				println!("{}: {}", key, value);
			}
		}
		"RUN" if words.len() >= 2 => {
			let id = words[1].parse()?;
			println!("{}", client.run(id).await?);
		}
		_ => {
			client.quit().await?;
			return Err("Usage: query <cats|list|search|info|run> [args...]".into());
		}
	}
	client.quit().await?;
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	init_tracing();

	let matches = Command::new("UltiLink")
		.version("0.2.0")
		.about("Catalog browser stack for the Ultimate command interface")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.help("TOML configuration file"),
		)
		.subcommand(
			Command::new("serve")
				.about("Run the line protocol catalog server")
				.arg(Arg::new("port").short('p').long("port").value_name("PORT"))
				.arg(Arg::new("catalog").long("catalog").value_name("FILE"))
				.arg(Arg::new("root").long("root").value_name("DIR"))
				.arg(
					Arg::new("device-base")
						.long("device-base")
						.value_name("ADDR")
						.help("Register base address; enables the device launcher"),
				),
		)
		.subcommand(
			Command::new("probe")
				.about("Detect the device and identify each target")
				.arg(Arg::new("base").required(true)),
		)
		.subcommand(
			Command::new("query")
				.about("Issue one catalog command through the device channel")
				.arg(Arg::new("base").long("base").value_name("ADDR").required(true))
				.arg(Arg::new("words").required(true).action(ArgAction::Append).num_args(1..)),
		)
		.get_matches();

	let config_path = matches.get_one::<String>("config").map(PathBuf::from);
	let mut config = Config::load(config_path.as_deref().map(Path::new))?;

	if let Some(matches) = matches.subcommand_matches("serve") {
		if let Some(port) = matches.get_one::<String>("port") {
			config.listen_port = port.parse()?;
		}
		if let Some(catalog) = matches.get_one::<String>("catalog") {
			config.catalog_path = PathBuf::from(catalog);
		}
		if let Some(root) = matches.get_one::<String>("root") {
			config.content_root = PathBuf::from(root);
		}
		let device_base = matches
			.get_one::<String>("device-base")
			.map(|s| parse_base(s))
			.transpose()?;
		run_serve(config, device_base).await?;
	} else if let Some(matches) = matches.subcommand_matches("probe") {
		let base = matches.get_one::<String>("base").ok_or("probe: base address required")?;
		run_probe(&config, parse_base(base)?)?;
	} else if let Some(matches) = matches.subcommand_matches("query") {
		let base = matches.get_one::<String>("base").ok_or("query: base address required")?;
		let words: Vec<String> = matches
			.get_many::<String>("words")
			.ok_or("query: command words required")?
			.cloned()
			.collect();
		run_query(&config, parse_base(base)?, words).await?;
	}

	Ok(())
}

// vim: ts=4

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use chord_ring::{
	associate::Associate,
	console,
	directory::{BootstrapDirectory, DirectoryServer, RemoteDirectory},
	ChordAdaptor, ChordConfig, JoinStrategy, LocalDirectory, TcpAdaptor, TcpChord,
};


#[derive(Parser, Debug)]
#[command(name = "chord", about = "A Chord distributed hash table over TCP")]
struct Cli{
	#[arg(long, value_enum, default_value = "info")]
	log_level: LogLevel,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command{
	/// Run the bootstrap directory that nodes register with.
	Directory{
		#[arg(long, default_value = "127.0.0.1:7000")]
		listen: String,
		/// Identifier width m; the ring holds 2^m ids.
		#[arg(long, default_value_t = 16)]
		bits: u32,
	},
	/// Start a ring member and attach a console to it.
	Node{
		#[arg(long)]
		listen: String,
		#[arg(long, default_value = "127.0.0.1:7000")]
		directory: String,
		/// Use this id instead of hashing the listen address.
		#[arg(long)]
		id: Option<u64>,
		/// JSON file with node settings.
		#[arg(long)]
		config: Option<PathBuf>,
		/// Overrides the strategy from the config file.
		#[arg(long, value_enum)]
		strategy: Option<Strategy>,
	},
	/// Store and fetch values through any ring member.
	Client{
		#[arg(long, default_value = "127.0.0.1:7000")]
		directory: String,
	},
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel{
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

impl From<LogLevel> for Level{
	fn from(val: LogLevel) -> Self {
		match val {
			LogLevel::Trace => Level::TRACE,
			LogLevel::Debug => Level::DEBUG,
			LogLevel::Info => Level::INFO,
			LogLevel::Warn => Level::WARN,
			LogLevel::Error => Level::ERROR,
		}
	}
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Strategy{
	Eager,
	Lazy,
}

impl From<Strategy> for JoinStrategy{
	fn from(val: Strategy) -> Self {
		match val {
			Strategy::Eager => JoinStrategy::Eager,
			Strategy::Lazy => JoinStrategy::Lazy,
		}
	}
}


#[tokio::main]
async fn main() -> chord_ring::Result<()> {
	let cli = Cli::parse();
	tracing_subscriber::fmt()
		.with_max_level(Level::from(cli.log_level))
		.with_writer(std::io::stderr)
		.init();

	match cli.command {
		Command::Directory { listen, bits } => {
			let directory: Arc<dyn BootstrapDirectory<String>> = Arc::new(LocalDirectory::new(bits)?);
			let server = DirectoryServer::start(listen, directory).await?;
			info!("Directory for a {} bit ring on {}", bits, server.local_addr());
			server.wait().await;
		},
		Command::Node { listen, directory, id, config, strategy } => {
			let mut config = match config {
				Some(path) => ChordConfig::from_file(path).await?,
				None => ChordConfig::default(),
			};
			if let Some(strategy) = strategy {
				config.strategy = strategy.into();
			}
			let directory: Arc<dyn BootstrapDirectory<String>> = Arc::new(RemoteDirectory::new(directory, config.rpc_timeout()));
			let adaptor = TcpAdaptor::new(directory.clone(), config.rpc_timeout());
			let mut chord = TcpChord::new(listen, adaptor, directory);
			if let Some(id) = id {
				chord.set_id(id);
			}
			chord.set_config(config);
			let handle = chord.start().await?;
			info!("Node {} is up", handle.node().id());
			console::run_node(handle).await;
		},
		Command::Client { directory } => {
			let config = ChordConfig::default();
			let directory: Arc<dyn BootstrapDirectory<String>> = Arc::new(RemoteDirectory::new(directory, config.rpc_timeout()));
			let adaptor: Arc<dyn ChordAdaptor<String>> = Arc::new(TcpAdaptor::new(directory.clone(), config.rpc_timeout()));
			console::run_client(Associate::new(directory, adaptor)).await;
		},
	}
	Ok(())
}

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::mpsc;
use stf_helpers::{basic_stf_setup, parse_level};
use stf_protocol::ServerName;
use stf_server::{read_configuration, ServerConfig, TransformServer};
use stf_traits::{stf_error_map, StfResult};

#[derive(Parser)]
#[clap(author, version, about = "Serves transform lookups from a shared buffer", long_about = None)]
struct Args {
    /// RON configuration file
    #[clap(long, value_parser)]
    config: Option<PathBuf>,
    /// Server name, like /robot1/tf_server. Overrides the configuration.
    #[clap(long)]
    name: Option<ServerName>,
    /// Number of handler threads. 0 means number of CPU cores.
    #[clap(long)]
    num_threads: Option<usize>,
    /// error, warn, info, debug or trace
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn run(args: Args) -> StfResult<()> {
    basic_stf_setup(parse_level(&args.log_level)?)?;

    let mut config = match &args.config {
        Some(path) => read_configuration(path)?,
        None => ServerConfig::default(),
    };
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(num_threads) = args.num_threads {
        config.num_threads = num_threads;
    }

    let (stop_sender, stop) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_sender.send(());
    })
    .map_err(stf_error_map("Failed to set the Ctrl-C handler"))?;

    let mut server = TransformServer::bind(config)?;
    info!(
        "Starting server with {} handler threads",
        server.num_threads()
    );

    // blocks until Ctrl-C
    let _ = stop.recv();
    info!("Shutting down");
    server.shutdown();
    Ok(())
}

fn main() {
    if let Err(e) = run(Args::parse()) {
        error!("{e}");
        eprintln!("stf-server: {e}");
        std::process::exit(1);
    }
}

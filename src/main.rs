mod eval;
mod listfile;
mod logging;
mod monitor;
mod protocol;
mod server;
mod snapshot;

use clap::Parser;
use eval::script::ScriptEvaluatorFactory;
use protocol::v1::ProtocolV1;
use server::transport::StdioTransport;
use server::{Server, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info};

/// Build-configuration server speaking a framed JSON protocol over stdio
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Expose experimental protocol versions to clients
    #[arg(long)]
    experimental: bool,

    /// Accept the per-request debug annex (zzzDebug)
    #[arg(long)]
    debug: bool,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides CMETAD_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(args.log_level.clone(), args.log_file.clone()) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting server (experimental: {}, debug: {})",
        args.experimental, args.debug
    );

    let transport = StdioTransport::new(tokio::io::stdin(), tokio::io::stdout());
    let mut server = Server::new(
        transport,
        ServerConfig {
            experimental: args.experimental,
            debug: args.debug,
        },
    );

    let signal = server.signal_emitter();
    let path_events = server.path_event_sender();
    server.register_protocol(Box::new(ProtocolV1::new(
        Box::new(ScriptEvaluatorFactory),
        signal,
        path_events,
    )));

    match server.serve().await {
        Ok(()) => {
            info!("Input closed, shutting down");
        }
        Err(e) => {
            error!("Fatal transport error: {}", e);
            std::process::exit(1);
        }
    }
}

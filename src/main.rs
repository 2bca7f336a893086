//! toolbridge-mcp: JSON-RPC 2.0 tool server for language-model clients
//!
//! Serves the bundled tools over stdio, or over HTTP and WebSocket.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use toolbridge_mcp::config::{self, Config, TransportMode};
use toolbridge_mcp::mcp::registry::ToolRegistry;
use toolbridge_mcp::mcp::server::McpServer;
use toolbridge_mcp::tools::{register_story_tools, StoryStore};

/// JSON-RPC 2.0 tool server for language-model clients.
///
/// Serves newline-delimited JSON on stdin/stdout, or HTTP (`POST /mcp`) and
/// WebSocket (`GET /ws`) on a TCP listener.
#[derive(Parser, Debug)]
#[command(name = "toolbridge-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Serve on stdin/stdout instead of the network
    #[arg(long, env = "MCP_STDIO")]
    stdio: bool,

    /// Listen host (implies network mode)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (implies network mode)
    #[arg(long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(cfg: &mut Config, args: &Args) {
    if let Some(host) = &args.host {
        cfg.transport.host.clone_from(host);
        cfg.transport.mode = TransportMode::Network;
    }
    if let Some(port) = args.port {
        cfg.transport.port = port;
        cfg.transport.mode = TransportMode::Network;
    }
    if args.stdio {
        cfg.transport.mode = TransportMode::Stdio;
    }
}

/// Entry point for the toolbridge-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig was read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };
    apply_overrides(&mut cfg, &args);

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?cfg.transport.mode,
        "Starting toolbridge-mcp server"
    );

    let mut registry = ToolRegistry::new();
    if let Err(e) = register_story_tools(&mut registry, Arc::new(StoryStore::new())) {
        error!(error = %e, "Failed to register tools");
        return ExitCode::FAILURE;
    }

    let mut server = match McpServer::new(&cfg, registry) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(server.run());
    // stdin reads may still be parked on a blocking thread
    runtime.shutdown_background();

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

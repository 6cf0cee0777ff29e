use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use honeytrail_collector::{CollectorMetrics, CollectorServer, EventStore, IngestionService};
use honeytrail_core::config::SourceConfig;
use honeytrail_core::Config;
use honeytrail_forwarder::ResponderClient;
use honeytrail_pipeline::Agent;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Honeytrail - honeypot log tailing and event collection
#[derive(Parser, Debug)]
#[command(name = "honeytrail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tail the honeypot log and forward classified events to the collector
    Forward {
        /// Follow this file instead of the configured source
        #[arg(long)]
        file: Option<PathBuf>,

        /// With --file, read the existing content first
        #[arg(long, requires = "file")]
        from_start: bool,

        /// Collector ingest URL (overrides config)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Run the collector HTTP service
    Collect {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Ask the response generator what a command would print
    Respond {
        /// The attacker command
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Print the default configuration and exit
    PrintConfig,
}

fn init_tracing(config: &Config, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.general.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Token cancelled on Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
        trigger.cancel();
    });
    token
}

async fn forward(
    mut config: Config,
    file: Option<PathBuf>,
    from_start: bool,
    endpoint: Option<String>,
) -> Result<()> {
    if let Some(path) = file {
        config.tail.source = SourceConfig::File { path, from_start };
    }
    if let Some(endpoint) = endpoint {
        config.forwarder.endpoint = endpoint;
    }

    info!(
        instance = %config.general.instance_name,
        endpoint = %config.forwarder.endpoint,
        "Starting forwarder"
    );

    let agent = Agent::from_config(&config)?;
    let report = agent.run(shutdown_on_ctrl_c()).await?;

    info!(
        delivered = report.delivered,
        failed = report.failed,
        "Forwarder finished"
    );
    Ok(())
}

async fn collect(
    mut config: Config,
    bind: Option<String>,
    port: Option<u16>,
    database: Option<PathBuf>,
) -> Result<()> {
    if let Some(bind) = bind {
        config.collector.bind_address = bind;
    }
    if let Some(port) = port {
        config.collector.port = port;
    }
    if let Some(database) = database {
        config.collector.database = database;
    }

    let collector = &config.collector;
    let addr: SocketAddr = format!("{}:{}", collector.bind_address, collector.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", collector.bind_address, collector.port))?;

    let store = EventStore::open(&collector.database)?;
    let metrics = Arc::new(CollectorMetrics::new()?);
    let service = IngestionService::new(store, metrics, collector);

    let server = CollectorServer::bind(addr, service, collector.max_body_bytes).await?;
    server.run(shutdown_on_ctrl_c()).await?;

    info!("Collector stopped");
    Ok(())
}

async fn respond(config: Config, command: Vec<String>) -> Result<()> {
    let client = ResponderClient::new(&config.responder)?;
    let reply = client.respond(&command.join(" ")).await;
    println!("{}", reply);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::PrintConfig = args.command {
        println!("{}", Config::default().to_toml()?);
        return Ok(());
    }

    let config = match args.config {
        Some(ref path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };

    init_tracing(&config, args.verbose);

    match args.command {
        Command::Forward {
            file,
            from_start,
            endpoint,
        } => forward(config, file, from_start, endpoint).await,
        Command::Collect {
            bind,
            port,
            database,
        } => collect(config, bind, port, database).await,
        Command::Respond { command } => respond(config, command).await,
        Command::PrintConfig => Ok(()),
    }
}

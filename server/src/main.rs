use clap::Parser;
use log::{error, info};
use server::config::EngineConfig;
use server::network::Server;
use server::persistence::MemoryStore;
use server::registry::SessionRegistry;
use std::path::PathBuf;
use std::sync::Arc;

/// Command line arguments. Explicit flags override values from the config file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// TOML file with engine tunables
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Milliseconds between production ticks
    #[clap(long)]
    tick_interval_ms: Option<u64>,
    /// Score that wins a game
    #[clap(long)]
    win_score: Option<u64>,
    /// Game length in seconds before the leader wins
    #[clap(long)]
    max_duration_secs: Option<u64>,
    /// Region capture radius in metres
    #[clap(long)]
    capture_radius_m: Option<f64>,
    /// Disable mirroring into the in-process document store
    #[clap(long)]
    no_persistence: bool,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };

        if let Some(v) = self.tick_interval_ms {
            config.tick_interval_ms = v;
        }
        if let Some(v) = self.win_score {
            config.win_score = v;
        }
        if let Some(v) = self.max_duration_secs {
            config.max_duration_secs = v;
        }
        if let Some(v) = self.capture_radius_m {
            config.capture_radius_m = v;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = args.engine_config()?;
    info!(
        "Tick every {:?}, win at {} points or after {} ticks",
        config.tick_interval(),
        config.win_score,
        config.max_ticks()
    );

    let registry = if args.no_persistence {
        SessionRegistry::new(config)?
    } else {
        SessionRegistry::with_persistence(config, Arc::new(MemoryStore::new()))?
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::bind(&address, Arc::new(registry)).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}

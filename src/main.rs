use clap::Parser;
use fluxgate::{config::GateConfig, init_gate, init_tracing};
use std::path::PathBuf;
use std::process;

/// Adaptive rate-limiting gate for a single API endpoint
#[derive(Debug, Parser)]
#[command(name = "fluxgate", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "FLUXGATE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// API URL to rate limit
    #[arg(long, env = "FLUXGATE_API")]
    api: String,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    init_tracing();

    let cli = Cli::parse();

    // Load configuration
    let config = match GateConfig::from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", cli.config.display(), e);
            process::exit(1);
        }
    };

    // Start the gate
    if let Err(e) = init_gate(config, cli.api).await {
        eprintln!("Gate error: {}", e);
        process::exit(1);
    }
}

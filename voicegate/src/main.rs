mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use voicegate_signaling::{config, logging};

/// Voice/stream signaling gateway
#[derive(Debug, Parser)]
#[command(name = "voicegate", version, about)]
struct Cli {
    /// Path to a configuration file (TOML/YAML/JSON)
    #[arg(short, long, env = "VOICEGATE_CONFIG")]
    config: Option<String>,

    /// Override the listen address, e.g. 0.0.0.0:8060
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (env vars override file values)
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        let (host, port) = listen
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--listen must be host:port, got {listen}"))?;
        config.server.host = host.to_string();
        config.server.port = port
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid port in --listen: {e}"))?;
    }

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Voicegate starting...");
    info!("Listen address: {}", config.listen_address());

    // 4. Run the gateway until shutdown
    server::run(config).await
}

use std::path::Path;

use clap::{Parser, Subcommand};
use relax_config::Log;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "./config/example-config.yaml";

#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-tenant chat event relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Relay events for every configured tenant until interrupted
    Serve {
        /// YAML config file; defaults apply when omitted and the default file is absent
        #[arg(long, env = "RELAX_CONFIG")]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let Command::Serve { config } = Cli::parse().command;

    let config_path = config.or_else(|| {
        Path::new(DEFAULT_CONFIG_PATH)
            .exists()
            .then(|| DEFAULT_CONFIG_PATH.to_string())
    });
    let cfg = match relax_config::load(config_path.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&cfg.log);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = relax_server::serve(cfg, shutdown).await {
        eprintln!("relay exited with error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(log: &Log) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relax={0},relax_server={0}", log.level)));

    if log.format == "pretty" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    }
}

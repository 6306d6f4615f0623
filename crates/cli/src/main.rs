use clap::{Parser, Subcommand};
use spectra_core::ApiConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
use commands::{handle_config_command, watch_resource, ConfigCommands, WatchOptions};

#[derive(Parser)]
#[command(name = "spectra-cli")]
#[command(about = "Spectra CLI - inspect cache configuration and watch endpoints through the query cache")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file used by `watch` (defaults to $SPECTRA_CONFIG or config/spectra.toml)
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Subscribe to an HTTP resource and print each settled snapshot
    Watch {
        /// Base URL joined with the resource path
        #[arg(short, long)]
        url: String,

        /// Resource path, used as the query argument
        #[arg(short, long, default_value = "/")]
        path: String,

        /// Polling interval in milliseconds (0 = fetch once)
        #[arg(short, long, default_value = "0")]
        interval_ms: u64,

        /// Stop after this many snapshots (0 = until interrupted)
        #[arg(short, long, default_value = "0")]
        count: usize,
    },
}

fn init_logging(config: &ApiConfig) {
    let filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        if env_filter == "debug" {
            EnvFilter::new("warn,spectra_core=debug,cli=debug,tests=debug")
        } else if env_filter == "trace" {
            EnvFilter::new("warn,spectra_core=trace,cli=trace,tests=trace")
        } else {
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("warn,spectra_core=debug,cli=debug,tests=debug"))
        }
    } else {
        let level = config.logging.level.as_str();
        EnvFilter::new(format!("warn,spectra_core={level},cli={level}"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<ApiConfig> {
    let config = match path {
        Some(path) => ApiConfig::from_file(path)?,
        None => ApiConfig::load()?,
    };
    config.validate().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config(config_command) => {
            handle_config_command(config_command)?;
        }

        Commands::Watch { url, path, interval_ms, count } => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config);

            watch_resource(config, WatchOptions { base_url: url, path, interval_ms, count }).await?;
        }
    }

    Ok(())
}

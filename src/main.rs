use clap::{Parser, Subcommand};
use fabrica::config::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fabrica")]
#[command(about = "A self-refreshing topology cache for MySQL Fabric managed clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Fabrica Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cache instance until interrupted
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/fabrica.toml")]
        config: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_cache(config).await?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

async fn run_cache(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_from_file(&config_path)
        .map_err(|e| format!("Failed to load config from {:?}: {}", config_path, e))?;

    init_logging(&config);

    info!("Starting fabrica v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);

    fabrica::cache_init(
        &config.cache_name,
        &config.fabric.host,
        config.fabric.port,
        &config.fabric.user,
        &config.fabric.password,
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    fabrica::cache_stop(&config.cache_name).await?;
    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Cache name: '{}'", config.cache_name);
            println!(
                "  Fabric server: {}:{}",
                config.fabric.normalized_host(),
                config.fabric.port
            );
            println!("  Connect timeout: {}s", config.fabric.connect_timeout_sec);
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed: {}", e);
            return Err(Box::new(e));
        }
    }

    Ok(())
}

fn show_version() {
    println!("fabrica v{}", env!("CARGO_PKG_VERSION"));
    println!("A self-refreshing topology cache for MySQL Fabric managed clusters");
    println!();
    println!("Features:");
    println!("  • Group membership lookups served from an in-memory snapshot");
    println!("  • Background refresh on the service-advertised interval");
    println!("  • Indefinite reconnect with throttled error logging");
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

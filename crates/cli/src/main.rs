mod config;
mod serve;
mod trust;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use openaero_sqlite::SqliteStorage;
use openaero_storage::MemoryStorage;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Overrides, MEMORY_DATABASE};
use crate::serve::TlsPaths;
use crate::trust::sign_webhook::WebhookProvider;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// OpenAero marketplace server and operator tools.
#[derive(Parser)]
#[command(name = "openaero", version, about = "OpenAero marketplace server")]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true, env = "OPENAERO_CONFIG")]
    config: Option<PathBuf>,

    /// Log format (text or json); filter with RUST_LOG
    #[arg(long, global = true, default_value = "text", value_enum)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// `memory` or sqlite://<path>
        #[arg(long)]
        database_url: Option<String>,
        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Create the SQLite schema and exit
    InitDb {
        /// sqlite://<path>; defaults to the configured database
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Generate an Ed25519 keypair for signing test notifications
    Keygen {
        /// Signing algorithm (only ed25519 is supported)
        #[arg(long, default_value = "ed25519")]
        algorithm: String,
        /// Output file prefix (writes <prefix>.secret and <prefix>.pub)
        #[arg(long, default_value = "alipay")]
        prefix: String,
    },

    /// Print a signed payment notification body
    SignWebhook {
        /// Which provider's format and signature to produce
        #[arg(value_enum)]
        provider: WebhookProvider,
        /// Notification parameter, repeatable: --param out_trade_no=...
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Alipay: the .secret file from `openaero keygen`
        #[arg(long)]
        key: Option<PathBuf>,
        /// WeChat: the merchant API key
        #[arg(long, env = "WECHAT_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Serve {
            port,
            database_url,
            tls_cert,
            tls_key,
        } => {
            // Both TLS flags or neither
            let tls = match (tls_cert, tls_key) {
                (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
                (None, None) => None,
                _ => {
                    eprintln!("error: --tls-cert and --tls-key must both be provided");
                    process::exit(1);
                }
            };
            let config = load_config(
                cli.config.as_deref(),
                Overrides {
                    port,
                    database_url,
                },
            );
            let rt = runtime();
            if let Err(e) = rt.block_on(run_server(config, tls)) {
                eprintln!("Server error: {}", e);
                process::exit(1);
            }
        }
        Commands::InitDb { database_url } => {
            let config = load_config(
                cli.config.as_deref(),
                Overrides {
                    port: None,
                    database_url,
                },
            );
            if let Err(e) = runtime().block_on(init_db(&config)) {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
        Commands::Keygen { algorithm, prefix } => {
            trust::keygen::cmd_keygen(&algorithm, &prefix);
        }
        Commands::SignWebhook {
            provider,
            params,
            key,
            api_key,
        } => {
            trust::sign_webhook::cmd_sign_webhook(
                provider,
                &params,
                key.as_deref(),
                api_key.as_deref(),
            );
        }
    }
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Config {
    match Config::load(path, overrides) {
        Ok(config) => config,
        Err(config::ConfigError::Invalid(problems)) => {
            eprintln!("error: invalid configuration");
            for problem in problems {
                eprintln!("  - {}", problem);
            }
            process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    }
}

async fn run_server(
    config: Config,
    tls: Option<TlsPaths>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.database.url == MEMORY_DATABASE {
        tracing::warn!("using in-memory storage; all data is lost on exit");
        return serve::start_server(&config, Arc::new(MemoryStorage::new()), tls).await;
    }
    let storage =
        SqliteStorage::connect(&config.database.url, config.database.max_connections).await?;
    tracing::info!(url = %config.database.url, "connected to SQLite");
    let storage = Arc::new(storage);
    let result = serve::start_server(&config, storage.clone(), tls).await;
    storage.close().await;
    result
}

async fn init_db(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.database.url == MEMORY_DATABASE {
        return Err("init-db needs a sqlite:// database url".into());
    }
    // Connecting applies the schema.
    let storage =
        SqliteStorage::connect(&config.database.url, config.database.max_connections).await?;
    storage.close().await;
    println!("Initialized database at {}", config.database.url);
    Ok(())
}

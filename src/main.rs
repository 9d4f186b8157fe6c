use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use lectern::{
    adapters::http_handler::build_router,
    app,
    config::{ServerConfigValidator, loader::load_config, models::ServerConfig},
    metrics, tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the catalog server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config: ServerConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_from_config(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    ServerConfigValidator::validate(&config).context("Invalid configuration")?;

    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    let state = app::build_state(&config)
        .await
        .context("Failed to assemble application state")?;
    let router = build_router(state);

    let graceful_shutdown = Arc::new(GracefulShutdown::default());
    let signal_listener = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_listener.listen_for_signals().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        listen_addr = %addr,
        recommendation_url = %config.recommendation.base_url,
        storage = ?config.storage.backend,
        "lectern starting"
    );
    println!("Lectern listening on {addr}");

    let shutdown_signal = graceful_shutdown.signal();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let reason = shutdown_signal.wait().await;
        tracing::info!(?reason, "draining in-flight requests");
    });

    let drain_timeout = graceful_shutdown.drain_timeout();
    let drain_signal = graceful_shutdown.signal();
    tokio::select! {
        result = server => {
            result.context("Server error")?;
        }
        _ = async {
            drain_signal.wait().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(?drain_timeout, "drain timeout exceeded, forcing shutdown");
        }
    }

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!(
                "   • Recommendation Service: {} (timeout {} ms)",
                config.recommendation.base_url, config.recommendation.timeout_ms
            );
            println!("   • Token TTL: {}s", config.auth.token_ttl_secs);
            println!("   • Storage: {:?}", config.storage.backend);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Use a signing secret of at least 32 bytes");
            println!("   • Ensure the recommendation URL starts with http:// or https://");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let secret = format!(
        "{:032x}{:032x}",
        rand::random::<u128>(),
        rand::random::<u128>()
    );
    let default_config = format!(
        r#"# Lectern catalog server configuration

# The address to listen on
listen_addr = "127.0.0.1:8080"

[auth]
# HMAC secret for bearer tokens (at least 32 bytes); LECTERN__AUTH__SECRET overrides it
secret = "{secret}"
token_ttl_secs = 86400

[recommendation]
base_url = "http://localhost:5000"
timeout_ms = 5000

[fallback]
# Books need more ratings than this to be listed as popular
popular_min_rating_count = 10

[storage]
backend = "memory"
# backend = "sqlite"
# path = "lectern.db"
# seed_path = "seed.json"

[logging]
level = "info"
json = true
"#
    );

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'lectern serve --config {config_path}' to start the server");
    Ok(())
}

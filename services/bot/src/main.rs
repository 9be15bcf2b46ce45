// ror-bot: Connects to a RoRnet server as a pseudo-user and serves chat
// commands, announcements, and session tracking.

use std::path::Path;

use tracing::{error, info};

use ror_bot::RoRClient;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "ror-bot starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "bot.toml".to_owned());
    let config = match ror_bot::load_config_from_path(Path::new(&config_path)) {
        Ok(config) => {
            info!(
                host = %config.server.host,
                port = config.server.port,
                user = %config.user.name,
                "config loaded"
            );
            config
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let client = match RoRClient::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        err = client.run() => {
            error!(%err, "session ended");
            client.disconnect().await;
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            client.disconnect().await;
        }
    }
}

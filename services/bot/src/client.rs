//! Client wrapper: bounded reconnect around the connection, plus the
//! announcement ticker and operator command surface.

use std::path::Path;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::announcements;
use crate::commands;
use crate::config::{self, BotConfig};
use crate::connection::{ConnectOptions, ConnectionError, RoRConnection};
use crate::recorder::{NullRecorder, StreamRecorder};

/// A connected bot with its subscriptions installed.
pub struct RoRClient {
    pub config: BotConfig,
    pub conn: Arc<RoRConnection>,
}

impl RoRClient {
    /// Connect with the default (null) recorder backend.
    pub async fn connect(config: BotConfig) -> Result<Self, ConnectionError> {
        Self::connect_with_recorder(config, Arc::new(NullRecorder)).await
    }

    /// Connect, retrying transport-level refusals up to the configured
    /// bound.  Handshake refusals (wrong password, banned, full, wrong
    /// version) surface immediately.
    pub async fn connect_with_recorder(
        config: BotConfig,
        recorder: Arc<dyn StreamRecorder>,
    ) -> Result<Self, ConnectionError> {
        let truck_names = match &config.truck_names_file {
            Some(path) => match config::load_truck_names(Path::new(path)) {
                Ok(names) => names,
                Err(err) => {
                    warn!(%err, "truck name map not loaded; classifying from filenames only");
                    Default::default()
                }
            },
            None => Default::default(),
        };

        let options = ConnectOptions {
            host: config.server.host.clone(),
            port: config.server.port,
            username: config.user.name.clone(),
            user_token: config.user.token.clone(),
            password: config.server.password.clone(),
            language: config.user.language.clone(),
            heartbeat_interval: 1.0,
            truck_names,
        };
        let tries = config.reconnection.tries;
        let interval = Duration::from_secs(config.reconnection.interval_seconds);

        let mut conn = None;
        for attempt in 1..=tries {
            info!(attempt, tries, "connecting to {}:{}", options.host, options.port);
            match RoRConnection::connect(options.clone()).await {
                Ok(connected) => {
                    conn = Some(connected);
                    break;
                }
                // Only a transport-level refusal is worth another attempt.
                Err(ConnectionError::Refused { address }) => {
                    warn!(%address, "connection refused");
                    if attempt < tries {
                        info!(seconds = interval.as_secs(), "waiting before next attempt");
                        sleep(interval).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let Some(conn) = conn else {
            return Err(ConnectionError::RetriesExhausted {
                address: format!("{}:{}", options.host, options.port),
                attempts: tries,
            });
        };

        info!(address = conn.address(), "connected");

        announcements::install(&conn, &config.announcements);
        commands::install(&conn, recorder);

        Ok(Self { config, conn })
    }

    /// Wait for the session to end; returns the fatal error.
    pub async fn run(&self) -> ConnectionError {
        self.conn.closed().await
    }

    pub async fn disconnect(&self) {
        self.conn.disconnect().await;
    }
}

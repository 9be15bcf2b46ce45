//! Bot configuration loading.
//!
//! TOML is the sole config source.  Default config path: `bot.toml` in the
//! working directory.
//!
//! # Sections
//! - `[server]`: `host` (IPv4 or "localhost"), `port` (12000-12999),
//!   `password` (plaintext; hashed before it reaches the wire)
//! - `[user]`: `name`, `token`, `language`
//! - `[reconnection]`: `interval_seconds`, `tries`
//! - `[announcements]`: `delay_seconds`, `messages`, `color` (hex or a
//!   color name, normalized to `#RRGGBB` uppercase)
//! - `truck_names_file`: optional JSON `filename → display name` map

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config types (deserialized from TOML)
// ---------------------------------------------------------------------------

/// Top-level bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub server: ServerConfig,
    pub user: UserConfig,
    pub reconnection: ReconnectionConfig,
    pub announcements: AnnouncementsConfig,
    /// Optional path to the actor display-name JSON map.
    pub truck_names_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct UserConfig {
    pub name: String,
    pub token: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub interval_seconds: u64,
    pub tries: u32,
}

#[derive(Debug, Clone)]
pub struct AnnouncementsConfig {
    pub delay_seconds: u32,
    pub messages: Vec<String>,
    /// Normalized `#RRGGBB` uppercase.
    pub color: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    server: Option<RawServerConfig>,
    user: Option<RawUserConfig>,
    reconnection: Option<RawReconnectionConfig>,
    announcements: Option<RawAnnouncementsConfig>,
    truck_names_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUserConfig {
    name: Option<String>,
    token: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReconnectionConfig {
    interval_seconds: Option<u64>,
    tries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawAnnouncementsConfig {
    delay_seconds: Option<u32>,
    messages: Option<Vec<String>>,
    color: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load bot config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<BotConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load bot config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<BotConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    // Validate server
    let raw_server = raw
        .server
        .ok_or_else(|| ConfigError::MissingField("server".to_owned()))?;
    let host = check_host(raw_server.host.unwrap_or_else(|| "localhost".to_owned()))?;
    let port = raw_server.port.unwrap_or(12000);
    if !(12000..=12999).contains(&port) {
        return Err(ConfigError::InvalidValue(format!(
            "server.port must be in 12000..=12999, got {port}"
        )));
    }

    // User defaults
    let user = match raw.user {
        Some(u) => UserConfig {
            name: u.name.unwrap_or_else(|| "RoR Server Bot".to_owned()),
            token: u.token.unwrap_or_default(),
            language: u.language.unwrap_or_else(|| "en_US".to_owned()),
        },
        None => UserConfig {
            name: "RoR Server Bot".to_owned(),
            token: String::new(),
            language: "en_US".to_owned(),
        },
    };

    // Reconnection defaults
    let reconnection = match raw.reconnection {
        Some(r) => ReconnectionConfig {
            interval_seconds: r.interval_seconds.unwrap_or(5),
            tries: r.tries.unwrap_or(3),
        },
        None => ReconnectionConfig {
            interval_seconds: 5,
            tries: 3,
        },
    };
    if reconnection.tries == 0 {
        return Err(ConfigError::InvalidValue(
            "reconnection.tries must be at least 1".to_owned(),
        ));
    }

    // Announcement defaults
    let announcements = match raw.announcements {
        Some(a) => AnnouncementsConfig {
            delay_seconds: a.delay_seconds.unwrap_or(300),
            messages: a.messages.unwrap_or_default(),
            color: normalize_color(&a.color.unwrap_or_else(|| "yellow".to_owned()))?,
        },
        None => AnnouncementsConfig {
            delay_seconds: 300,
            messages: Vec::new(),
            color: normalize_color("yellow")?,
        },
    };

    Ok(BotConfig {
        server: ServerConfig {
            host,
            port,
            password: raw_server.password.unwrap_or_default(),
        },
        user,
        reconnection,
        announcements,
        truck_names_file: raw.truck_names_file,
    })
}

/// Load the actor `filename → display name` JSON map.
pub fn load_truck_names(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(format!("reading truck names '{}': {}", path.display(), e))
    })?;
    serde_json::from_str(&json).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn check_host(host: String) -> Result<String, ConfigError> {
    if host == "localhost" || host.parse::<Ipv4Addr>().is_ok() {
        return Ok(host);
    }
    Err(ConfigError::InvalidValue(format!(
        "server.host must be an IPv4 address or \"localhost\", got {host:?}"
    )))
}

/// Normalize a color to `#RRGGBB` uppercase.  Accepts hex strings and a
/// small set of color names.
fn normalize_color(color: &str) -> Result<String, ConfigError> {
    const NAMED: &[(&str, &str)] = &[
        ("black", "#000000"),
        ("grey", "#999999"),
        ("gray", "#999999"),
        ("red", "#FF0000"),
        ("yellow", "#FFFF00"),
        ("white", "#FFFFFF"),
        ("cyan", "#00FFFF"),
        ("blue", "#0000FF"),
        ("green", "#00FF00"),
        ("magenta", "#FF00FF"),
    ];

    if let Some(hex) = color.strip_prefix('#') {
        if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(format!("#{}", hex.to_ascii_uppercase()));
        }
        return Err(ConfigError::InvalidValue(format!(
            "announcements.color must be #RRGGBB, got {color:?}"
        )));
    }

    NAMED
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(color))
        .map(|(_, hex)| (*hex).to_owned())
        .ok_or_else(|| {
            ConfigError::InvalidValue(format!("unknown announcements.color {color:?}"))
        })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[server]
host = "127.0.0.1"
port = 12345
password = "secret"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.user.name, "RoR Server Bot");
        assert_eq!(config.user.language, "en_US");
        assert_eq!(config.reconnection.interval_seconds, 5);
        assert_eq!(config.reconnection.tries, 3);
        assert_eq!(config.announcements.delay_seconds, 300);
        assert!(config.announcements.messages.is_empty());
        assert_eq!(config.announcements.color, "#FFFF00");
    }

    #[test]
    fn server_section_is_required() {
        let err = load_config_from_str("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "server"));
    }

    #[test]
    fn port_outside_the_server_range_is_rejected() {
        let toml = r#"
[server]
host = "localhost"
port = 8080
"#;
        assert!(matches!(
            load_config_from_str(toml),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn hostnames_other_than_localhost_are_rejected() {
        let toml = r#"
[server]
host = "example.com"
port = 12000
"#;
        assert!(matches!(
            load_config_from_str(toml),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn colors_normalize_to_uppercase_hex() {
        assert_eq!(normalize_color("#ffcc00").unwrap(), "#FFCC00");
        assert_eq!(normalize_color("red").unwrap(), "#FF0000");
        assert_eq!(normalize_color("Yellow").unwrap(), "#FFFF00");
        assert!(normalize_color("#ff00").is_err());
        assert!(normalize_color("mauve-ish").is_err());
    }

    #[test]
    fn announcements_round_trip() {
        let toml = r##"
[server]
host = "localhost"
port = 12000

[announcements]
delay_seconds = 60
messages = ["one", "two"]
color = "#abcdef"
"##;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.announcements.delay_seconds, 60);
        assert_eq!(config.announcements.messages.len(), 2);
        assert_eq!(config.announcements.color, "#ABCDEF");
    }
}

//! RoRnet server bot.
//!
//! A long-lived pseudo-user client for Rigs of Rods multiplayer servers:
//! it performs the RoRnet handshake, registers its chat and character
//! streams, tracks every peer's users and streams, and exposes an
//! event-driven API plus a `>`-prefixed operator command surface.

pub mod announcements;
pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod events;
pub mod recorder;
pub mod registry;
pub mod ticker;

pub use client::RoRClient;
pub use config::{load_config_from_path, load_config_from_str, BotConfig};
pub use connection::{ConnectOptions, ConnectionError, RoRConnection, ServerRefusal};
pub use events::{Event, EventBus, EventKind};
pub use registry::{Registry, RegistryError};

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Room-scoped chat relay
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "roomchat-server", version, about = "Room-scoped chat relay")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "ROOMCHAT_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "ROOMCHAT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./roomchat.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "ROOMCHAT_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Room directory tuning (loaded from [rooms] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub rooms: RoomsConfig,

    /// Per-connection tuning (loaded from [connection] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub connection: ConnectionConfig,
}

/// Room capacity and inactivity reclamation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Maximum members per room (default: 3)
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Seconds without member activity before a room is retired (default: 300)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Seconds between inactivity sweeps (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Bounded capacity of each room's command queue (default: 64)
    #[serde(default = "default_command_queue")]
    pub command_queue_capacity: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            command_queue_capacity: default_command_queue(),
        }
    }
}

fn default_max_clients() -> usize {
    3
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_command_queue() -> usize {
    64
}

/// Transport limits and liveness timers for each client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Frames buffered per client before it is dropped as a slow reader (default: 256)
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue_capacity: usize,

    /// Largest inbound message accepted, in bytes (default: 512)
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Seconds to wait for any inbound frame, pongs included, before giving up (default: 60)
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Seconds between server pings; must be shorter than pong_wait_secs (default: 54)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds allowed for one outbound write batch (default: 10)
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue(),
            max_frame_bytes: default_max_frame_bytes(),
            pong_wait_secs: default_pong_wait(),
            ping_interval_secs: default_ping_interval(),
            write_wait_secs: default_write_wait(),
        }
    }
}

fn default_outbound_queue() -> usize {
    256
}
fn default_max_frame_bytes() -> usize {
    512
}
fn default_pong_wait() -> u64 {
    60
}
fn default_ping_interval() -> u64 {
    // 9/10 of the pong wait, so a ping always lands inside the read window
    default_pong_wait() * 9 / 10
}
fn default_write_wait() -> u64 {
    10
}

/// Runtime form of `RoomsConfig`.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub max_clients: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub command_queue_capacity: usize,
}

impl From<&RoomsConfig> for RoomSettings {
    fn from(c: &RoomsConfig) -> Self {
        Self {
            max_clients: c.max_clients,
            idle_timeout: Duration::from_secs(c.idle_timeout_secs),
            sweep_interval: Duration::from_secs(c.sweep_interval_secs.max(1)),
            command_queue_capacity: c.command_queue_capacity.max(1),
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::from(&RoomsConfig::default())
    }
}

/// Runtime form of `ConnectionConfig`.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub outbound_queue_capacity: usize,
    pub max_frame_bytes: usize,
    pub pong_wait: Duration,
    pub ping_interval: Duration,
    pub write_wait: Duration,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    /// Timers are at least one second, and pings must land inside the read
    /// window; a ping interval at or past `pong_wait` falls back to 9/10 of it.
    fn from(c: &ConnectionConfig) -> Self {
        let pong_wait = Duration::from_secs(c.pong_wait_secs.max(1));
        let mut ping_interval = Duration::from_secs(c.ping_interval_secs.max(1));
        if ping_interval >= pong_wait {
            tracing::warn!(
                ping_interval_secs = c.ping_interval_secs,
                pong_wait_secs = c.pong_wait_secs,
                "ping_interval_secs must be below pong_wait_secs, using 9/10 of pong_wait"
            );
            ping_interval = pong_wait * 9 / 10;
        }
        Self {
            outbound_queue_capacity: c.outbound_queue_capacity.max(1),
            max_frame_bytes: c.max_frame_bytes,
            pong_wait,
            ping_interval,
            write_wait: Duration::from_secs(c.write_wait_secs.max(1)),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./roomchat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            rooms: RoomsConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (ROOMCHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        Self::figment(cli).extract()
    }

    fn figment(cli: Config) -> Figment {
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ROOMCHAT_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings::from(&self.rooms)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings::from(&self.connection)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Roomchat Server Configuration
# Place this file at ./roomchat.toml or specify with --config <path>
# All settings can be overridden via environment variables (ROOMCHAT_PORT,
# ROOMCHAT_ROOMS__MAX_CLIENTS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Rooms ----
# [rooms]
# max_clients = 3               # Connections refused once a room holds this many
# idle_timeout_secs = 300       # Rooms idle longer than this are closed
# sweep_interval_secs = 60      # How often idle rooms are looked for
# command_queue_capacity = 64   # Pending operations buffered per room

# ---- Connections ----
# [connection]
# outbound_queue_capacity = 256 # Frames buffered per client before it is dropped
# max_frame_bytes = 512         # Largest inbound message
# pong_wait_secs = 60           # Read window; silence past this closes the socket
# ping_interval_secs = 54       # Keep below pong_wait_secs
# write_wait_secs = 10          # Deadline for each outbound write
"#
    .to_string()
}

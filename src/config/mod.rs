//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated, empty = any)
    pub client_origin: Option<String>,

    pub server: ServerSettings,
    pub game: GameSettings,
}

/// Connection handling settings
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// Pacing delay applied during the connect handshake
    pub handshake_delay: Duration,
    /// Per-client outbound message buffer
    pub outbound_buffer: usize,
    /// Max Move/Laser requests per second per connection
    pub input_rate_limit: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            handshake_delay: Duration::from_secs(1),
            outbound_buffer: 64,
            input_rate_limit: 30,
        }
    }
}

/// World simulation settings
#[derive(Clone, Debug)]
pub struct GameSettings {
    /// Simulation tick length
    pub tick: Duration,
    /// Intent queue capacity
    pub intent_buffer: usize,
    /// Playable cells span -radius..=radius on both axes
    pub arena_radius: i32,
    pub score_to_win: u32,
    /// Pause between a round ending and the next one starting
    pub round_over_delay: Duration,
    pub move_cooldown: Duration,
    pub laser_cooldown: Duration,
    /// Max cells a laser travels
    pub laser_range: u32,
    /// Seed for respawn placement
    pub seed: u64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(33),
            intent_buffer: 256,
            arena_radius: 20,
            score_to_win: 10,
            round_over_delay: Duration::from_secs(10),
            move_cooldown: Duration::from_millis(50),
            laser_cooldown: Duration::from_millis(200),
            laser_range: 40,
            seed: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let server = ServerSettings {
            handshake_delay: Duration::from_millis(parse_or("HANDSHAKE_DELAY_MS", 1000)?),
            outbound_buffer: parse_or("OUTBOUND_BUFFER", 64)?,
            input_rate_limit: parse_or("INPUT_RATE_LIMIT", 30)?,
        };

        let game = GameSettings {
            tick: Duration::from_millis(parse_or("TICK_MS", 33)?),
            intent_buffer: parse_or("INTENT_BUFFER", 256)?,
            arena_radius: parse_or("ARENA_RADIUS", 20)?,
            score_to_win: parse_or("SCORE_TO_WIN", 10)?,
            round_over_delay: Duration::from_secs(parse_or("ROUND_OVER_SECS", 10)?),
            move_cooldown: Duration::from_millis(parse_or("MOVE_COOLDOWN_MS", 50)?),
            laser_cooldown: Duration::from_millis(parse_or("LASER_COOLDOWN_MS", 200)?),
            laser_range: parse_or("LASER_RANGE", 40)?,
            seed: parse_or("WORLD_SEED", rand::random::<u64>())?,
        };

        if game.tick.is_zero() {
            return Err(ConfigError::Invalid("TICK_MS"));
        }
        if server.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("OUTBOUND_BUFFER"));
        }
        if game.intent_buffer == 0 {
            return Err(ConfigError::Invalid("INTENT_BUFFER"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").ok().filter(|s| !s.trim().is_empty()),

            server,
            game,
        })
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::Invalid(key)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

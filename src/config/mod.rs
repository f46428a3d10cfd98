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
    /// Allowed CORS origins, comma separated
    pub client_origin: String,

    /// Maximum concurrent players in the match
    pub max_players: usize,
    /// Simulation ticks per second (one snapshot per tick)
    pub tick_rate: u32,
    /// Player movement speed (units per second)
    pub move_speed: f32,
    /// Half width of the square arena floor
    pub arena_half_extent: f32,
    /// Arena ceiling
    pub arena_height: f32,
    /// Seed for spawn placement
    pub match_seed: u64,
    /// Start the match as soon as the server boots
    pub auto_start_match: bool,

    /// Time allowed to send `setName` after connecting
    pub handshake_timeout: Duration,
    /// How long an abnormally closed session keeps its player for a resume
    pub reconnect_grace: Duration,
    /// Deadline for a single outbound write
    pub write_timeout: Duration,
    /// Per-session outbound queue depth (snapshots)
    pub outbound_queue_capacity: usize,
    /// Inbound messages per second per session
    pub input_rate_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            client_origin: "http://localhost:3000".to_string(),
            max_players: 16,
            tick_rate: 30,
            move_speed: 8.0,
            arena_half_extent: 100.0,
            arena_height: 30.0,
            match_seed: 0x5eed,
            auto_start_match: true,
            handshake_timeout: Duration::from_secs(10),
            reconnect_grace: Duration::from_secs(15),
            write_timeout: Duration::from_secs(5),
            outbound_queue_capacity: 32,
            input_rate_limit: 60,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),

            max_players: parse_var("MAX_PLAYERS", defaults.max_players)?,
            tick_rate: parse_var("TICK_RATE", defaults.tick_rate)?,
            move_speed: parse_var("MOVE_SPEED", defaults.move_speed)?,
            arena_half_extent: parse_var("ARENA_HALF_EXTENT", defaults.arena_half_extent)?,
            arena_height: parse_var("ARENA_HEIGHT", defaults.arena_height)?,
            match_seed: parse_var("MATCH_SEED", defaults.match_seed)?,
            auto_start_match: parse_var("AUTO_START_MATCH", defaults.auto_start_match)?,

            handshake_timeout: parse_millis("HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout)?,
            reconnect_grace: parse_millis("RECONNECT_GRACE_MS", defaults.reconnect_grace)?,
            write_timeout: parse_millis("WRITE_TIMEOUT_MS", defaults.write_timeout)?,
            outbound_queue_capacity: parse_var("OUTBOUND_QUEUE_CAPACITY", defaults.outbound_queue_capacity)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", defaults.input_rate_limit)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_players == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_PLAYERS",
                value: "0".to_string(),
            });
        }
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::Invalid {
                name: "TICK_RATE",
                value: self.tick_rate.to_string(),
            });
        }
        // Room for the welcome pair (connect + snapshot)
        if self.outbound_queue_capacity < 2 {
            return Err(ConfigError::Invalid {
                name: "OUTBOUND_QUEUE_CAPACITY",
                value: self.outbound_queue_capacity.to_string(),
            });
        }
        require_positive("MOVE_SPEED", self.move_speed)?;
        require_positive("ARENA_HALF_EXTENT", self.arena_half_extent)?;
        require_positive("ARENA_HEIGHT", self.arena_height)?;
        Ok(())
    }
}

/// Geometry and speed must be finite and strictly positive
fn require_positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::Invalid { name, value })
        }
        Err(_) => Ok(default),
    }
}

fn parse_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(name, default.as_millis() as u64).map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment is process-global; keep every env mutation in this one test
    #[test]
    fn test_from_env_overrides_and_rejects() {
        env::remove_var("PORT");
        env::set_var("SERVER_ADDR", "127.0.0.1:9100");
        env::set_var("MAX_PLAYERS", "4");
        env::set_var("RECONNECT_GRACE_MS", "2500");
        let config = Config::from_env().unwrap();
        assert_eq!(config.server_addr.port(), 9100);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.reconnect_grace, Duration::from_millis(2500));
        assert_eq!(config.tick_rate, Config::default().tick_rate);

        env::set_var("MAX_PLAYERS", "lots");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { name: "MAX_PLAYERS", .. })
        ));

        env::set_var("MAX_PLAYERS", "0");
        assert!(Config::from_env().is_err());

        env::set_var("MAX_PLAYERS", "4");
        env::set_var("SERVER_ADDR", "not an address");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidAddress)));

        env::set_var("SERVER_ADDR", "127.0.0.1:9100");
        env::set_var("ARENA_HALF_EXTENT", "NaN");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { name: "ARENA_HALF_EXTENT", .. })
        ));

        for var in ["SERVER_ADDR", "MAX_PLAYERS", "RECONNECT_GRACE_MS", "ARENA_HALF_EXTENT"] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_validate_rejects_degenerate_geometry() {
        assert!(Config::default().validate().is_ok());

        let cases = [
            ("ARENA_HALF_EXTENT", Config { arena_half_extent: f32::NAN, ..Config::default() }),
            ("ARENA_HALF_EXTENT", Config { arena_half_extent: -5.0, ..Config::default() }),
            ("ARENA_HEIGHT", Config { arena_height: f32::INFINITY, ..Config::default() }),
            ("ARENA_HEIGHT", Config { arena_height: 0.0, ..Config::default() }),
            ("MOVE_SPEED", Config { move_speed: -1.0, ..Config::default() }),
            ("MOVE_SPEED", Config { move_speed: f32::NAN, ..Config::default() }),
        ];
        for (expected, config) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, expected),
                other => panic!("{} accepted: {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_validate_requires_room_for_welcome() {
        let config = Config {
            outbound_queue_capacity: 1,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "OUTBOUND_QUEUE_CAPACITY", .. })
        ));
    }
}

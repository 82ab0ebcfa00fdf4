//! Server configuration loaded from `CHATLINE_*` environment variables.
//!
//! # Environment Variables
//!
//! - `CHATLINE_BIND_ADDR`: Listen address. Default: `0.0.0.0:8080`
//! - `CHATLINE_JWT_SECRET`: HS256 secret for identity tokens. Default: a development secret
//! - `CHATLINE_JWT_ISSUER`: Required `iss` claim (optional)
//! - `CHATLINE_LOG_FORMAT`: `pretty` or `json`. Default: `pretty`
//! - `CHATLINE_SHUTDOWN_GRACE_SECS`: Drain timeout on shutdown. Default: `30`
//! - `CHATLINE_OUTBOUND_CAPACITY`: Per-connection queue capacity. Default: `256`
//! - `CHATLINE_MAX_FRAME_BYTES`: Largest accepted inbound frame. Default: `4096`
//! - `CHATLINE_PONG_WAIT_SECS`: Heartbeat window; pings go out at 9/10 of it. Default: `60`
//! - `CHATLINE_WRITE_WAIT_SECS`: Per-write timeout. Default: `10`
//! - `CHATLINE_HANDSHAKE_SECS`: Authentication deadline. Default: `30`
//!
//! Absent or unparsable values fall back to the default.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chatline_hub::HubConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Secret used when `CHATLINE_JWT_SECRET` is not set.
pub const DEV_JWT_SECRET: &str = "chatline-development-secret";

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl LogFormat {
    /// Parse a log format, case-insensitively. Unknown values mean `Pretty`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub log_format: LogFormat,
    /// How long shutdown waits for connections to drain
    pub shutdown_grace: Duration,
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_issuer: None,
            log_format: LogFormat::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_addr = parse_or(&lookup, "CHATLINE_BIND_ADDR", defaults.bind_addr);
        let jwt_secret = lookup("CHATLINE_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.jwt_secret);
        let jwt_issuer = lookup("CHATLINE_JWT_ISSUER").filter(|s| !s.is_empty());
        let log_format = lookup("CHATLINE_LOG_FORMAT")
            .map(|s| LogFormat::parse(&s))
            .unwrap_or_default();
        let shutdown_grace = secs_or(&lookup, "CHATLINE_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace);

        let mut hub = defaults.hub;
        hub.outbound_capacity = parse_or(&lookup, "CHATLINE_OUTBOUND_CAPACITY", hub.outbound_capacity);
        hub.max_frame_size = parse_or(&lookup, "CHATLINE_MAX_FRAME_BYTES", hub.max_frame_size);
        hub.write_wait = secs_or(&lookup, "CHATLINE_WRITE_WAIT_SECS", hub.write_wait);
        hub.handshake_deadline = secs_or(&lookup, "CHATLINE_HANDSHAKE_SECS", hub.handshake_deadline);
        let pong_wait = secs_or(&lookup, "CHATLINE_PONG_WAIT_SECS", hub.pong_wait);
        let hub = hub.with_pong_wait(pong_wait);

        Self {
            bind_addr,
            jwt_secret,
            jwt_issuer,
            log_format,
            shutdown_grace,
            hub,
        }
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        info!("Log format: {}", self.log_format);
        info!("Shutdown grace period: {:?}", self.shutdown_grace);
        match &self.jwt_issuer {
            Some(issuer) => info!("JWT issuer: {}", issuer),
            None => info!("JWT issuer: not checked"),
        }
        if self.jwt_secret == DEV_JWT_SECRET {
            warn!("CHATLINE_JWT_SECRET not set, using the development secret");
        }
        info!(
            outbound_capacity = self.hub.outbound_capacity,
            max_frame_size = self.hub.max_frame_size,
            pong_wait = ?self.hub.pong_wait,
            ping_period = ?self.hub.ping_period,
            write_wait = ?self.hub.write_wait,
            handshake_deadline = ?self.hub.handshake_deadline,
            "Hub configuration"
        );
    }

    /// Create a test configuration bound to an ephemeral local port.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: "test-secret".to_string(),
            shutdown_grace: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparsable configuration value");
            default
        }),
        None => default,
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_or(lookup, key, default.as_secs());
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert!(config.jwt_issuer.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
        assert_eq!(config.hub, HubConfig::default());
    }

    #[test]
    fn test_values_from_environment() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CHATLINE_BIND_ADDR", "127.0.0.1:9000"),
            ("CHATLINE_JWT_SECRET", "s3cret"),
            ("CHATLINE_JWT_ISSUER", "chatline-auth"),
            ("CHATLINE_LOG_FORMAT", "json"),
            ("CHATLINE_SHUTDOWN_GRACE_SECS", "5"),
            ("CHATLINE_OUTBOUND_CAPACITY", "32"),
            ("CHATLINE_MAX_FRAME_BYTES", "1024"),
            ("CHATLINE_PONG_WAIT_SECS", "20"),
            ("CHATLINE_WRITE_WAIT_SECS", "3"),
            ("CHATLINE_HANDSHAKE_SECS", "7"),
        ]));

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.jwt_issuer.as_deref(), Some("chatline-auth"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.hub.outbound_capacity, 32);
        assert_eq!(config.hub.max_frame_size, 1024);
        assert_eq!(config.hub.pong_wait, Duration::from_secs(20));
        assert_eq!(config.hub.ping_period, Duration::from_secs(18));
        assert_eq!(config.hub.write_wait, Duration::from_secs(3));
        assert_eq!(config.hub.handshake_deadline, Duration::from_secs(7));
        assert!(config.hub.validate().is_ok());
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CHATLINE_BIND_ADDR", "not an address"),
            ("CHATLINE_OUTBOUND_CAPACITY", "lots"),
            ("CHATLINE_JWT_SECRET", ""),
        ]));
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.hub.outbound_capacity, 256);
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
    }
}

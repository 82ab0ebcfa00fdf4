//! Tunables for the registry and the per-connection pumps.

use std::time::Duration;

use crate::HubError;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default capacity of the registry command queue.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 1024;

/// Default maximum size of an inbound frame in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Default time allowed between heartbeat acknowledgements.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default time allowed for a single write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default handshake window for unauthenticated connections.
pub const DEFAULT_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(30);

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity C of each connection's outbound queue
    pub outbound_capacity: usize,
    /// Capacity of the registry command queue
    pub registry_capacity: usize,
    /// Largest inbound frame accepted, in bytes
    pub max_frame_size: usize,
    /// Read deadline, refreshed by every pong
    pub pong_wait: Duration,
    /// Heartbeat period, must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Upper bound for one write on the transport
    pub write_wait: Duration,
    /// Window in which a new connection must authenticate
    pub handshake_deadline: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: ping_period_for(DEFAULT_PONG_WAIT),
            write_wait: DEFAULT_WRITE_WAIT,
            handshake_deadline: DEFAULT_HANDSHAKE_DEADLINE,
        }
    }
}

impl HubConfig {
    /// Set the pong wait and derive the ping period from it (9/10 of the window).
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = ping_period_for(pong_wait);
        self
    }

    /// Check the invariants the pumps rely on.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.outbound_capacity == 0 {
            return Err(HubError::config("outbound_capacity must be greater than zero"));
        }
        if self.registry_capacity == 0 {
            return Err(HubError::config("registry_capacity must be greater than zero"));
        }
        if self.max_frame_size == 0 {
            return Err(HubError::config("max_frame_size must be greater than zero"));
        }
        if self.ping_period.is_zero() {
            return Err(HubError::config("ping_period must be greater than zero"));
        }
        if self.ping_period >= self.pong_wait {
            return Err(HubError::config(format!(
                "ping_period ({:?}) must be shorter than pong_wait ({:?})",
                self.ping_period, self.pong_wait
            )));
        }
        Ok(())
    }
}

/// Heartbeat period for a given pong window.
pub fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert_eq!(config.handshake_deadline, Duration::from_secs(30));
    }

    #[test]
    fn test_with_pong_wait_derives_ping_period() {
        let config = HubConfig::default().with_pong_wait(Duration::from_secs(10));
        assert_eq!(config.ping_period, Duration::from_secs(9));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ping_period_must_be_shorter_than_pong_wait() {
        let config = HubConfig {
            ping_period: Duration::from_secs(60),
            ..HubConfig::default()
        };
        assert!(matches!(config.validate(), Err(HubError::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = HubConfig {
            outbound_capacity: 0,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Channel configuration.

use std::time::Duration;

use crate::error::{DevlinkError, Result};

/// Default per-attempt acknowledgement timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default number of retransmissions beyond the first send.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Configuration of a logical channel: addressing policy plus retry defaults.
///
/// `address: None` disables addressing; no frame on the channel carries an
/// address byte. When addressing is enabled, `address` is the channel's
/// device address: the default destination for [`send`](crate::Master::send)
/// and the engine's own address for inbound dispatch and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Channel device address, or `None` for an unaddressed channel.
    pub address: Option<u8>,
    /// Per-attempt acknowledgement timeout.
    pub timeout: Duration,
    /// Retransmissions beyond the first send.
    pub attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: None,
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl LinkConfig {
    /// Create an unaddressed config with default timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an addressed config with default timing.
    pub fn addressed(address: u8) -> Self {
        Self {
            address: Some(address),
            ..Self::default()
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retransmission count.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Whether frames on this channel carry an address byte.
    #[inline]
    pub fn is_addressed(&self) -> bool {
        self.address.is_some()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(DevlinkError::Config(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

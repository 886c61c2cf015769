use std::time::Duration;

use tracing::debug;

use crate::{
    config::{BootConfig, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_RETRY_INTERVAL},
    factory::DatabaseFactory,
};

/// Probes the configured database with a fixed pause between attempts.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionProber {
    attempts: u32,
    interval: Duration,
}

impl ConnectionProber {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    pub fn from_config(config: &BootConfig) -> Self {
        Self::new(config.connect_attempts, config.connect_retry_interval)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `true` on the first successful attempt, `false` once every attempt
    /// failed.
    pub async fn can_connect(&self, factory: &DatabaseFactory) -> bool {
        for attempt in 1..=self.attempts {
            if factory.can_connect().await {
                return true;
            }

            if attempt < self.attempts {
                debug!(
                    attempt,
                    attempts = self.attempts,
                    "could not connect to database, retrying in {:?}",
                    self.interval
                );

                tokio::time::sleep(self.interval).await;
            }
        }

        debug!(attempts = self.attempts, "could not connect to database");

        false
    }
}

impl Default for ConnectionProber {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_RETRY_INTERVAL)
    }
}

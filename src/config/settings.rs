use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::interface::DEFAULT_BAUD_RATE;

/// Timing and link settings for the bus protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    pub baud_rate: u32,
    pub range_timeout_ms: u64,
    pub scan_timeout_ms: u64,
    pub echo_timeout_ms: u64,
    pub write_step_delay_ms: u64,
    pub last_port: Option<String>,
}

impl ProtocolSettings {
    pub fn range_timeout(&self) -> Duration {
        Duration::from_millis(self.range_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn write_step_delay(&self) -> Duration {
        Duration::from_millis(self.write_step_delay_ms)
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            range_timeout_ms: 10_000,
            scan_timeout_ms: 30_000,
            echo_timeout_ms: 10_000,
            write_step_delay_ms: 500,
            last_port: None,
        }
    }
}

//! Engine configuration: watermarks, batch sizes, rotation schedule.

use std::time::Duration;

/// Tunables for the session identity engine.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Refill triggers when a one-time reserve drops to this count or below.
    pub low_watermark: usize,
    /// How many one-time keypairs a single refill generates per kind.
    pub batch_size: usize,
    /// Scheduled PQ-KEM rotation interval.
    pub rotation_interval: Duration,
    /// Base for allocated local device names; collisions get " (n)" suffixes.
    pub device_name_base: String,
    /// Minimum operators required for a channel.
    pub min_channel_operators: usize,
    /// Minimum members required for a channel.
    pub min_channel_members: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            low_watermark: 10,
            batch_size: 100,
            rotation_interval: Duration::from_secs(7 * 86400),
            device_name_base: "device".into(),
            min_channel_operators: 1,
            min_channel_members: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.low_watermark, 10);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.rotation_interval, Duration::from_secs(604_800));
        assert_eq!(cfg.min_channel_operators, 1);
        assert_eq!(cfg.min_channel_members, 3);
    }
}

//! Resolved database and keyspace configuration.
//!
//! [`Params`](crate::Params) collects textual assignments; the structs here
//! are what the engine actually reads after resolution.

/// Default low watermark for space amplification, in percent.
pub const DEFAULT_LWM_PCT: u32 = 117;

/// Default high watermark for space amplification, in percent.
pub const DEFAULT_HWM_PCT: u32 = 135;

/// Database-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Whether to sync the data log on every commit.
    pub sync_on_commit: bool,

    /// Disables write throttling entirely.
    pub throttle_disable: bool,

    /// Non-priority puts per second (0 = unlimited).
    pub throttle_rate: u64,

    /// Compaction target for [`CompactRequest::ToLowWatermark`](crate::CompactRequest).
    pub lwm_pct: u32,

    /// Space amplification considered excessive.
    pub hwm_pct: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            throttle_disable: false,
            throttle_rate: 0,
            lwm_pct: DEFAULT_LWM_PCT,
            hwm_pct: DEFAULT_HWM_PCT,
        }
    }
}

impl DbConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the data log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the non-priority put rate limit.
    #[must_use]
    pub const fn throttle_rate(mut self, rate: u64) -> Self {
        self.throttle_rate = rate;
        self
    }

    /// Sets the compaction watermarks.
    #[must_use]
    pub const fn watermarks(mut self, lwm_pct: u32, hwm_pct: u32) -> Self {
        self.lwm_pct = lwm_pct;
        self.hwm_pct = hwm_pct;
        self
    }

    /// Effective put rate limit, `None` when unthrottled.
    #[must_use]
    pub fn effective_rate(&self) -> Option<u64> {
        if self.throttle_disable || self.throttle_rate == 0 {
            None
        } else {
            Some(self.throttle_rate)
        }
    }
}

/// Per-keyspace settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvsConfig {
    /// Configured key prefix length.
    pub prefix_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DbConfig::default();
        assert!(config.sync_on_commit);
        assert_eq!(config.lwm_pct, 117);
        assert_eq!(config.hwm_pct, 135);
        assert_eq!(config.effective_rate(), None);
    }

    #[test]
    fn builder_pattern() {
        let config = DbConfig::new()
            .sync_on_commit(false)
            .throttle_rate(500)
            .watermarks(110, 150);

        assert!(!config.sync_on_commit);
        assert_eq!(config.effective_rate(), Some(500));
        assert_eq!((config.lwm_pct, config.hwm_pct), (110, 150));

        let disabled = DbConfig {
            throttle_disable: true,
            ..config
        };
        assert_eq!(disabled.effective_rate(), None);
    }
}

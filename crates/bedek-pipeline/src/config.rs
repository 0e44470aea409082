//! Pipeline configuration.

use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default records per dispatched batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default bound on dispatched-but-unfinished batches per stream.
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 5;

/// Default minimum acceptable overall quality score.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.8;

/// Default retries for a failed batch dispatch.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between batch retries, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Default per-stream processing timeout in seconds.
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 300;

/// Default retention window for finished sessions, in seconds.
pub const DEFAULT_SESSION_RETENTION_SECS: u64 = 3600;

/// Default interval between stale-session sweeps, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default interval between pipeline-metrics publications, in seconds.
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Default bound on how long the orchestrator polls a stream for a
/// terminal state, in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 300;

/// Default event broadcast channel capacity.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Batch size used by real-time sessions unless the request overrides it.
pub const REALTIME_BATCH_SIZE: usize = 10;

/// Poll timeout used by real-time sessions, in seconds.
pub const REALTIME_POLL_TIMEOUT_SECS: u64 = 30;

/// Orchestrator and stream-manager defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub default_batch_size: usize,
    pub default_max_concurrent_batches: usize,
    pub default_quality_threshold: f64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub stream_timeout_secs: u64,
    pub session_retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub poll_timeout_secs: u64,
    pub event_channel_capacity: usize,
    pub enable_monitoring: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            default_max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            default_quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            stream_timeout_secs: DEFAULT_STREAM_TIMEOUT_SECS,
            session_retention_secs: DEFAULT_SESSION_RETENTION_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            enable_monitoring: true,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment and defaults.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = PipelineConfig {
            default_batch_size: env_parsed("BEDEK_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            default_max_concurrent_batches: env_parsed(
                "BEDEK_MAX_CONCURRENT_BATCHES",
                DEFAULT_MAX_CONCURRENT_BATCHES,
            ),
            default_quality_threshold: env_parsed(
                "BEDEK_QUALITY_THRESHOLD",
                DEFAULT_QUALITY_THRESHOLD,
            ),
            retry_attempts: env_parsed("BEDEK_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
            retry_delay_ms: env_parsed("BEDEK_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            stream_timeout_secs: env_parsed("BEDEK_STREAM_TIMEOUT", DEFAULT_STREAM_TIMEOUT_SECS),
            session_retention_secs: env_parsed(
                "BEDEK_SESSION_RETENTION",
                DEFAULT_SESSION_RETENTION_SECS,
            ),
            sweep_interval_secs: env_parsed("BEDEK_SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL_SECS),
            monitor_interval_secs: env_parsed(
                "BEDEK_MONITOR_INTERVAL",
                DEFAULT_MONITOR_INTERVAL_SECS,
            ),
            poll_timeout_secs: env_parsed("BEDEK_POLL_TIMEOUT", DEFAULT_POLL_TIMEOUT_SECS),
            event_channel_capacity: env_parsed(
                "BEDEK_EVENT_CAPACITY",
                DEFAULT_EVENT_CHANNEL_CAPACITY,
            ),
            enable_monitoring: env_parsed("BEDEK_ENABLE_MONITORING", true),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_batch_size == 0 {
            anyhow::bail!("batch size must be at least 1");
        }
        if self.default_max_concurrent_batches == 0 {
            anyhow::bail!("max concurrent batches must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.default_quality_threshold) {
            anyhow::bail!(
                "quality threshold must be within [0, 1], got {}",
                self.default_quality_threshold
            );
        }
        if self.event_channel_capacity == 0 {
            anyhow::bail!("event channel capacity must be at least 1");
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_batch_size, 100);
        assert_eq!(config.default_max_concurrent_batches, 5);
        assert_eq!(config.default_quality_threshold, 0.8);
        assert!(config.enable_monitoring);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig {
            default_batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        config.default_batch_size = 1;
        config.default_quality_threshold = 1.2;
        assert!(config.validate().is_err());

        config.default_quality_threshold = 0.8;
        config.default_max_concurrent_batches = 0;
        assert!(config.validate().is_err());
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-tenant query limits consulted by the engine.
pub trait Limits: Send + Sync {
    /// Maximum number of distinct series a metric query may return.
    fn max_query_series(&self) -> usize;

    /// Maximum span of a single range selector. Zero disables the check.
    fn max_query_range(&self) -> Duration;

    /// Wall-clock budget for one query.
    fn query_timeout(&self) -> Duration;

    fn multi_variant_queries_enabled(&self) -> bool;
}

/// Limits that never bind.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimits;

impl Limits for NoLimits {
    fn max_query_series(&self) -> usize {
        usize::MAX
    }

    fn max_query_range(&self) -> Duration {
        Duration::ZERO
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn multi_variant_queries_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_query_series")]
    pub max_query_series: usize,
    /// 0 disables the range interval check.
    #[serde(default)]
    pub max_query_range_ms: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default)]
    pub multi_variant_queries_enabled: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_query_series: default_max_query_series(),
            max_query_range_ms: 0,
            query_timeout_ms: default_query_timeout_ms(),
            multi_variant_queries_enabled: false,
        }
    }
}

impl Limits for LimitsConfig {
    fn max_query_series(&self) -> usize {
        self.max_query_series
    }

    fn max_query_range(&self) -> Duration {
        Duration::from_millis(self.max_query_range_ms)
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    fn multi_variant_queries_enabled(&self) -> bool {
        self.multi_variant_queries_enabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How far back an instant log query (start == end) reads entries.
    #[serde(default = "default_max_look_back_period_ms")]
    pub max_look_back_period_ms: u64,
    /// Emit an info event with the query text when execution starts.
    #[serde(default)]
    pub log_executing_query: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_look_back_period_ms: default_max_look_back_period_ms(),
            log_executing_query: false,
        }
    }
}

impl EngineConfig {
    pub fn max_look_back_period(&self) -> Duration {
        Duration::from_millis(self.max_look_back_period_ms)
    }
}

fn default_max_query_series() -> usize {
    500
}

fn default_query_timeout_ms() -> u64 {
    300_000
}

fn default_max_look_back_period_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_fill_defaults_for_missing_fields() {
        let config: LimitsConfig = serde_json::from_str("{}").expect("valid config");

        assert_eq!(config.max_query_series(), 500);
        assert_eq!(config.max_query_range(), Duration::ZERO);
        assert_eq!(config.query_timeout(), Duration::from_secs(300));
        assert!(!config.multi_variant_queries_enabled());
    }

    #[test]
    fn should_read_configured_limits() {
        let config: LimitsConfig = serde_json::from_str(
            r#"{"max_query_series": 3, "max_query_range_ms": 600000, "multi_variant_queries_enabled": true}"#,
        )
        .expect("valid config");

        assert_eq!(config.max_query_series(), 3);
        assert_eq!(config.max_query_range(), Duration::from_secs(600));
        assert!(config.multi_variant_queries_enabled());
    }

    #[test]
    fn should_default_engine_look_back() {
        let config: EngineConfig = serde_json::from_str("{}").expect("valid config");
        assert_eq!(config.max_look_back_period(), Duration::from_secs(30));
        assert!(!config.log_executing_query);
    }
}

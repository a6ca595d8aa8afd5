use serde::{Deserialize, Serialize};
use std::time::Duration;
use stf_clock::TfDuration;

/// Default retention window per edge.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(10);

/// Tuning of the transform buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// How far back in time each edge keeps its samples, relative to its newest sample.
    pub cache_duration: Duration,

    /// When set, lookups may extrapolate up to this far past the newest sample of an edge.
    /// When unset, any lookup after the newest sample fails.
    pub future_extrapolation: Option<Duration>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            cache_duration: DEFAULT_CACHE_DURATION,
            future_extrapolation: None,
        }
    }
}

impl BufferConfig {
    pub fn with_cache_duration(mut self, cache_duration: Duration) -> Self {
        self.cache_duration = cache_duration;
        self
    }

    pub fn with_future_extrapolation(mut self, limit: Duration) -> Self {
        self.future_extrapolation = Some(limit);
        self
    }

    pub(crate) fn cache_window(&self) -> TfDuration {
        self.cache_duration.into()
    }

    pub(crate) fn future_limit(&self) -> Option<TfDuration> {
        self.future_extrapolation.map(TfDuration::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BufferConfig::default();
        assert_eq!(config.cache_duration, Duration::from_secs(10));
        assert!(config.future_extrapolation.is_none());
    }

    #[test]
    fn test_ron_partial_config() {
        let config: BufferConfig =
            ron::from_str("(future_extrapolation: Some((secs: 0, nanos: 500000000)))").unwrap();
        assert_eq!(config.cache_duration, DEFAULT_CACHE_DURATION);
        assert_eq!(
            config.future_extrapolation,
            Some(Duration::from_millis(500))
        );
    }
}

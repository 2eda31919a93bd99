//! Configuration types.

use crate::error::ConfigError;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks; also the cap on concurrently running jobs.
    pub worker_count: usize,
    /// Capacity of the process event queue.
    pub queue_capacity: usize,
    /// Publishers applied to submitted jobs that name none of their own.
    pub default_publishers: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            default_publishers: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    /// Load from `JOB_RUNNER_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_count: usize = std::env::var("JOB_RUNNER_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.worker_count);

        let queue_capacity: usize = std::env::var("JOB_RUNNER_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.queue_capacity);

        let default_publishers = std::env::var("JOB_RUNNER_PUBLISHERS")
            .map(|s| parse_list(&s))
            .unwrap_or(defaults.default_publishers);

        Self {
            worker_count,
            queue_capacity,
            default_publishers,
        }
    }

    /// Reject values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "worker_count".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DispatcherConfig::default();
        assert_eq!(config.worker_count, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let config = DispatcherConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "worker_count"
        ));
    }

    #[test]
    fn publisher_list_parsing() {
        assert_eq!(
            parse_list(" filesystem, ,s3 "),
            vec!["filesystem".to_string(), "s3".to_string()]
        );
        assert!(parse_list("").is_empty());
    }
}

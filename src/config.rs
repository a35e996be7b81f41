//! Engine configuration.
//!
//! Configuration is passed explicitly to the pieces that need it; nothing
//! here is read from ambient or thread-local state.

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_NO_LISTENER_MESSAGE: &str = "No more listener.";
pub const DEFAULT_EXPIRY_MESSAGE: &str = "Wait expired.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Name of the thread servicing bounded waits.
    pub timer_thread_name: String,
    /// Prefix for threads created by [`ThreadFactory`](crate::runner::ThreadFactory).
    pub worker_thread_prefix: String,
    pub worker_stack_size: Option<usize>,
    /// Message carried by the cancellation when the last subscriber leaves.
    pub no_listener_message: String,
    /// Message carried by the cancellation when a wait expires without default.
    pub expiry_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timer_thread_name: "promise-timer".into(),
            worker_thread_prefix: "promise-worker".into(),
            worker_stack_size: None,
            no_listener_message: DEFAULT_NO_LISTENER_MESSAGE.into(),
            expiry_message: DEFAULT_EXPIRY_MESSAGE.into(),
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// ```
    /// use promise_out::EngineConfig;
    /// let config = EngineConfig::from_toml_str("worker_thread_prefix = \"io\"").unwrap();
    /// assert_eq!(config.worker_thread_prefix, "io");
    /// assert_eq!(config.timer_thread_name, "promise-timer");
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "timer_thread_name",
                reason: "must not be empty".into(),
            });
        }
        if self.worker_thread_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "worker_thread_prefix",
                reason: "must not be empty".into(),
            });
        }
        if self.worker_stack_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "worker_stack_size",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_toml_str(
            r#"
            timer_thread_name = "deadlines"
            worker_stack_size = 65536
            no_listener_message = "orphaned"
            "#,
        )
        .unwrap();
        assert_eq!(config.timer_thread_name, "deadlines");
        assert_eq!(config.worker_stack_size, Some(65536));
        assert_eq!(config.no_listener_message, "orphaned");
        assert_eq!(config.expiry_message, DEFAULT_EXPIRY_MESSAGE);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("pool_size = 4"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_stack_is_invalid() {
        assert!(matches!(
            EngineConfig::from_toml_str("worker_stack_size = 0"),
            Err(ConfigError::Invalid {
                field: "worker_stack_size",
                ..
            })
        ));
    }
}

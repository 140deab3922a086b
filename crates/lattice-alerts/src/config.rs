//! Dispatch core configuration.

use crate::alert::category;

/// Upper bound on the configurable queue limit. `2·L` pointer slots are
/// allocated up front, so an absurd limit is rejected instead of silently
/// committing gigabytes.
pub const MAX_QUEUE_LIMIT: usize = 1 << 20;

/// Default queue limit `L`.
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;

/// Configuration for [`AlertHub`](crate::AlertHub).
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Queue size limit `L`: normal-priority alerts cap at `L`, critical
    /// alerts at `2·L`.
    pub queue_size_limit: usize,
    /// Initial category mask; only kinds with an enabled category should be
    /// posted. Defaults to errors only.
    pub category_mask: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_size_limit: DEFAULT_QUEUE_LIMIT,
            category_mask: category::ERROR,
        }
    }
}

impl HubConfig {
    /// Creates a config with the given queue limit and the default mask.
    #[must_use]
    pub fn with_queue_limit(queue_size_limit: usize) -> Self {
        Self {
            queue_size_limit,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::QueueLimit`] if the limit is zero or exceeds
    /// [`MAX_QUEUE_LIMIT`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size_limit == 0 || self.queue_size_limit > MAX_QUEUE_LIMIT {
            return Err(ConfigError::QueueLimit {
                requested: self.queue_size_limit,
            });
        }
        Ok(())
    }
}

/// Errors from [`HubConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Queue limit outside `1..=MAX_QUEUE_LIMIT`.
    #[error("queue size limit {requested} outside 1..={MAX_QUEUE_LIMIT}")]
    QueueLimit {
        /// The rejected limit.
        requested: usize,
    },
}

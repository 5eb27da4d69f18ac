// Configuration types for worker pools

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Force every unit into fallback mode even when the backend reports
    /// isolation support. Useful for debugging the fallback path.
    pub force_fallback: bool,

    /// Buffer depth of each unit's completion feed (`subscribe`). Slow
    /// subscribers lag past this many completions.
    pub completion_feed_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            force_fallback: false,
            completion_feed_capacity: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_config() {
        let config = PoolConfig::default();
        assert!(!config.force_fallback);
        assert_eq!(config.completion_feed_capacity, 16);
    }
}

//! Configuration for the command router.

/// Configuration for the redirecting writer.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of redirects one command may follow over its lifetime.
    ///
    /// The budget is per command, not per batch: each command redirected out
    /// of a batch carries its own counter. When the budget runs out the
    /// command fails with a redirect-exhaustion error instead of resolving
    /// another connection.
    pub max_redirects: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { max_redirects: 5 }
    }
}

impl RouterConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-command redirect budget.
    pub fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_config_builder() {
        let config = RouterConfig::new().with_max_redirects(2);
        assert_eq!(config.max_redirects, 2);
    }
}

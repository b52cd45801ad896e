//! Serializer configuration

use serde::{Deserialize, Serialize};

/// Serializer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeConfig {
    /// Hard upper bound on the serialized buffer (default: 2GB)
    pub size_limit: usize,
    /// Initial buffer capacity (default: 4KB)
    pub initial_capacity: usize,
}

impl Default for SerializeConfig {
    fn default() -> Self {
        Self {
            size_limit: 2 * 1024 * 1024 * 1024,  // 2GB
            initial_capacity: 4 * 1024,          // 4KB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: SerializeConfig = serde_json::from_str(r#"{ "size_limit": 1024 }"#).unwrap();
        assert_eq!(config.size_limit, 1024);
        assert_eq!(config.initial_capacity, SerializeConfig::default().initial_capacity);
    }
}

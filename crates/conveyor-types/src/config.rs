//! Global configuration types for Conveyor.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! worker pool size and the control-plane listen address.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Conveyor engine.
///
/// Loaded from `{data_dir}/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Number of workers in the run execution pool. Each actively running
    /// run occupies exactly one worker; paused runs hold none.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Address the control-plane HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_worker_count() -> usize {
    4
}

fn default_listen_addr() -> String {
    "127.0.0.1:7430".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            listen_addr: default_listen_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.listen_addr, "127.0.0.1:7430");
    }

    #[test]
    fn deserialize_empty_toml_uses_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.listen_addr, "127.0.0.1:7430");
    }

    #[test]
    fn deserialize_with_values() {
        let config: GlobalConfig = toml::from_str(
            r#"
worker_count = 16
listen_addr = "0.0.0.0:8080"
"#,
        )
        .unwrap();
        assert_eq!(config.worker_count, 16);
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }
}

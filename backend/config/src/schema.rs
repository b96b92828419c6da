//! Typed configuration schema for the Persona backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Default tracing level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rolling NDJSON log files.
    pub log_dir: String,
    pub gateway: GatewayConfig,
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// SQLite file backing the plugin registry.
    pub registry_path: String,
    /// Upper bound on any single plugin-supplied call (`on_load`,
    /// `on_unload`); a timeout is treated like a load/unload error and
    /// triggers the rollback path.
    pub hook_timeout_secs: u64,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            gateway: GatewayConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7700,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            registry_path: "plugins.db".to_string(),
            hook_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: PersonaConfig = serde_yaml::from_str("gateway:\n  port: 9000\n").unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.plugins.hook_timeout_secs, 30);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = PersonaConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: PersonaConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.plugins.registry_path, config.plugins.registry_path);
    }
}

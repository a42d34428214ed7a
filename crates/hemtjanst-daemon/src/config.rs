//! Configuration loading and validation

use anyhow::{Context, Result};
use hemtjanst_homekit::AccessoryInfo;
use hemtjanst_registry::RouterConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Announcements published onto the bus at startup
    #[serde(default, rename = "seed", skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<SeedConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Prefix devices announce their metadata under
    #[serde(default = "default_announce")]
    pub announce: String,
    /// Topic carrying leave tokens
    #[serde(default = "default_leave")]
    pub leave: String,
    /// Topic published once to request re-announcement
    #[serde(default = "default_discover")]
    pub discover: String,
    /// Delay before the discover signal in milliseconds
    #[serde(default)]
    pub discover_delay_ms: u64,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            announce: default_announce(),
            leave: default_leave(),
            discover: default_discover(),
            discover_delay_ms: 0,
        }
    }
}

fn default_announce() -> String {
    "announce".to_string()
}

fn default_leave() -> String {
    "leave".to_string()
}

fn default_discover() -> String {
    "discover".to_string()
}

/// Identity of the bridge accessory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_name")]
    pub name: String,
    #[serde(default = "default_bridge_name")]
    pub manufacturer: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_serial")]
    pub serial_number: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            manufacturer: default_bridge_name(),
            model: default_model(),
            serial_number: default_serial(),
        }
    }
}

fn default_bridge_name() -> String {
    "hemtjanst".to_string()
}

fn default_model() -> String {
    "v0".to_string()
}

fn default_serial() -> String {
    "000-000".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Device topic, without the announce prefix
    pub topic: String,
    /// Device metadata as JSON; empty deletes
    #[serde(default)]
    pub metadata: String,
}

impl Config {
    /// Convert to RouterConfig
    pub fn to_router_config(&self) -> RouterConfig {
        RouterConfig {
            announce: self.topics.announce.clone(),
            leave: self.topics.leave.clone(),
            discover: self.topics.discover.clone(),
            discover_delay: Duration::from_millis(self.topics.discover_delay_ms),
        }
    }

    pub fn bridge_info(&self) -> AccessoryInfo {
        AccessoryInfo {
            name: self.bridge.name.clone(),
            manufacturer: self.bridge.manufacturer.clone(),
            model: self.bridge.model.clone(),
            serial_number: self.bridge.serial_number.clone(),
        }
    }

    /// Full announce topic for a seed
    pub fn announce_topic(&self, seed: &SeedConfig) -> String {
        format!("{}/{}", self.topics.announce, seed.topic)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), seeds = config.seeds.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        seeds: vec![SeedConfig {
            topic: "lightbulb/kitchen".to_string(),
            metadata: r#"{"name":"Kitchen Light","type":"lightbulb","feature":{"on":{}}}"#
                .to_string(),
        }],
        ..Default::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.to_router_config(), RouterConfig::default());
        assert_eq!(config.bridge.serial_number, "000-000");
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hemtjanst.toml");
        std::fs::write(
            &path,
            r#"
[topics]
leave = "gone"
discover_delay_ms = 250

[bridge]
name = "Home"

[[seed]]
topic = "sensor/door"
metadata = '{"type":"contactsensor","feature":{"contactSensorState":{}}}'
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let router = config.to_router_config();
        assert_eq!(router.announce, "announce");
        assert_eq!(router.leave, "gone");
        assert_eq!(router.discover_delay, Duration::from_millis(250));
        assert_eq!(config.bridge_info().name, "Home");
        assert_eq!(config.bridge_info().model, "v0");
        assert_eq!(config.seeds.len(), 1);
        assert_eq!(config.announce_topic(&config.seeds[0]), "announce/sensor/door");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hemtjanst.toml");
        std::fs::write(&path, "[topics\nannounce = 1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_default_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hemtjanst.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.topics, TopicsConfig::default());
        assert_eq!(config.seeds[0].topic, "lightbulb/kitchen");
    }
}

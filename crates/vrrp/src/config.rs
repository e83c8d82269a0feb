//! Router configuration loading and validation.

use crate::error::Result;
use crate::network::Network;
use crate::router::VirtualRouter;
use crate::types::{AddressFamily, DEFAULT_PRIORITY, Flags, OWNER_PRIORITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub routers: Vec<RouterConfig>,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// "text" (default) or "json"
    pub format: Option<String>,
}

/// One virtual router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub vrid: u8,

    #[serde(default = "default_priority")]
    pub priority: u8,

    pub interface: String,

    /// Virtual addresses. An owner with none takes the interface's own.
    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default = "default_true")]
    pub preempt: bool,

    #[serde(default = "default_true")]
    pub accept: bool,

    #[serde(default = "default_true")]
    pub unicast: bool,

    #[serde(default)]
    pub ipv6: bool,

    #[serde(default = "default_advert_interval_ms")]
    pub advert_interval_ms: u64,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_true() -> bool {
    true
}

fn default_advert_interval_ms() -> u64 {
    1000
}

impl RouterConfig {
    pub fn validate(&self) -> common::Result<()> {
        if self.vrid == 0 {
            return Err(common::Error::config("vrid must be between 1 and 255"));
        }
        if self.priority == 0 {
            return Err(common::Error::config(format!(
                "router {}: priority must be between 1 and 255",
                self.vrid
            )));
        }
        if self.interface.is_empty() {
            return Err(common::Error::config(format!(
                "router {}: interface must be set",
                self.vrid
            )));
        }
        if self.addresses.is_empty() && self.priority != OWNER_PRIORITY {
            return Err(common::Error::config(format!(
                "router {}: at least one address is required",
                self.vrid
            )));
        }
        Ok(())
    }

    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::PREEMPT, self.preempt);
        flags.set(Flags::ACCEPT, self.accept);
        flags.set(Flags::UNICAST, self.unicast);
        flags.set(Flags::IPV6, self.ipv6);
        flags
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::from_flags(self.flags())
    }

    pub fn advert_interval(&self) -> Duration {
        Duration::from_millis(self.advert_interval_ms)
    }

    /// Construct the router described by this entry.
    pub async fn build(&self, network: Arc<dyn Network>) -> Result<Arc<VirtualRouter>> {
        let router = if self.addresses.is_empty() && self.priority == OWNER_PRIORITY {
            VirtualRouter::new_owner(self.vrid, &self.interface, self.family(), network)?
        } else {
            VirtualRouter::new(
                self.vrid,
                self.priority,
                self.flags(),
                &self.interface,
                &self.addresses,
                network,
            )?
        };
        router.set_advert_interval(self.advert_interval()).await;
        Ok(router)
    }
}

impl Config {
    pub fn from_json(json: &str) -> common::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> common::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> common::Result<()> {
        for router in &self.routers {
            router.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use crate::types::VRRPState;
    use std::io::Write;
    use std::net::IpAddr;

    const JSON: &str = r#"{
        "logging": { "format": "json" },
        "routers": [
            { "vrid": 1, "interface": "eth0", "addresses": ["10.0.0.100"] },
            {
                "vrid": 2, "priority": 200, "interface": "eth0",
                "addresses": ["2001:db8::100"], "ipv6": true, "preempt": false,
                "advert_interval_ms": 50
            },
            { "vrid": 3, "priority": 255, "interface": "eth0" }
        ]
    }"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_json(JSON).unwrap();
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.routers.len(), 3);

        let first = &config.routers[0];
        assert_eq!(first.priority, 100);
        assert_eq!(first.flags(), Flags::default());
        assert_eq!(first.advert_interval(), Duration::from_secs(1));

        let second = &config.routers[1];
        assert_eq!(second.family(), AddressFamily::V6);
        assert!(!second.flags().contains(Flags::PREEMPT));
        assert!(second.flags().contains(Flags::ACCEPT | Flags::IPV6));
    }

    #[test]
    fn test_validation() {
        let bad = [
            r#"{"routers": [{"vrid": 0, "interface": "eth0", "addresses": ["10.0.0.1"]}]}"#,
            r#"{"routers": [{"vrid": 1, "priority": 0, "interface": "eth0", "addresses": ["10.0.0.1"]}]}"#,
            r#"{"routers": [{"vrid": 1, "interface": "", "addresses": ["10.0.0.1"]}]}"#,
            r#"{"routers": [{"vrid": 1, "interface": "eth0"}]}"#,
        ];
        for json in bad {
            assert!(
                matches!(Config::from_json(json), Err(common::Error::Config(_))),
                "accepted {json}"
            );
        }

        assert!(matches!(
            Config::from_json(r#"{"routers": [{"vrid": 300}]}"#),
            Err(common::Error::Serialization(_))
        ));
        assert!(Config::from_json("{}").unwrap().routers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("vrrp-config-{}.json", std::process::id()));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(JSON.as_bytes())
            .unwrap();
        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.routers.len(), 3);

        assert!(matches!(
            Config::load("/nonexistent/vrrp.json"),
            Err(common::Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_build_routers() {
        let net = MemoryNetwork::new();
        net.add_interface(
            "eth0",
            &["10.0.0.5".parse().unwrap(), "2001:db8::5".parse().unwrap()],
        );
        let config = Config::from_json(JSON).unwrap();

        let first = config.routers[0].build(net.clone()).await.unwrap();
        assert_eq!(first.priority(), 100);
        assert_eq!(first.state().await, VRRPState::Init);

        let second = config.routers[1].build(net.clone()).await.unwrap();
        assert_eq!(second.family(), AddressFamily::V6);
        // Raised to the 100 ms floor.
        assert_eq!(second.advert_interval().await, Duration::from_millis(100));

        let owner = config.routers[2].build(net.clone()).await.unwrap();
        assert!(owner.is_owner());
        assert_eq!(owner.addresses().await, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);
    }
}

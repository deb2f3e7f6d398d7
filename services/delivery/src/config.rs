use anyhow::{Context, Result};
use herald_registry::HubConfig;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

// Delivery node configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // How often the evictor sweeps idle cells.
    pub eviction_interval_ms: u64,
    // Quiet period before a session-less cell is reclaimed.
    pub idle_timeout_ms: u64,
    // Mailbox capacity per cell and buffer capacity per session.
    pub mailbox_size: usize,
    // Bounded identity cache size for the peer enricher.
    pub enricher_cache_capacity: usize,
    // Per-session send budget inside the cell loop.
    pub send_timeout_ms: u64,
    // Outbound publish budget on the bus path.
    pub publish_timeout_ms: u64,
}

const DEFAULT_CONFIG_PATH: &str = "/usr/local/herald/delivery.yml";
const DEFAULT_EVICTION_INTERVAL_MS: u64 = 60_000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_MAILBOX_SIZE: usize = 1024;
const DEFAULT_ENRICHER_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 250;
const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize)]
struct DeliveryConfigOverride {
    metrics_bind: Option<String>,
    eviction_interval_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
    mailbox_size: Option<usize>,
    enricher_cache_capacity: Option<usize>,
    send_timeout_ms: Option<u64>,
    publish_timeout_ms: Option<u64>,
}

impl DeliveryConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let metrics_bind = std::env::var("HERALD_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse HERALD_METRICS_BIND")?;
        let eviction_interval_ms = std::env::var("HERALD_EVICTION_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_EVICTION_INTERVAL_MS);
        let idle_timeout_ms = std::env::var("HERALD_IDLE_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);
        let mailbox_size = std::env::var("HERALD_MAILBOX_SIZE")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAILBOX_SIZE);
        let enricher_cache_capacity = std::env::var("HERALD_ENRICHER_CACHE_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ENRICHER_CACHE_CAPACITY);
        let send_timeout_ms = std::env::var("HERALD_SEND_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_SEND_TIMEOUT_MS);
        let publish_timeout_ms = std::env::var("HERALD_PUBLISH_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_PUBLISH_TIMEOUT_MS);
        Ok(Self {
            metrics_bind,
            eviction_interval_ms,
            idle_timeout_ms,
            mailbox_size,
            enricher_cache_capacity,
            send_timeout_ms,
            publish_timeout_ms,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = std::env::var("HERALD_DELIVERY_CONFIG").ok();
        let config_path = override_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let contents = match fs::read_to_string(&config_path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == ErrorKind::NotFound && override_path.is_none() => None,
            Err(err) => {
                return Err(err).with_context(|| format!("read delivery config: {config_path}"));
            }
        };
        if let Some(contents) = contents {
            // YAML overrides allow ops-friendly config files.
            let override_cfg: DeliveryConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse delivery config yaml")?;
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.eviction_interval_ms.filter(|value| *value > 0) {
                config.eviction_interval_ms = value;
            }
            if let Some(value) = override_cfg.idle_timeout_ms.filter(|value| *value > 0) {
                config.idle_timeout_ms = value;
            }
            if let Some(value) = override_cfg.mailbox_size.filter(|value| *value > 0) {
                config.mailbox_size = value;
            }
            if let Some(value) = override_cfg
                .enricher_cache_capacity
                .filter(|value| *value > 0)
            {
                config.enricher_cache_capacity = value;
            }
            if let Some(value) = override_cfg.send_timeout_ms.filter(|value| *value > 0) {
                config.send_timeout_ms = value;
            }
            if let Some(value) = override_cfg.publish_timeout_ms.filter(|value| *value > 0) {
                config.publish_timeout_ms = value;
            }
        }
        Ok(config)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            eviction_interval: Duration::from_millis(self.eviction_interval_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            mailbox_size: self.mailbox_size,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: &[&str] = &[
        "HERALD_METRICS_BIND",
        "HERALD_EVICTION_INTERVAL_MS",
        "HERALD_IDLE_TIMEOUT_MS",
        "HERALD_MAILBOX_SIZE",
        "HERALD_ENRICHER_CACHE_CAPACITY",
        "HERALD_SEND_TIMEOUT_MS",
        "HERALD_PUBLISH_TIMEOUT_MS",
        "HERALD_DELIVERY_CONFIG",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_without_environment() {
        clear_env();
        let config = DeliveryConfig::from_env().expect("config");
        assert_eq!(config.eviction_interval_ms, 60_000);
        assert_eq!(config.idle_timeout_ms, 600_000);
        assert_eq!(config.mailbox_size, 1024);
        assert_eq!(config.enricher_cache_capacity, 10_000);
        assert_eq!(config.send_timeout_ms, 250);
        assert_eq!(config.publish_timeout_ms, 2_000);
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear_env();
        std::env::set_var("HERALD_MAILBOX_SIZE", "64");
        std::env::set_var("HERALD_IDLE_TIMEOUT_MS", "1000");
        let config = DeliveryConfig::from_env().expect("config");
        assert_eq!(config.mailbox_size, 64);
        assert_eq!(config.idle_timeout_ms, 1000);
        clear_env();
    }

    #[test]
    #[serial]
    fn zero_values_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("HERALD_MAILBOX_SIZE", "0");
        let config = DeliveryConfig::from_env().expect("config");
        assert_eq!(config.mailbox_size, 1024);
        clear_env();
    }

    #[test]
    #[serial]
    fn missing_override_file_is_an_error() {
        clear_env();
        std::env::set_var("HERALD_DELIVERY_CONFIG", "/definitely/not/here.yml");
        assert!(DeliveryConfig::from_env_or_yaml().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn hub_config_mirrors_millisecond_fields() {
        clear_env();
        let config = DeliveryConfig::from_env().expect("config");
        let hub = config.hub_config();
        assert_eq!(hub.eviction_interval, Duration::from_secs(60));
        assert_eq!(hub.idle_timeout, Duration::from_secs(600));
        assert_eq!(hub.mailbox_size, 1024);
        assert_eq!(hub.send_timeout, Duration::from_millis(250));
    }
}

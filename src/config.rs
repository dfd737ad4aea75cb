//! Data-plane configuration.
//!
//! Resolved once at startup (§6 defaults below) and handed to the
//! orchestrator as an immutable value; nothing in the hot path re-reads it.

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::UpfError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub control_port: u16,
    pub tunnel_port: u16,
    pub external_ip: Ipv4Addr,
    pub ue_pool: (Ipv4Addr, Ipv4Addr),
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub nat_table_size: usize,
    pub nat_idle_timeout_secs: u64,
    pub external_port_min: u16,
    pub external_port_max: u16,
    pub session_table_size: usize,
}

impl Config {
    pub fn nat_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.nat_idle_timeout_secs)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, UpfError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| UpfError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml_ng::from_str(&contents).map_err(|source| UpfError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), UpfError> {
        if self.worker_count == 0 {
            return Err(UpfError::InvalidConfig("worker_count must be >= 1".into()));
        }
        if self.external_port_min >= self.external_port_max {
            return Err(UpfError::InvalidConfig(
                "external_port_min must be < external_port_max".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(UpfError::InvalidConfig("queue_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            control_port: 8805,
            tunnel_port: 2152,
            external_ip: Ipv4Addr::new(10, 45, 0, 1),
            ue_pool: (Ipv4Addr::new(10, 60, 0, 0), Ipv4Addr::new(10, 60, 255, 255)),
            worker_count: 4,
            queue_capacity: 1000,
            nat_table_size: 4096,
            nat_idle_timeout_secs: 120,
            external_port_min: 10_000,
            external_port_max: 60_000,
            session_table_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = Config::default();
        cfg.worker_count = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut cfg = Config::default();
        cfg.external_port_min = 50_000;
        cfg.external_port_max = 40_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_partial_yaml_over_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rs-upf-test-config-{:?}.yaml", std::thread::current().id()));
        std::fs::write(&path, "worker_count: 8\ncontrol_port: 9000\n").unwrap();
        let cfg = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.control_port, 9000);
        assert_eq!(cfg.tunnel_port, 2152);
    }
}

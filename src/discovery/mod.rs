//! Target directory strategies.
//!
//! A strategy answers "which peers exist right now" by querying one
//! external source and returning a host → port map:
//!
//! - [`StaticDirectory`]: a JSON map embedded in configuration
//! - [`ObjectStorageDirectory`]: a JSON map stored as one object in a bucket
//! - [`ServiceRegistryDirectory`]: instances registered under a service id
//! - [`TargetGroupDirectory`]: targets reported by a load-balancer health query
//!
//! Exactly one strategy is active per process. [`build_strategy`] picks it
//! from configuration; a strategy that cannot be constructed is replaced by
//! an [`UnavailableDirectory`] so the broker keeps running with no peers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::config::Config;
use crate::error::DirectoryError;

mod http;
mod object_storage;
mod service_registry;
mod r#static;
mod target_group;

pub use http::HttpBackend;
pub use object_storage::{HttpObjectStore, ObjectStorageDirectory, ObjectStore};
pub use r#static::StaticDirectory;
pub use service_registry::{
    HttpServiceRegistry, RegistryInstance, ServiceRegistry, ServiceRegistryDirectory,
    INSTANCE_IPV4_ATTRIBUTE, INSTANCE_PORT_ATTRIBUTE,
};
pub use target_group::{
    HttpTargetHealth, TargetDescription, TargetGroupDirectory, TargetHealthSource,
};

/// Peer host (or instance id) → port.
pub type TargetEndpoints = HashMap<String, u16>;

/// Default refresh interval for registry-backed strategies.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;

/// A source of cluster membership.
#[async_trait]
pub trait DirectoryStrategy: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    fn is_ready(&self) -> bool;

    fn supports_periodic_refresh(&self) -> bool;

    fn refresh_interval_millis(&self) -> u64;

    /// Queries the backend, surfacing failures.
    async fn query(&self) -> Result<TargetEndpoints, DirectoryError>;

    /// Queries the backend; any failure is logged and yields an empty map.
    async fn fetch(&self) -> TargetEndpoints {
        match self.query().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(
                    "The {} directory failed to query target endpoints with error {}",
                    self.name(),
                    e
                );
                TargetEndpoints::new()
            }
        }
    }
}

/// Which strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    Static,
    ObjectStorage,
    ServiceRegistry,
    LoadBalancerTargetGroup,
}

impl fmt::Display for DirectoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DirectoryKind::Static => "static",
            DirectoryKind::ObjectStorage => "object-storage",
            DirectoryKind::ServiceRegistry => "service-registry",
            DirectoryKind::LoadBalancerTargetGroup => "load-balancer-target-group",
        })
    }
}

impl FromStr for DirectoryKind {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(DirectoryKind::Static),
            "s3" | "object-storage" => Ok(DirectoryKind::ObjectStorage),
            "sd" | "service-registry" => Ok(DirectoryKind::ServiceRegistry),
            "tg" | "load-balancer-target-group" => Ok(DirectoryKind::LoadBalancerTargetGroup),
            other => Err(DirectoryError::Backend(format!(
                "targets datasource {:?} is not supported",
                other
            ))),
        }
    }
}

/// Builds the configured strategy.
///
/// Construction failures are logged and produce an [`UnavailableDirectory`].
pub fn build_strategy(config: &Config) -> Arc<dyn DirectoryStrategy> {
    match try_build_strategy(config) {
        Ok(strategy) => {
            info!("The {} directory was initialized.", strategy.name());
            strategy
        }
        Err(e) => {
            error!(
                "Initializing the directory for targets datasource {:?} failed with error: {}",
                config.targets_datasource, e
            );
            Arc::new(UnavailableDirectory::new(e.to_string()))
        }
    }
}

fn try_build_strategy(config: &Config) -> Result<Arc<dyn DirectoryStrategy>, DirectoryError> {
    let kind: DirectoryKind = config.targets_datasource.parse()?;
    let strategy: Arc<dyn DirectoryStrategy> = match kind {
        DirectoryKind::Static => Arc::new(StaticDirectory::new(&config.static_config)?),
        DirectoryKind::ObjectStorage => Arc::new(ObjectStorageDirectory::from_config(config)?),
        DirectoryKind::ServiceRegistry => Arc::new(ServiceRegistryDirectory::from_config(config)?),
        DirectoryKind::LoadBalancerTargetGroup => {
            Arc::new(TargetGroupDirectory::from_config(config)?)
        }
    };
    Ok(strategy)
}

/// Stand-in for a strategy whose construction failed. Never ready, never
/// refreshes, always empty.
#[derive(Debug, Clone)]
pub struct UnavailableDirectory {
    reason: String,
}

impl UnavailableDirectory {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DirectoryStrategy for UnavailableDirectory {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn supports_periodic_refresh(&self) -> bool {
        false
    }

    fn refresh_interval_millis(&self) -> u64 {
        0
    }

    async fn query(&self) -> Result<TargetEndpoints, DirectoryError> {
        debug!("The directory is unavailable: {}", self.reason);
        Err(DirectoryError::NotReady)
    }
}

/// Parses `{"host": "port", "host": port, ...}`.
///
/// Ports may be strings or integers. Entries with an unusable port are
/// skipped; anything other than a JSON object is malformed.
pub fn parse_endpoint_map(raw: &[u8]) -> Result<TargetEndpoints, DirectoryError> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(entries) = value else {
        return Err(DirectoryError::Malformed(
            "expected a JSON object of host to port".into(),
        ));
    };

    let mut targets = TargetEndpoints::with_capacity(entries.len());
    for (host, port) in entries {
        match parse_port(&port) {
            Some(port) => {
                targets.insert(host, port);
            }
            None => warn!("Skipping target {} with invalid port {}", host, port),
        }
    }
    Ok(targets)
}

pub(crate) fn parse_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_and_numeric_ports() {
        let targets = parse_endpoint_map(br#"{"10.0.0.5":"8080","10.0.0.6":9090}"#).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets["10.0.0.5"], 8080);
        assert_eq!(targets["10.0.0.6"], 9090);
    }

    #[test]
    fn skips_invalid_ports() {
        let targets =
            parse_endpoint_map(br#"{"a":"http","b":70000,"c":null,"d":"443"}"#).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets["d"], 443);
    }

    #[test]
    fn rejects_non_object_maps() {
        assert!(matches!(
            parse_endpoint_map(br#"["10.0.0.5"]"#),
            Err(DirectoryError::Malformed(_))
        ));
        assert!(parse_endpoint_map(b"").is_err());
    }

    #[test]
    fn datasource_aliases() {
        assert_eq!("s3".parse::<DirectoryKind>().unwrap(), DirectoryKind::ObjectStorage);
        assert_eq!(
            "service-registry".parse::<DirectoryKind>().unwrap(),
            DirectoryKind::ServiceRegistry
        );
        assert_eq!(
            "TG".parse::<DirectoryKind>().unwrap(),
            DirectoryKind::LoadBalancerTargetGroup
        );
        assert!("consul".parse::<DirectoryKind>().is_err());
    }

    #[tokio::test]
    async fn unavailable_directory_fetches_nothing() {
        let dir = UnavailableDirectory::new("no credentials");
        assert_eq!(dir.reason, "no credentials");
        assert!(!dir.is_ready());
        assert!(!dir.supports_periodic_refresh());
        assert!(dir.fetch().await.is_empty());
    }

    #[tokio::test]
    async fn unsupported_datasource_degrades() {
        let config = Config {
            targets_datasource: "consul".into(),
            ..Config::default()
        };
        let strategy = build_strategy(&config);
        assert!(!strategy.is_ready());
        assert_eq!(strategy.name(), "unavailable");
    }

    #[tokio::test]
    async fn default_config_builds_empty_static_directory() {
        let strategy = build_strategy(&Config::default());
        assert!(strategy.is_ready());
        assert_eq!(strategy.name(), "static");
        assert!(strategy.fetch().await.is_empty());
    }
}

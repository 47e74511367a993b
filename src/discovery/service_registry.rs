//! Targets from a service registry listing.
//!
//! Each registered instance advertises its address and port as attributes.
//! Instances missing either attribute are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use super::{DirectoryStrategy, HttpBackend, TargetEndpoints, DEFAULT_REFRESH_INTERVAL_MS};
use crate::config::Config;
use crate::error::DirectoryError;

pub const INSTANCE_IPV4_ATTRIBUTE: &str = "AWS_INSTANCE_IPV4";
pub const INSTANCE_PORT_ATTRIBUTE: &str = "AWS_INSTANCE_PORT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryInstance {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Lists the instances registered under one service.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn list_instances(&self, service_id: &str)
        -> Result<Vec<RegistryInstance>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListInstancesResponse {
    #[serde(default)]
    instances: Vec<RegistryInstance>,
}

/// `GET {endpoint}/instances?ServiceId={id}` answering with
/// `{"Instances": [{"Id": .., "Attributes": {..}}]}`.
#[derive(Debug, Clone)]
pub struct HttpServiceRegistry {
    backend: HttpBackend,
}

impl HttpServiceRegistry {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        Ok(Self {
            backend: HttpBackend::new(endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl ServiceRegistry for HttpServiceRegistry {
    async fn list_instances(
        &self,
        service_id: &str,
    ) -> Result<Vec<RegistryInstance>, DirectoryError> {
        let mut url = self.backend.url(&["instances"]);
        url.query_pairs_mut().append_pair("ServiceId", service_id);
        let response: ListInstancesResponse = self.backend.get_json(url).await?;
        Ok(response.instances)
    }
}

pub struct ServiceRegistryDirectory {
    registry: Arc<dyn ServiceRegistry>,
    service_id: String,
    refresh_interval_ms: u64,
}

impl ServiceRegistryDirectory {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        service_id: impl Into<String>,
        refresh_interval_ms: u64,
    ) -> Self {
        Self {
            registry,
            service_id: service_id.into(),
            refresh_interval_ms,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, DirectoryError> {
        let endpoint = config.sd_endpoint.as_deref().ok_or_else(|| {
            DirectoryError::Backend("no service registry endpoint configured".into())
        })?;
        let registry = HttpServiceRegistry::new(endpoint, config.backend_timeout())?;
        let interval = match config.sd_periodic_update_delay {
            0 => DEFAULT_REFRESH_INTERVAL_MS,
            ms => ms,
        };
        Ok(Self::new(
            Arc::new(registry),
            config.sd_service_id.clone(),
            interval,
        ))
    }
}

/// Keeps instances that advertise both an address and a usable port.
pub(crate) fn endpoints_from_instances(instances: Vec<RegistryInstance>) -> TargetEndpoints {
    instances
        .into_iter()
        .filter_map(|instance| {
            let ip = instance.attributes.get(INSTANCE_IPV4_ATTRIBUTE);
            let port = instance
                .attributes
                .get(INSTANCE_PORT_ATTRIBUTE)
                .and_then(|p| p.trim().parse::<u16>().ok());
            match (ip, port) {
                (Some(ip), Some(port)) if !ip.is_empty() => Some((ip.clone(), port)),
                _ => {
                    debug!(
                        "Skipping registry instance {} without address or port",
                        instance.id
                    );
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl DirectoryStrategy for ServiceRegistryDirectory {
    fn name(&self) -> &'static str {
        "service-registry"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn supports_periodic_refresh(&self) -> bool {
        true
    }

    fn refresh_interval_millis(&self) -> u64 {
        self.refresh_interval_ms
    }

    async fn query(&self) -> Result<TargetEndpoints, DirectoryError> {
        let instances = self.registry.list_instances(&self.service_id).await?;
        Ok(endpoints_from_instances(instances))
    }
}

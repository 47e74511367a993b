//! Targets from a load-balancer target group health query.
//!
//! Every reported target is kept, whatever its health state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use super::{DirectoryStrategy, HttpBackend, TargetEndpoints, DEFAULT_REFRESH_INTERVAL_MS};
use crate::config::Config;
use crate::error::DirectoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescription {
    pub id: String,
    pub port: u16,
    pub state: Option<String>,
}

/// Reports the targets registered in one target group.
#[async_trait]
pub trait TargetHealthSource: Send + Sync {
    async fn describe_target_health(
        &self,
        target_group: &str,
    ) -> Result<Vec<TargetDescription>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTargetHealthResponse {
    #[serde(default)]
    target_health_descriptions: Vec<TargetHealthDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealthDescription {
    target: Target,
    #[serde(default)]
    target_health: Option<TargetHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Target {
    id: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealth {
    #[serde(default)]
    state: Option<String>,
}

/// `GET {endpoint}/target-health?TargetGroupArn={arn}` answering with
/// `{"TargetHealthDescriptions": [{"Target": {"Id": .., "Port": ..}, ..}]}`.
#[derive(Debug, Clone)]
pub struct HttpTargetHealth {
    backend: HttpBackend,
}

impl HttpTargetHealth {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        Ok(Self {
            backend: HttpBackend::new(endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl TargetHealthSource for HttpTargetHealth {
    async fn describe_target_health(
        &self,
        target_group: &str,
    ) -> Result<Vec<TargetDescription>, DirectoryError> {
        let mut url = self.backend.url(&["target-health"]);
        url.query_pairs_mut()
            .append_pair("TargetGroupArn", target_group);
        let response: DescribeTargetHealthResponse = self.backend.get_json(url).await?;
        Ok(response
            .target_health_descriptions
            .into_iter()
            .map(|d| TargetDescription {
                id: d.target.id,
                port: d.target.port,
                state: d.target_health.and_then(|h| h.state),
            })
            .collect())
    }
}

pub struct TargetGroupDirectory {
    source: Arc<dyn TargetHealthSource>,
    target_group: String,
    refresh_interval_ms: u64,
}

impl TargetGroupDirectory {
    pub fn new(
        source: Arc<dyn TargetHealthSource>,
        target_group: impl Into<String>,
        refresh_interval_ms: u64,
    ) -> Self {
        Self {
            source,
            target_group: target_group.into(),
            refresh_interval_ms,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, DirectoryError> {
        let target_group = config
            .tg_target_group_arn
            .clone()
            .filter(|arn| !arn.is_empty())
            .ok_or_else(|| DirectoryError::Backend("no target group configured".into()))?;
        let endpoint = config.tg_endpoint.as_deref().ok_or_else(|| {
            DirectoryError::Backend("no target health endpoint configured".into())
        })?;
        let source = HttpTargetHealth::new(endpoint, config.backend_timeout())?;
        let interval = match config.tg_periodic_update_delay {
            0 => DEFAULT_REFRESH_INTERVAL_MS,
            ms => ms,
        };
        Ok(Self::new(Arc::new(source), target_group, interval))
    }
}

#[async_trait]
impl DirectoryStrategy for TargetGroupDirectory {
    fn name(&self) -> &'static str {
        "load-balancer-target-group"
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
        let targets = self
            .source
            .describe_target_health(&self.target_group)
            .await?;
        Ok(targets
            .into_iter()
            .map(|t| {
                debug!(
                    "Keeping target {}:{} in health state {}",
                    t.id,
                    t.port,
                    t.state.as_deref().unwrap_or("unknown")
                );
                (t.id, t.port)
            })
            .collect())
    }
}

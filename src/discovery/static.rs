//! Targets from a fixed configuration string.
//!
//! The string is a JSON object such as
//! `{"10.0.0.5": "8080", "10.0.0.6": "8080"}`. It is validated once at
//! construction; every fetch re-parses the same text.

use async_trait::async_trait;

use super::{parse_endpoint_map, DirectoryStrategy, TargetEndpoints};
use crate::error::DirectoryError;

#[derive(Debug, Clone)]
pub struct StaticDirectory {
    raw: String,
}

impl StaticDirectory {
    pub fn new(raw: &str) -> Result<Self, DirectoryError> {
        parse_endpoint_map(raw.as_bytes())?;
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    /// Builds the configuration text for `targets`.
    pub fn from_targets<'a>(
        targets: impl IntoIterator<Item = (&'a str, u16)>,
    ) -> Result<Self, DirectoryError> {
        let map: serde_json::Map<String, serde_json::Value> = targets
            .into_iter()
            .map(|(host, port)| (host.to_string(), port.to_string().into()))
            .collect();
        Self::new(&serde_json::Value::Object(map).to_string())
    }
}

#[async_trait]
impl DirectoryStrategy for StaticDirectory {
    fn name(&self) -> &'static str {
        "static"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn supports_periodic_refresh(&self) -> bool {
        false
    }

    fn refresh_interval_millis(&self) -> u64 {
        0
    }

    async fn query(&self) -> Result<TargetEndpoints, DirectoryError> {
        parse_endpoint_map(self.raw.as_bytes())
    }
}

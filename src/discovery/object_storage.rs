//! Targets from one object in an object store.
//!
//! The object holds the same JSON map the static strategy reads. Periodic
//! refresh is off unless configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{parse_endpoint_map, DirectoryStrategy, HttpBackend, TargetEndpoints};
use crate::config::Config;
use crate::error::DirectoryError;

/// Endpoint used when none is configured. Objects are read path-style.
pub const DEFAULT_OBJECT_STORE_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Reads whole objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, DirectoryError>;
}

/// Path-style `GET {endpoint}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    backend: HttpBackend,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        Ok(Self {
            backend: HttpBackend::new(endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, DirectoryError> {
        let mut segments = vec![bucket];
        segments.extend(key.split('/').filter(|s| !s.is_empty()));
        self.backend.get_bytes(self.backend.url(&segments)).await
    }
}

pub struct ObjectStorageDirectory {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    object: String,
    refresh_interval_ms: Option<u64>,
}

impl ObjectStorageDirectory {
    /// `refresh_interval_ms` of `None` disables periodic refresh.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        object: impl Into<String>,
        refresh_interval_ms: Option<u64>,
    ) -> Result<Self, DirectoryError> {
        if refresh_interval_ms == Some(0) {
            return Err(DirectoryError::Backend(
                "periodic update requires a delay greater than 0".into(),
            ));
        }
        Ok(Self {
            store,
            bucket: bucket.into(),
            object: object.into(),
            refresh_interval_ms,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, DirectoryError> {
        let endpoint = config
            .s3_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_OBJECT_STORE_ENDPOINT);
        let store = HttpObjectStore::new(endpoint, config.backend_timeout())?;
        let interval = config
            .s3_periodic_update
            .then_some(config.s3_periodic_update_delay);
        Self::new(
            Arc::new(store),
            config.s3_bucket.clone(),
            config.s3_object.clone(),
            interval,
        )
    }
}

#[async_trait]
impl DirectoryStrategy for ObjectStorageDirectory {
    fn name(&self) -> &'static str {
        "object-storage"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn supports_periodic_refresh(&self) -> bool {
        self.refresh_interval_ms.is_some()
    }

    fn refresh_interval_millis(&self) -> u64 {
        self.refresh_interval_ms.unwrap_or(0)
    }

    async fn query(&self) -> Result<TargetEndpoints, DirectoryError> {
        let body = self.store.get_object(&self.bucket, &self.object).await?;
        parse_endpoint_map(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn directory_for(server: &MockServer) -> ObjectStorageDirectory {
        let store = HttpObjectStore::new(&server.uri(), Duration::from_secs(2)).unwrap();
        ObjectStorageDirectory::new(Arc::new(store), "admin", "cluster/instances.json", None)
            .unwrap()
    }

    #[tokio::test]
    async fn reads_map_from_object() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/admin/cluster/instances.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"10.0.0.5":"8080"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = directory_for(&server);
        let targets = dir.fetch().await;
        assert_eq!(targets.get("10.0.0.5"), Some(&8080));
    }

    #[tokio::test]
    async fn missing_object_yields_empty_map() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = directory_for(&server);
        assert!(dir.query().await.is_err());
        assert!(dir.fetch().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_object_yields_empty_map() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("10.0.0.5=8080"))
            .mount(&server)
            .await;

        let dir = directory_for(&server);
        assert!(dir.fetch().await.is_empty());
    }

    #[test]
    fn periodic_refresh_follows_config() {
        let config = Config {
            targets_datasource: "s3".into(),
            ..Config::default()
        };
        let dir = ObjectStorageDirectory::from_config(&config).unwrap();
        assert!(!dir.supports_periodic_refresh());

        let config = Config {
            s3_periodic_update: true,
            s3_periodic_update_delay: 60_000,
            ..config
        };
        let dir = ObjectStorageDirectory::from_config(&config).unwrap();
        assert!(dir.supports_periodic_refresh());
        assert_eq!(dir.refresh_interval_millis(), 60_000);
    }

    #[test]
    fn zero_delay_with_refresh_fails_construction() {
        let config = Config {
            s3_periodic_update: true,
            s3_periodic_update_delay: 0,
            ..Config::default()
        };
        assert!(ObjectStorageDirectory::from_config(&config).is_err());
    }
}

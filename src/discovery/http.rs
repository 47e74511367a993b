//! Minimal HTTP client shared by the backend adapters.

use std::time::Duration;

use log::debug;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use crate::error::DirectoryError;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base = Url::parse(endpoint).map_err(|e| {
            DirectoryError::Backend(format!("invalid endpoint {:?}: {}", endpoint, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(DirectoryError::Backend(format!(
                "endpoint {:?} cannot carry a path",
                endpoint
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// Base URL with `segments` appended, each one percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn get_bytes(&self, url: Url) -> Result<Vec<u8>, DirectoryError> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, DirectoryError> {
        let body = self.get_bytes(url).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

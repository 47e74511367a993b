//! Node identity.
//!
//! A [`Node`] names one running instance of the service. Two nodes are the
//! same node when their hosts match; ports and URLs are informational.

use std::fmt;
use std::hash::{Hash, Hasher};

use log::error;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Query parameter carrying the access token on the own messaging URL.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Node {
    /// A node known only by its host.
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: None,
            url: None,
        }
    }

    /// The identity of this process, with its externally reachable URL.
    pub fn own(ip: impl Into<String>, port: u16, use_tls: bool) -> Self {
        let ip = ip.into();
        let scheme = if use_tls { "https" } else { "http" };
        let url = format!("{}://{}:{}/", scheme, ip, port);
        Self {
            ip,
            port: Some(port),
            url: Some(url),
        }
    }

    /// Compares hosts, ignoring case and surrounding whitespace.
    pub fn is_host(&self, host: &str) -> bool {
        self.ip.trim().eq_ignore_ascii_case(host.trim())
    }

    /// URL peers may use to push admin messages to this node.
    ///
    /// Only available when a token is configured, since the endpoint
    /// rejects unauthenticated requests.
    pub fn messaging_url(&self, messages_path: &str, token: Option<&str>) -> Option<String> {
        let token = token?;
        let base = self.url.as_deref()?;
        let mut url = match Url::parse(base).and_then(|b| b.join(messages_path)) {
            Ok(url) => url,
            Err(e) => {
                error!("Error creating the node messaging URL from {}: {}", base, e);
                return None;
            }
        };
        url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
        Some(url.to_string())
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.is_host(&other.ip)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.trim().to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.ip, port),
            None => f.write_str(&self.ip),
        }
    }
}

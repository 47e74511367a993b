//! Fan-out dispatcher.
//!
//! Pushes one serialized envelope to every target concurrently and waits for
//! all of them. A failing peer is logged and recorded; it never cancels the
//! other pushes. Nothing is retried.

use std::fmt;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, info, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::discovery::TargetEndpoints;
use crate::error::{BrokerError, MAX_MESSAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Every push got a 2xx answer.
    Succeeded,
    /// At least one push failed.
    PartialFailure,
    /// The directory was empty; nothing was sent.
    NoTargets,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub host: String,
    pub port: u16,
    /// Response status on success, failure description otherwise.
    pub result: Result<u16, String>,
}

impl PushOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Short digest of the pushed body, as logged with each push.
    pub fingerprint: String,
    pub outcomes: Vec<PushOutcome>,
}

impl DispatchReport {
    pub fn status(&self) -> DispatchStatus {
        if self.outcomes.is_empty() {
            DispatchStatus::NoTargets
        } else if self.outcomes.iter().all(PushOutcome::is_success) {
            DispatchStatus::Succeeded
        } else {
            DispatchStatus::PartialFailure
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub struct FanOutDispatcher {
    client: Client,
    scheme: &'static str,
    messages_path: String,
    token: Option<String>,
}

impl fmt::Debug for FanOutDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutDispatcher")
            .field("scheme", &self.scheme)
            .field("messages_path", &self.messages_path)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl FanOutDispatcher {
    pub fn new(
        token: Option<String>,
        messages_path: impl Into<String>,
        use_tls: bool,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        if timeout.is_zero() {
            return Err(BrokerError::Config(
                "the push timeout must be greater than zero".into(),
            ));
        }
        if token.is_none() {
            warn!("No admin message token configured, pushes are sent unauthenticated");
        }
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            scheme: if use_tls { "https" } else { "http" },
            messages_path: messages_path.into(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        Self::new(
            config.jwt.clone(),
            config.messages_path.clone(),
            config.use_tls,
            config.push_timeout(),
        )
    }

    pub fn endpoint_url(&self, host: &str, port: u16) -> String {
        if host.contains(':') && !host.starts_with('[') {
            format!("{}://[{}]:{}{}", self.scheme, host, port, self.messages_path)
        } else {
            format!("{}://{}:{}{}", self.scheme, host, port, self.messages_path)
        }
    }

    /// Pushes `body` to every entry of `targets` and waits for all results.
    ///
    /// Fails before any network call when `body` exceeds
    /// [`MAX_MESSAGE_SIZE`]. Per-target failures are reported, not raised.
    pub async fn dispatch(
        &self,
        body: &[u8],
        targets: &TargetEndpoints,
    ) -> Result<DispatchReport, BrokerError> {
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(BrokerError::MessageTooLarge {
                size: body.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let fingerprint = fingerprint(body);
        if targets.is_empty() {
            warn!(
                "Publish AdminMessage {} cannot run. There are no target endpoints.",
                fingerprint
            );
            return Ok(DispatchReport {
                fingerprint,
                outcomes: Vec::new(),
            });
        }

        let pushes = targets.iter().map(|(host, port)| {
            debug!(
                "Preparing notification {} for target: {}:{}",
                fingerprint, host, port
            );
            self.push(host, *port, body, &fingerprint)
        });
        let report = DispatchReport {
            outcomes: join_all(pushes).await,
            fingerprint,
        };

        match report.status() {
            DispatchStatus::Succeeded => info!(
                "Publish AdminMessage {} to all {} target endpoints succeeded.",
                report.fingerprint,
                report.outcomes.len()
            ),
            _ => warn!(
                "Publish AdminMessage {} to all target endpoints failed. {} of {} requests did not complete.",
                report.fingerprint,
                report.failed(),
                report.outcomes.len()
            ),
        }
        Ok(report)
    }

    async fn push(&self, host: &str, port: u16, body: &[u8], fingerprint: &str) -> PushOutcome {
        let url = self.endpoint_url(host, port);
        debug!("Pushing AdminMessage {} to {}", fingerprint, url);

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("bearer {}", token));
        }

        let result = match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    "Pushed AdminMessage {} to {}:{} ({})",
                    fingerprint,
                    host,
                    port,
                    response.status()
                );
                Ok(response.status().as_u16())
            }
            Ok(response) => {
                let reason = format!("endpoint answered {}", response.status());
                warn!(
                    "Failed to post AdminMessage {} to endpoint {}:{}. The error is: {}",
                    fingerprint, host, port, reason
                );
                Err(reason)
            }
            Err(e) => {
                warn!(
                    "Failed to post AdminMessage {} to endpoint {}:{}. The error is: {}",
                    fingerprint, host, port, e
                );
                Err(e.to_string())
            }
        };

        PushOutcome {
            host: host.to_string(),
            port,
            result,
        }
    }
}

/// First 8 bytes of the body's SHA-256, hex-encoded.
pub fn fingerprint(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    hex::encode(&digest[..8])
}

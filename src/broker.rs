//! Message broker facade.
//!
//! [`build_broker`] picks one implementation from configuration:
//!
//! * [`HttpMessageBroker`] pushes every message directly to the admin
//!   endpoint of each peer found in the target directory.
//! * [`LocalMessageBroker`] only ever delivers inside this process, for
//!   single-instance deployments.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::directory::TargetDirectory;
use crate::discovery::{build_strategy, DirectoryKind, DirectoryStrategy, TargetEndpoints};
use crate::dispatcher::{DispatchReport, FanOutDispatcher};
use crate::error::BrokerError;
use crate::message::{AdminMessage, EnvelopeCodec, JsonCodec, MessageHandler};
use crate::node::Node;
use crate::router::{remote_scope, RemoteScope, Router};

/// What happened to a message on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The local handler ran.
    Handled,
    /// The message is not meant for this node.
    Skipped,
    /// The input was unusable and dropped.
    Rejected,
}

impl From<bool> for Delivery {
    fn from(handled: bool) -> Self {
        if handled {
            Delivery::Handled
        } else {
            Delivery::Skipped
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendReport {
    pub local: Delivery,
    /// `None` when nothing had to leave the process.
    pub remote: Option<DispatchReport>,
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Delivers locally when applicable, then pushes to the remote scope.
    ///
    /// Remote delivery is best effort: per-peer failures show up in the
    /// report, not as an error.
    async fn send_message(&self, message: AdminMessage) -> Result<SendReport, BrokerError>;

    /// Entry point for bytes pushed by a peer. Never fails; unusable input
    /// is logged and dropped.
    fn receive_raw_message(&self, raw: &[u8]) -> Delivery;

    /// The identity this broker routes for.
    fn own_node(&self) -> &Node;

    /// URL peers push to, when this broker accepts pushes and a token is
    /// configured.
    fn messaging_url(&self) -> Option<&str> {
        None
    }
}

/// Which broker implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    /// HTTP push; `Some` pins the directory strategy regardless of
    /// `targets_datasource`.
    Http(Option<DirectoryKind>),
    Local,
}

impl FromStr for BrokerKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "http" | "HttpMessageBroker" => Ok(BrokerKind::Http(None)),
            "StaticWebMessageBroker" => Ok(BrokerKind::Http(Some(DirectoryKind::Static))),
            "S3WebMessageBroker" => Ok(BrokerKind::Http(Some(DirectoryKind::ObjectStorage))),
            "ServiceDiscoveryWebMessageBroker" => {
                Ok(BrokerKind::Http(Some(DirectoryKind::ServiceRegistry)))
            }
            "TargetGroupWebMessageBroker" => Ok(BrokerKind::Http(Some(
                DirectoryKind::LoadBalancerTargetGroup,
            ))),
            "local" | "LocalMessageBroker" => Ok(BrokerKind::Local),
            other => Err(BrokerError::Config(format!(
                "admin message broker {:?} is not supported",
                other
            ))),
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerKind::Http(None) => f.write_str("http"),
            BrokerKind::Http(Some(kind)) => write!(f, "http ({})", kind),
            BrokerKind::Local => f.write_str("local"),
        }
    }
}

/// Builds the configured broker. Must run inside a tokio runtime.
pub async fn build_broker(
    config: &Config,
    handler: Arc<dyn MessageHandler>,
) -> Result<Arc<dyn MessageBroker>, BrokerError> {
    let kind: BrokerKind = config.broker.parse()?;
    let own = Node::own(config.node_ip.clone(), config.node_port, config.use_tls);
    info!("Initializing the {} message broker for node {}", kind, own);

    let broker: Arc<dyn MessageBroker> = match kind {
        BrokerKind::Local => Arc::new(LocalMessageBroker::new(own, handler)),
        BrokerKind::Http(pinned) => {
            let strategy = match pinned {
                Some(datasource) => build_strategy(&Config {
                    targets_datasource: datasource.to_string(),
                    ..config.clone()
                }),
                None => build_strategy(config),
            };
            let dispatcher = FanOutDispatcher::from_config(config)?;
            let messaging_url = own.messaging_url(&config.messages_path, config.jwt.as_deref());
            debug!("OWN_NODE_MESSAGING_URL: {:?}", messaging_url);
            let broker = HttpMessageBroker::start(own, handler, strategy, dispatcher)
                .await
                .with_messaging_url(messaging_url);
            Arc::new(broker)
        }
    };
    Ok(broker)
}

pub struct HttpMessageBroker {
    router: Router,
    directory: TargetDirectory,
    dispatcher: FanOutDispatcher,
    codec: Arc<dyn EnvelopeCodec>,
    messaging_url: Option<String>,
}

impl HttpMessageBroker {
    /// Starts the target directory and returns a ready broker.
    pub async fn start(
        own: Node,
        handler: Arc<dyn MessageHandler>,
        strategy: Arc<dyn DirectoryStrategy>,
        dispatcher: FanOutDispatcher,
    ) -> Self {
        Self {
            router: Router::new(own, handler),
            directory: TargetDirectory::start(strategy).await,
            dispatcher,
            codec: Arc::new(JsonCodec),
            messaging_url: None,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_messaging_url(mut self, url: Option<String>) -> Self {
        self.messaging_url = url;
        self
    }

    /// Peers a message must be pushed to. This node's own entry is never
    /// included; its local delivery already happened in `send_message`.
    fn remote_targets(&self, scope: &RemoteScope) -> TargetEndpoints {
        let own = self.router.own();
        let peers: TargetEndpoints = self
            .directory
            .snapshot()
            .iter()
            .filter(|(host, _)| !own.is_host(host))
            .map(|(host, port)| (host.clone(), *port))
            .collect();
        match scope {
            RemoteScope::None => TargetEndpoints::new(),
            RemoteScope::Broadcast => peers,
            RemoteScope::Unicast(destination) => {
                let targets: TargetEndpoints = peers
                    .iter()
                    .filter(|(host, _)| destination.is_host(host))
                    .map(|(host, port)| (host.clone(), *port))
                    .collect();
                if !targets.is_empty() {
                    return targets;
                }
                // Entries keyed by something other than the host (target ids)
                // cannot be matched; receivers skip messages not meant for them.
                warn!(
                    "Destination {} of the AdminMessage is not a known target endpoint, pushing to all {} peers",
                    destination,
                    peers.len()
                );
                peers
            }
        }
    }
}

#[async_trait]
impl MessageBroker for HttpMessageBroker {
    async fn send_message(&self, message: AdminMessage) -> Result<SendReport, BrokerError> {
        if message.source.is_none() {
            error!("Rejecting AdminMessage.@Class: {} without source", message.kind());
            return Err(BrokerError::MissingSource);
        }
        info!(
            "Publish AdminMessage.@Class: {} , Source.Ip: {}",
            message.kind(),
            message.source_ip()
        );

        // Local delivery never depends on the remote push.
        let local = Delivery::from(self.router.deliver(&message)?);

        let scope = remote_scope(&message, self.router.own());
        if scope == RemoteScope::None {
            return Ok(SendReport {
                local,
                remote: None,
            });
        }

        let body = self.codec.encode(&message).map_err(|e| {
            error!(
                "Error while serializing AdminMessage of type {} prior to send it: {}",
                message.kind(),
                e
            );
            e
        })?;

        let targets = self.remote_targets(&scope);
        let report = self.dispatcher.dispatch(&body, &targets).await.map_err(|e| {
            error!("Error while sending AdminMessage: {}", e);
            e
        })?;

        Ok(SendReport {
            local,
            remote: Some(report),
        })
    }

    fn receive_raw_message(&self, raw: &[u8]) -> Delivery {
        receive_raw(&self.router, self.codec.as_ref(), raw)
    }

    fn own_node(&self) -> &Node {
        self.router.own()
    }

    fn messaging_url(&self) -> Option<&str> {
        self.messaging_url.as_deref()
    }
}

/// Delivers inside this process only.
pub struct LocalMessageBroker {
    router: Router,
    codec: Arc<dyn EnvelopeCodec>,
}

impl LocalMessageBroker {
    pub fn new(own: Node, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            router: Router::new(own, handler),
            codec: Arc::new(JsonCodec),
        }
    }
}

#[async_trait]
impl MessageBroker for LocalMessageBroker {
    async fn send_message(&self, message: AdminMessage) -> Result<SendReport, BrokerError> {
        let local = Delivery::from(self.router.deliver(&message)?);
        Ok(SendReport {
            local,
            remote: None,
        })
    }

    fn receive_raw_message(&self, raw: &[u8]) -> Delivery {
        receive_raw(&self.router, self.codec.as_ref(), raw)
    }

    fn own_node(&self) -> &Node {
        self.router.own()
    }
}

fn receive_raw(router: &Router, codec: &dyn EnvelopeCodec, raw: &[u8]) -> Delivery {
    if raw.iter().all(u8::is_ascii_whitespace) {
        warn!("{}", BrokerError::EmptyInput);
        return Delivery::Rejected;
    }

    let message = match codec.decode(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Error while de-serializing the received raw AdminMessage {} : {}",
                String::from_utf8_lossy(raw),
                e
            );
            return Delivery::Rejected;
        }
    };

    match router.deliver(&message) {
        Ok(handled) => Delivery::from(handled),
        Err(e) => {
            warn!(
                "Error while receiving the AdminMessage {} : {}",
                String::from_utf8_lossy(raw),
                e
            );
            Delivery::Rejected
        }
    }
}

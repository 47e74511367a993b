//! Intra-cluster admin message broker.
//!
//! Any node can broadcast or unicast an [`AdminMessage`] to every other
//! running instance. Local delivery happens exactly once; remote delivery
//! is a best-effort HTTP push to each peer of the current target directory.
//!
//! The pieces, leaves first:
//!
//! * [`node`]: who this process is.
//! * [`discovery`]: where peers come from (static, object storage, service
//!   registry or load-balancer target group).
//! * [`directory`]: the periodically refreshed peer snapshot.
//! * [`router`]: whether a message must be handled here.
//! * [`dispatcher`]: concurrent fan-out of one serialized message.
//! * [`broker`]: the `send_message` / `receive_raw_message` facade.

pub mod broker;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod node;
pub mod router;

pub use broker::{
    build_broker, BrokerKind, Delivery, HttpMessageBroker, LocalMessageBroker, MessageBroker,
    SendReport,
};
pub use config::Config;
pub use directory::{DirectoryState, TargetDirectory};
pub use discovery::{DirectoryStrategy, TargetEndpoints};
pub use dispatcher::{DispatchReport, DispatchStatus, FanOutDispatcher, PushOutcome};
pub use error::{BrokerError, DirectoryError, MAX_MESSAGE_SIZE};
pub use message::{AdminMessage, EnvelopeCodec, JsonCodec, MessageHandler};
pub use node::Node;

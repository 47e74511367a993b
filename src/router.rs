//! Broadcast routing.
//!
//! The same rule decides local delivery for a message being sent and for a
//! message just received:
//!
//! * destination is this node: handle locally;
//! * destination is another node: skip;
//! * no destination, authored elsewhere: handle locally;
//! * no destination, authored here: handle only when
//!   `broadcastIncludeLocalNode` is set.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::BrokerError;
use crate::message::{AdminMessage, MessageHandler};
use crate::node::Node;

/// Which remote nodes a sent message must reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteScope {
    /// Destination is this node, nothing leaves the process.
    None,
    /// Exactly the directory entries on this node's host.
    Unicast(Node),
    /// Every directory entry.
    Broadcast,
}

/// Returns whether `own` must handle `message`.
pub fn should_handle_locally(message: &AdminMessage, own: &Node) -> Result<bool, BrokerError> {
    let source = message.source.as_ref().ok_or(BrokerError::MissingSource)?;
    Ok(match &message.destination {
        Some(destination) => destination == own,
        None => source != own || message.broadcast_include_local_node,
    })
}

pub fn remote_scope(message: &AdminMessage, own: &Node) -> RemoteScope {
    match &message.destination {
        Some(destination) if destination == own => RemoteScope::None,
        Some(destination) => RemoteScope::Unicast(destination.clone()),
        None => RemoteScope::Broadcast,
    }
}

/// Applies the routing rule and runs the local handler.
pub struct Router {
    own: Node,
    handler: Arc<dyn MessageHandler>,
}

impl Router {
    pub fn new(own: Node, handler: Arc<dyn MessageHandler>) -> Self {
        Self { own, handler }
    }

    pub fn own(&self) -> &Node {
        &self.own
    }

    /// Delivers `message` locally if it is meant for this node.
    ///
    /// Returns `Ok(true)` when the handler ran, even if it failed; handler
    /// errors are logged and swallowed.
    pub fn deliver(&self, message: &AdminMessage) -> Result<bool, BrokerError> {
        if !should_handle_locally(message, &self.own)? {
            debug!(
                "Skipped AdminMessage.@Class: {} , Source.Ip: {}",
                message.kind(),
                message.source_ip()
            );
            return Ok(false);
        }

        info!(
            "Receive AdminMessage.@Class: {} , Source.Ip: {}",
            message.kind(),
            message.source_ip()
        );
        if let Err(e) = self.handler.handle(message) {
            warn!(
                "Error while trying to handle the received AdminMessage {:?} : {:#}",
                message, e
            );
        }
        Ok(true)
    }
}

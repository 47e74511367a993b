//! Admin broker daemon entry point.
//!
//! Reads newline-delimited JSON admin messages from stdin and sends each one
//! through the configured broker until stdin closes or Ctrl+C.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use admin_broker::{build_broker, AdminMessage, Config, MessageBroker, Node};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting admin broker {} with targets datasource {}",
        cfg.broker, cfg.targets_datasource
    );

    let handler = Arc::new(|message: &AdminMessage| -> anyhow::Result<()> {
        info!(
            "Handling AdminMessage.@Class: {} , Source.Ip: {} , Payload: {}",
            message.kind(),
            message.source_ip(),
            serde_json::Value::Object(message.payload.clone())
        );
        Ok(())
    });
    let broker = build_broker(&cfg, handler).await?;
    let own = broker.own_node().clone();
    info!("Node identity: {}", own);
    if let Some(url) = broker.messaging_url() {
        info!("Accepting admin messages at {}", url);
    }

    // Stdin feeder
    let feeder_broker = Arc::clone(&broker);
    let mut feeder_handle = tokio::spawn(async move {
        if let Err(e) = feed_stdin(feeder_broker, own).await {
            error!("Stdin feeder failed: {}", e);
        }
    });

    // Graceful Shutdown
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        },
        _ = &mut feeder_handle => info!("Stdin feeder finished, shutting down..."),
    }

    feeder_handle.abort();
    info!("Shutdown complete.");
    Ok(())
}

/// Sends every stdin line as an admin message. A line without `source` is
/// sent on behalf of this node.
async fn feed_stdin(broker: Arc<dyn MessageBroker>, own: Node) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut message: AdminMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed admin message {:?}: {}", line, e);
                continue;
            }
        };
        if message.source.is_none() {
            message.source = Some(own.clone());
        }
        match broker.send_message(message).await {
            Ok(report) => info!(
                "Sent admin message: local {:?}, remote {:?}",
                report.local,
                report.remote.map(|r| r.status())
            ),
            Err(e) => error!("Failed to send admin message: {}", e),
        }
    }
    info!("Stdin closed, no more admin messages to send");
    Ok(())
}

//! Routes announce and leave messages from the transport into the registry

use hemtjanst_core::{Message, PublishSubscriber, QOS_AT_LEAST_ONCE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::manager::Manager;

/// Topics the router listens and publishes on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Prefix devices announce under, `<announce>/<device-topic>`
    pub announce: String,
    /// Topic carrying leave tokens
    pub leave: String,
    /// Topic published once to ask devices to re-announce
    pub discover: String,
    /// Wait before publishing the discover signal
    pub discover_delay: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            announce: "announce".to_string(),
            leave: "leave".to_string(),
            discover: "discover".to_string(),
            discover_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
enum Inbound {
    Announce { topic: String, payload: Vec<u8> },
    Leave(String),
}

/// Feeds transport messages into a [`Manager`]
///
/// All messages go through one channel and one task, so Add and Leave are
/// applied in the order the transport delivered them.
pub struct Router {
    manager: Arc<Manager>,
    transport: Arc<dyn PublishSubscriber>,
    config: RouterConfig,
}

impl Router {
    pub fn new(manager: Arc<Manager>, config: RouterConfig) -> Self {
        let transport = manager.transport();
        Self {
            manager,
            transport,
            config,
        }
    }

    /// Subscribe to announce and leave topics, then run the routing task
    ///
    /// Routing starts right away. The discover signal is published once from
    /// a separate task, after the subscriptions are in place and the
    /// configured delay has passed.
    pub fn start(self) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let announce_filter = format!("{}/#", self.config.announce);
        let prefix = format!("{}/", self.config.announce);
        let announce_tx = tx.clone();
        self.transport.subscribe(
            &announce_filter,
            QOS_AT_LEAST_ONCE,
            Arc::new(move |msg: Message| match msg.topic.strip_prefix(&prefix) {
                // Device topics have at least two levels
                Some(topic) if topic.contains('/') => {
                    let _ = announce_tx.send(Inbound::Announce {
                        topic: topic.to_string(),
                        payload: msg.payload,
                    });
                }
                _ => warn!(topic = %msg.topic, "Ignoring announce with malformed device topic"),
            }),
        );
        info!(topic = %announce_filter, "Subscribed to announce topic");

        self.transport.subscribe(
            &self.config.leave,
            QOS_AT_LEAST_ONCE,
            Arc::new(move |msg: Message| {
                let token = msg.payload_str().trim().to_string();
                if !token.is_empty() {
                    let _ = tx.send(Inbound::Leave(token));
                }
            }),
        );
        info!(topic = %self.config.leave, "Subscribed to leave topic");

        let transport = self.transport.clone();
        let discover = self.config.discover.clone();
        let delay = self.config.discover_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            transport.publish(&discover, b"1", QOS_AT_LEAST_ONCE, true);
            info!(topic = %discover, "Initiated discovery");
        });

        tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                trace!(?inbound, "Routing message");
                match inbound {
                    Inbound::Announce { topic, payload } => {
                        self.manager.add(&topic, &payload).await
                    }
                    Inbound::Leave(token) => self.manager.leave(&token).await,
                }
            }
            debug!("Router channel closed");
        })
    }
}

//! Publish/subscribe capability set and an in-process implementation
//!
//! The network client (MQTT in production) lives outside this workspace; it
//! plugs in by implementing [`PublishSubscriber`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

/// QoS level used for every publish and subscribe in Hemtjänst
pub const QOS_AT_LEAST_ONCE: u8 = 1;

/// A message received from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8, lossy
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Subscription callback
pub type Callback = Arc<dyn Fn(Message) + Send + Sync>;

/// Transport that can both publish messages and deliver subscribed ones
pub trait PublishSubscriber: Send + Sync {
    /// Publish `payload` on `topic`. `retain` asks the broker to keep the
    /// message for subscribers that arrive later.
    fn publish(&self, topic: &str, payload: &[u8], qos: u8, retain: bool);

    /// Subscribe to a topic filter
    fn subscribe(&self, topic: &str, qos: u8, callback: Callback);

    /// Drop every subscription for the given topic filters
    fn unsubscribe(&self, topics: &[&str]);
}

/// A publish recorded by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Default)]
struct BusState {
    subscriptions: Vec<(String, Callback)>,
    retained: HashMap<String, Vec<u8>>,
    published: Vec<Published>,
}

/// In-process broker with MQTT filter matching and retained messages
///
/// Callbacks run on the publishing thread, after the internal lock has been
/// released, so a callback may publish or subscribe again. Publishes are only
/// kept for inspection on a transport built with
/// [`MemoryTransport::with_recording`].
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<BusState>,
    recording: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that keeps every publish for [`MemoryTransport::published`]
    pub fn with_recording() -> Self {
        Self {
            recording: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every publish seen so far, oldest first; empty unless recording
    pub fn published(&self) -> Vec<Published> {
        self.lock().published.clone()
    }

    /// Publishes seen on one exact topic
    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Currently retained payload for a topic
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.lock().retained.get(topic).cloned()
    }

    /// Number of active subscriptions whose filter equals `topic`
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.lock()
            .subscriptions
            .iter()
            .filter(|(filter, _)| filter == topic)
            .count()
    }

    /// Forget the publish record
    pub fn clear_published(&self) {
        self.lock().published.clear();
    }
}

impl PublishSubscriber for MemoryTransport {
    fn publish(&self, topic: &str, payload: &[u8], qos: u8, retain: bool) {
        let targets: Vec<Callback> = {
            let mut state = self.lock();
            if self.recording {
                state.published.push(Published {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                    qos,
                    retain,
                });
            }
            if retain {
                if payload.is_empty() {
                    state.retained.remove(topic);
                } else {
                    state.retained.insert(topic.to_string(), payload.to_vec());
                }
            }
            state
                .subscriptions
                .iter()
                .filter(|(filter, _)| topic_matches(filter, topic))
                .map(|(_, cb)| cb.clone())
                .collect()
        };

        trace!(topic = %topic, subscribers = targets.len(), retain, "Publish");
        for cb in targets {
            cb(Message::new(topic, payload));
        }
    }

    fn subscribe(&self, topic: &str, _qos: u8, callback: Callback) {
        let retained: Vec<Message> = {
            let mut state = self.lock();
            state.subscriptions.push((topic.to_string(), callback.clone()));
            let mut matching: Vec<Message> = state
                .retained
                .iter()
                .filter(|(t, _)| topic_matches(topic, t))
                .map(|(t, p)| Message::new(t.as_str(), p.as_slice()))
                .collect();
            matching.sort_by(|a, b| a.topic.cmp(&b.topic));
            matching
        };

        trace!(topic = %topic, retained = retained.len(), "Subscribe");
        for msg in retained {
            callback(msg);
        }
    }

    fn unsubscribe(&self, topics: &[&str]) {
        let mut state = self.lock();
        state
            .subscriptions
            .retain(|(filter, _)| !topics.contains(&filter.as_str()));
    }
}

/// Match a topic against an MQTT filter (`+` one level, trailing `#` any)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            exact => {
                if levels.next() != Some(exact) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

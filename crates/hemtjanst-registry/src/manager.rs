//! Device registry with handler fan-out

use async_trait::async_trait;
use hemtjanst_core::{Device, DeviceError, PublishSubscriber};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Change notification delivered to handlers
///
/// Each event carries its own snapshot of the device, so handlers never
/// observe later registry mutations through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device was announced, re-announced, or changed reachability
    Updated(Device),
    /// Device was permanently deleted by an empty announce
    Removed(Device),
}

impl DeviceEvent {
    pub fn device(&self) -> &Device {
        match self {
            Self::Updated(device) | Self::Removed(device) => device,
        }
    }
}

/// Consumer of registry changes
///
/// Handlers run on their own task and may call back into the [`Manager`].
#[async_trait]
pub trait DeviceHandler: Send + Sync {
    async fn device_updated(&self, device: Device);
    async fn device_removed(&self, device: Device);
}

struct Inner {
    devices: HashMap<String, Device>,
    handlers: Vec<mpsc::UnboundedSender<DeviceEvent>>,
}

impl Inner {
    /// Queue an event for every handler, dropping handlers that went away
    fn notify(&mut self, event: DeviceEvent) {
        self.handlers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Registry of known devices keyed by topic
///
/// Device map and handler list share one lock. Events are queued while the
/// lock is held, which keeps per-device ordering, and handler code only runs
/// on the handler's own task.
pub struct Manager {
    inner: RwLock<Inner>,
    transport: Arc<dyn PublishSubscriber>,
}

impl Manager {
    pub fn new(transport: Arc<dyn PublishSubscriber>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                devices: HashMap::new(),
                handlers: Vec::new(),
            }),
            transport,
        }
    }

    /// Transport the registry was created with
    pub fn transport(&self) -> Arc<dyn PublishSubscriber> {
        self.transport.clone()
    }

    /// Apply an announce for `topic`
    ///
    /// An empty payload permanently deletes the device. Otherwise the payload
    /// replaces the device's metadata and marks it reachable. Malformed
    /// payloads are logged and ignored.
    pub async fn add(&self, topic: &str, payload: &[u8]) {
        if payload.is_empty() {
            self.remove(topic).await;
            return;
        }

        let mut device = Device::new(topic);
        if let Err(e) = device.apply_metadata(payload) {
            warn!(topic = %topic, error = %e, "Ignoring announce with malformed metadata");
            return;
        }
        device.reachable = true;

        let mut inner = self.inner.write().await;
        let known = inner.devices.insert(topic.to_string(), device.clone()).is_some();
        inner.notify(DeviceEvent::Updated(device.clone()));
        drop(inner);

        if known {
            info!(topic = %topic, features = device.features().len(), "Device re-announced");
        } else {
            info!(
                topic = %topic,
                name = %device.name,
                device_type = %device.device_type,
                features = device.features().len(),
                "Device added"
            );
        }
    }

    async fn remove(&self, topic: &str) {
        let mut inner = self.inner.write().await;
        match inner.devices.remove(topic) {
            Some(device) => {
                inner.notify(DeviceEvent::Removed(device));
                drop(inner);
                info!(topic = %topic, "Device removed");
            }
            None => debug!(topic = %topic, "Empty announce for unknown device"),
        }
    }

    /// Mark every device whose topic or last-will id equals `token` unreachable
    pub async fn leave(&self, token: &str) {
        let mut inner = self.inner.write().await;
        let mut left = Vec::new();
        for device in inner.devices.values_mut() {
            if device.topic == token || device.last_will_id.as_deref() == Some(token) {
                device.reachable = false;
                left.push(device.clone());
            }
        }
        for device in &left {
            inner.notify(DeviceEvent::Updated(device.clone()));
        }
        drop(inner);

        if left.is_empty() {
            debug!(token = %token, "Leave did not match any device");
        }
        for device in left {
            info!(topic = %device.topic, token = %token, "Device left");
        }
    }

    /// Get a device by topic
    pub async fn get(&self, topic: &str) -> Result<Device, DeviceError> {
        self.inner
            .read()
            .await
            .devices
            .get(topic)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(topic.to_string()))
    }

    /// Snapshot of all devices keyed by topic
    pub async fn get_all(&self) -> HashMap<String, Device> {
        self.inner.read().await.devices.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Register a new event stream
    ///
    /// Every currently known device is queued as `Updated` exactly once
    /// before any later event.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        for device in inner.devices.values() {
            // Receiver is still in scope, send cannot fail
            let _ = tx.send(DeviceEvent::Updated(device.clone()));
        }
        debug!(replayed = inner.devices.len(), "Handler registered");
        inner.handlers.push(tx);
        rx
    }

    /// Register a handler and drive it on its own task
    pub async fn add_handler(&self, handler: Arc<dyn DeviceHandler>) -> JoinHandle<()> {
        let mut rx = self.subscribe().await;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    DeviceEvent::Updated(device) => handler.device_updated(device).await,
                    DeviceEvent::Removed(device) => handler.device_removed(device).await,
                }
            }
        })
    }

    /// Ask a device to change a feature, resolving the feature through the registry
    pub async fn set_feature(&self, topic: &str, feature: &str, value: &str) -> Result<(), DeviceError> {
        let inner = self.inner.read().await;
        let device = inner
            .devices
            .get(topic)
            .ok_or_else(|| DeviceError::NotFound(topic.to_string()))?;
        device.get_feature(feature)?.set(self.transport.as_ref(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemtjanst_core::MemoryTransport;
    use std::collections::HashSet;
    use std::time::Duration;

    const KITCHEN: &[u8] = br#"{"name":"Kitchen Light","type":"lightbulb","lastWillID":"will-1","feature":{"on":{}}}"#;

    fn manager() -> (Manager, Arc<MemoryTransport>) {
        let bus = Arc::new(MemoryTransport::with_recording());
        (Manager::new(bus.clone()), bus)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> DeviceEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let (manager, _) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;

        let device = manager.get("lightbulb/kitchen").await.unwrap();
        assert_eq!(device.topic, "lightbulb/kitchen");
        assert_eq!(device.name, "Kitchen Light");
        assert!(device.reachable);
        assert_eq!(
            device.get_feature("on").unwrap().get_topic,
            "lightbulb/kitchen/on/get"
        );
    }

    #[tokio::test]
    async fn test_empty_add_for_unknown_is_noop() {
        let (manager, _) = manager();
        manager.add("a", KITCHEN).await;
        manager.add("unknown", b"").await;
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_add_removes() {
        let (manager, _) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;
        let mut rx = manager.subscribe().await;
        assert!(matches!(next(&mut rx).await, DeviceEvent::Updated(_)));

        manager.add("lightbulb/kitchen", b"").await;

        assert!(manager.is_empty().await);
        let err = manager.get("lightbulb/kitchen").await.unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
        match next(&mut rx).await {
            DeviceEvent::Removed(device) => assert_eq!(device.topic, "lightbulb/kitchen"),
            other => panic!("expected Removed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_readd_replaces_without_duplicating() {
        let (manager, _) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;
        manager
            .add(
                "lightbulb/kitchen",
                br#"{"feature":{"on":{},"brightness":{"min":0,"max":100,"step":1}}}"#,
            )
            .await;

        assert_eq!(manager.len().await, 1);
        let device = manager.get("lightbulb/kitchen").await.unwrap();
        assert!(device.has_feature("brightness"));
        assert!(device.last_will_id.is_none());
    }

    #[tokio::test]
    async fn test_malformed_add_has_no_effect() {
        let (manager, _) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;
        let mut rx = manager.subscribe().await;
        next(&mut rx).await;

        manager.add("lightbulb/kitchen", b"{not json").await;
        manager.add("other", b"[1, 2]").await;

        assert_eq!(manager.len().await, 1);
        assert_eq!(manager.get("lightbulb/kitchen").await.unwrap().name, "Kitchen Light");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_by_last_will() {
        let (manager, _) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;
        let mut rx = manager.subscribe().await;
        next(&mut rx).await;

        manager.leave("will-1").await;

        let device = manager.get("lightbulb/kitchen").await.unwrap();
        assert!(!device.reachable);
        match next(&mut rx).await {
            DeviceEvent::Updated(device) => assert!(!device.reachable),
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_leave_by_topic_then_reannounce() {
        let (manager, _) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;
        manager.leave("lightbulb/kitchen").await;
        assert!(!manager.get("lightbulb/kitchen").await.unwrap().reachable);

        manager.add("lightbulb/kitchen", KITCHEN).await;
        assert!(manager.get("lightbulb/kitchen").await.unwrap().reachable);
    }

    #[tokio::test]
    async fn test_leave_unknown_token_is_noop() {
        let (manager, _) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;
        let mut rx = manager.subscribe().await;
        next(&mut rx).await;

        manager.leave("nobody").await;
        assert!(manager.get("lightbulb/kitchen").await.unwrap().reachable);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_replays_each_device_once() {
        let (manager, _) = manager();
        for i in 0..5 {
            manager.add(&format!("sensor/{i}"), br#"{"type":"sensor"}"#).await;
        }

        let mut rx = manager.subscribe().await;
        let mut seen = HashSet::new();
        for _ in 0..5 {
            match next(&mut rx).await {
                DeviceEvent::Updated(device) => assert!(seen.insert(device.topic)),
                other => panic!("expected Updated, got {other:?}"),
            }
        }
        assert_eq!(seen.len(), 5);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_for_one_device_keep_order() {
        let (manager, _) = manager();
        let mut rx = manager.subscribe().await;

        manager.add("lightbulb/kitchen", KITCHEN).await;
        manager.leave("lightbulb/kitchen").await;
        manager.add("lightbulb/kitchen", KITCHEN).await;
        manager.add("lightbulb/kitchen", b"").await;

        let reachability: Vec<_> = [
            next(&mut rx).await,
            next(&mut rx).await,
            next(&mut rx).await,
        ]
        .into_iter()
        .map(|e| e.device().reachable)
        .collect();
        assert_eq!(reachability, vec![true, false, true]);
        assert!(matches!(next(&mut rx).await, DeviceEvent::Removed(_)));
    }

    struct ReentrantHandler {
        manager: Arc<Manager>,
        seen: mpsc::UnboundedSender<(String, bool)>,
    }

    #[async_trait]
    impl DeviceHandler for ReentrantHandler {
        async fn device_updated(&self, device: Device) {
            let found = self.manager.get(&device.topic).await.is_ok();
            let _ = self.manager.get_all().await;
            let _ = self.seen.send((device.topic, found));
        }

        async fn device_removed(&self, device: Device) {
            let found = self.manager.get(&device.topic).await.is_ok();
            let _ = self.seen.send((device.topic, found));
        }
    }

    #[tokio::test]
    async fn test_handler_may_call_back_into_manager() {
        let bus = Arc::new(MemoryTransport::with_recording());
        let manager = Arc::new(Manager::new(bus));
        manager.add("a", KITCHEN).await;
        manager.add("b", KITCHEN).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ReentrantHandler {
            manager: manager.clone(),
            seen: tx,
        });
        manager.add_handler(handler).await;

        let mut topics = Vec::new();
        for _ in 0..2 {
            let (topic, found) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(found);
            topics.push(topic);
        }
        topics.sort();
        assert_eq!(topics, vec!["a", "b"]);

        manager.add("a", b"").await;
        let (topic, found) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topic, "a");
        assert!(!found);
    }

    #[tokio::test]
    async fn test_set_feature_resolves_through_registry() {
        let (manager, bus) = manager();
        manager.add("lightbulb/kitchen", KITCHEN).await;

        manager.set_feature("lightbulb/kitchen", "on", "1").await.unwrap();
        let published = bus.published_on("lightbulb/kitchen/on/set");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, b"1");

        assert!(manager.set_feature("nope", "on", "1").await.unwrap_err().is_not_found());
        assert!(manager
            .set_feature("lightbulb/kitchen", "brightness", "1")
            .await
            .unwrap_err()
            .is_not_found());
    }
}

//! Keeps bridge accessories in sync with the device registry
//!
//! Every registry update rebuilds the device's accessory from scratch. A
//! rebuilt accessory only reaches the bridge when it differs structurally
//! from the installed one, reachability is applied to whichever accessory
//! ends up installed.

use async_trait::async_trait;
use hemtjanst_core::{Callback, Device, Feature, Message, PublishSubscriber};
use hemtjanst_registry::DeviceHandler;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::accessory::{Accessory, AccessoryInfo, Characteristic, Service};
use crate::bridge::Bridge;
use crate::capability::{capability_for, category_for, service_for, CapabilityDescriptor};
use crate::identity::topic_to_id;

/// A feature wired to a characteristic
struct Binding {
    feature: Feature,
    characteristic: Arc<Characteristic>,
}

impl Binding {
    fn same_topics(&self, other: &Self) -> bool {
        self.feature.name() == other.feature.name()
            && self.feature.get_topic == other.feature.get_topic
            && self.feature.set_topic == other.feature.set_topic
    }
}

/// An accessory built for one device, with its feature bindings
struct Installed {
    accessory: Arc<Accessory>,
    bindings: Vec<Binding>,
}

impl Installed {
    fn same_as(&self, other: &Self) -> bool {
        self.accessory.structurally_eq(&other.accessory)
            && self.bindings.len() == other.bindings.len()
            && self
                .bindings
                .iter()
                .zip(&other.bindings)
                .all(|(a, b)| a.same_topics(b))
    }
}

/// Registry handler projecting devices onto a [`Bridge`]
pub struct SyncAdapter {
    transport: Arc<dyn PublishSubscriber>,
    bridge: Arc<dyn Bridge>,
    installed: Mutex<HashMap<String, Installed>>,
}

impl SyncAdapter {
    pub fn new(transport: Arc<dyn PublishSubscriber>, bridge: Arc<dyn Bridge>) -> Self {
        Self {
            transport,
            bridge,
            installed: Mutex::new(HashMap::new()),
        }
    }

    /// Accessory currently installed for a device topic
    pub async fn accessory(&self, topic: &str) -> Option<Arc<Accessory>> {
        self.installed
            .lock()
            .await
            .get(topic)
            .map(|i| i.accessory.clone())
    }

    pub async fn len(&self) -> usize {
        self.installed.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.installed.lock().await.is_empty()
    }

    /// Build a fresh accessory for a device without touching the bridge
    /// or the transport
    fn build(&self, device: &Device) -> Installed {
        let name = if device.name.is_empty() {
            device.topic.clone()
        } else {
            device.name.clone()
        };
        let info = AccessoryInfo {
            name,
            manufacturer: device.manufacturer.clone(),
            model: device.model.clone(),
            serial_number: device.serial_number.clone(),
        };
        let mut accessory = Accessory::new(
            topic_to_id(&device.topic),
            info,
            category_for(&device.device_type),
        );

        let mut features = Vec::new();
        match service_for(&device.device_type) {
            Some(descriptor) => {
                let mut service = Service::new(descriptor.type_code);
                let mut seen = HashSet::new();
                for (name, feature) in device.features() {
                    let Some(capability) = capability_for(name) else {
                        warn!(topic = %device.topic, feature = %name, "Ignoring unknown feature");
                        continue;
                    };
                    if !seen.insert(capability.type_code) {
                        warn!(topic = %device.topic, feature = %name, "Feature maps to a characteristic already present");
                        continue;
                    }
                    service.add_characteristic(characteristic_for(capability, feature));
                    features.push((feature.clone(), capability.type_code));
                }
                if features.is_empty() {
                    debug!(topic = %device.topic, "No known features, main service left out");
                } else {
                    accessory.add_service(service);
                }
            }
            None => warn!(
                topic = %device.topic,
                device_type = %device.device_type,
                "Unknown device type, accessory has no main service"
            ),
        }

        let bindings = features
            .into_iter()
            .filter_map(|(feature, type_code)| {
                let characteristic = accessory.find_characteristic(type_code)?.clone();
                Some(Binding {
                    feature,
                    characteristic,
                })
            })
            .collect::<Vec<_>>();

        for binding in &bindings {
            let feature = binding.feature.clone();
            let transport = self.transport.clone();
            binding.characteristic.on_remote_write(move |value| {
                trace!(feature = %feature.name(), value = %value, "Remote write");
                if let Err(e) = feature.set(transport.as_ref(), &value.to_wire()) {
                    warn!(feature = %feature.name(), error = %e, "Failed to forward remote write");
                }
            });
        }

        Installed {
            accessory: Arc::new(accessory),
            bindings,
        }
    }

    /// Subscribe characteristics to their feature's reported values
    fn attach(&self, installed: &Installed) {
        for binding in &installed.bindings {
            self.subscribe_binding(binding);
        }
    }

    fn subscribe_binding(&self, binding: &Binding) {
        let characteristic = binding.characteristic.clone();
        let name = binding.feature.name().to_string();
        let callback: Callback = Arc::new(move |msg: Message| {
            let raw = msg.payload_str();
            if characteristic.update_from_wire(&raw) {
                trace!(feature = %name, value = %raw, "Value updated");
            } else {
                warn!(feature = %name, value = %raw, "Rejected feature value, unparsable or out of range");
            }
        });
        if let Err(e) = binding.feature.on_update(self.transport.as_ref(), callback) {
            warn!(feature = %binding.feature.name(), error = %e, "Failed to subscribe to feature");
        }
    }

    /// Drop the get-topic subscriptions of an accessory leaving the bridge
    ///
    /// Unsubscribing drops every callback on a topic, so bindings of the
    /// `remaining` accessories on the same topics are subscribed again.
    fn detach(&self, leaving: &Installed, remaining: &HashMap<String, Installed>) {
        let topics: HashSet<&str> = leaving
            .bindings
            .iter()
            .map(|b| b.feature.get_topic.as_str())
            .collect();
        if topics.is_empty() {
            return;
        }
        self.transport
            .unsubscribe(&topics.iter().copied().collect::<Vec<_>>());

        let shared = remaining
            .values()
            .flat_map(|i| &i.bindings)
            .filter(|b| topics.contains(b.feature.get_topic.as_str()));
        for binding in shared {
            debug!(topic = %binding.feature.get_topic, "Restoring shared feature subscription");
            self.subscribe_binding(binding);
        }
    }
}

/// Characteristic for a capability, with bounds taken from the feature
/// where it gives non-zero ones
fn characteristic_for(capability: &CapabilityDescriptor, feature: &Feature) -> Characteristic {
    let mut characteristic = Characteristic::new(capability.type_code, capability.format);
    characteristic.writable = capability.writable;
    characteristic.min = capability.min;
    characteristic.max = capability.max;
    characteristic.step = capability.step;
    if capability.is_numeric() {
        let bound = |v: Option<i64>| v.filter(|v| *v != 0).map(|v| v as f64);
        if let Some(min) = bound(feature.min) {
            characteristic.min = Some(min);
        }
        if let Some(max) = bound(feature.max) {
            characteristic.max = Some(max);
        }
        if let Some(step) = bound(feature.step) {
            characteristic.step = Some(step);
        }
    }
    characteristic
}

#[async_trait]
impl DeviceHandler for SyncAdapter {
    async fn device_updated(&self, device: Device) {
        let built = self.build(&device);
        let mut installed = self.installed.lock().await;
        let Some(current) = installed.remove(&device.topic) else {
            built.accessory.set_reachability(device.reachable);
            self.attach(&built);
            self.bridge.add_accessory(built.accessory.clone()).await;
            info!(
                topic = %device.topic,
                id = built.accessory.id,
                characteristics = built.bindings.len(),
                "Accessory installed"
            );
            installed.insert(device.topic, built);
            return;
        };

        built
            .accessory
            .set_reachability(current.accessory.reachability());
        let current = if current.same_as(&built) {
            debug!(topic = %device.topic, "Accessory unchanged");
            current
        } else {
            self.detach(&current, &installed);
            self.attach(&built);
            self.bridge.replace_accessory(built.accessory.clone()).await;
            info!(topic = %device.topic, id = built.accessory.id, "Accessory replaced");
            built
        };
        current.accessory.set_reachability(device.reachable);
        debug!(topic = %device.topic, reachable = device.reachable, "Reachability applied");
        installed.insert(device.topic, current);
    }

    async fn device_removed(&self, device: Device) {
        let mut installed = self.installed.lock().await;
        let Some(current) = installed.remove(&device.topic) else {
            debug!(topic = %device.topic, "Removed device had no accessory");
            return;
        };
        self.detach(&current, &installed);
        self.bridge.remove_accessory(current.accessory.id).await;
        info!(topic = %device.topic, id = current.accessory.id, "Accessory torn down");
    }
}

//! Device and feature types for announced smart-home devices

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::DeviceError;
use crate::transport::{Callback, PublishSubscriber, QOS_AT_LEAST_ONCE};

/// Topic prefix devices announce their metadata under
pub const ANNOUNCE_PREFIX: &str = "announce";

/// A single controllable or observable capability of a device
///
/// A feature only becomes operable once attached to a device through
/// [`Device::add_feature`]; attaching records the owning device topic and
/// fills in missing get/set topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub get_topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub set_topic: String,
    /// Feature name, set on attach
    #[serde(skip)]
    name: String,
    /// Owning device topic, set on attach
    #[serde(skip)]
    device: Option<String>,
}

impl Feature {
    /// Name under which the feature was attached
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic of the owning device, `None` while detached
    pub fn device_topic(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn is_attached(&self) -> bool {
        self.device.is_some()
    }

    fn ensure_attached(&self) -> Result<(), DeviceError> {
        if self.device.is_none() {
            let name = if self.name.is_empty() { "<unnamed>" } else { &self.name };
            return Err(DeviceError::Detached(name.to_string()));
        }
        Ok(())
    }

    /// Ask the device to change this feature's value (not retained)
    pub fn set(&self, transport: &dyn PublishSubscriber, value: &str) -> Result<(), DeviceError> {
        self.ensure_attached()?;
        transport.publish(&self.set_topic, value.as_bytes(), QOS_AT_LEAST_ONCE, false);
        Ok(())
    }

    /// Report the current value of this feature (retained)
    pub fn update(&self, transport: &dyn PublishSubscriber, value: &str) -> Result<(), DeviceError> {
        self.ensure_attached()?;
        transport.publish(&self.get_topic, value.as_bytes(), QOS_AT_LEAST_ONCE, true);
        Ok(())
    }

    /// Subscribe to requested value changes (device side)
    pub fn on_set(&self, transport: &dyn PublishSubscriber, callback: Callback) -> Result<(), DeviceError> {
        self.ensure_attached()?;
        transport.subscribe(&self.set_topic, QOS_AT_LEAST_ONCE, callback);
        Ok(())
    }

    /// Subscribe to reported values (bridge side)
    pub fn on_update(&self, transport: &dyn PublishSubscriber, callback: Callback) -> Result<(), DeviceError> {
        self.ensure_attached()?;
        transport.subscribe(&self.get_topic, QOS_AT_LEAST_ONCE, callback);
        Ok(())
    }
}

/// Wire form of an announce payload
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceMeta {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    manufacturer: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    serial_number: String,
    #[serde(default, rename = "type")]
    device_type: String,
    #[serde(default, rename = "lastWillID")]
    last_will_id: Option<String>,
    #[serde(default, rename = "feature")]
    features: Option<BTreeMap<String, Feature>>,
}

/// A device known to the registry, keyed by its topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub topic: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(rename = "lastWillID", skip_serializing_if = "Option::is_none")]
    pub last_will_id: Option<String>,
    /// Locally derived liveness, never part of the wire payload
    #[serde(skip)]
    pub reachable: bool,
    #[serde(rename = "feature")]
    features: BTreeMap<String, Feature>,
}

impl Device {
    /// Create an empty device for a topic
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            name: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            serial_number: String::new(),
            device_type: String::new(),
            last_will_id: None,
            reachable: false,
            features: BTreeMap::new(),
        }
    }

    /// Decode a device from its announce payload, taking the topic from the payload
    pub fn from_json(payload: &[u8]) -> Result<Self, DeviceError> {
        let mut device = Self::new(String::new());
        device.apply_metadata(payload)?;
        Ok(device)
    }

    /// Replace this device's metadata with a decoded announce payload
    ///
    /// Features are rebuilt through [`Device::add_feature`]. On failure the
    /// device is left untouched. A topic already set on the device takes
    /// precedence over the payload's `topic`.
    pub fn apply_metadata(&mut self, payload: &[u8]) -> Result<(), DeviceError> {
        let meta: DeviceMeta = serde_json::from_slice(payload)?;

        if self.topic.is_empty() {
            self.topic = meta.topic;
        } else if !meta.topic.is_empty() && meta.topic != self.topic {
            warn!(
                topic = %self.topic,
                payload_topic = %meta.topic,
                "Announce payload topic differs from device topic, keeping device topic"
            );
        }

        self.name = meta.name;
        self.manufacturer = meta.manufacturer;
        self.model = meta.model;
        self.serial_number = meta.serial_number;
        self.device_type = meta.device_type;
        self.last_will_id = meta.last_will_id.filter(|id| !id.is_empty());

        self.features.clear();
        for (name, feature) in meta.features.unwrap_or_default() {
            self.add_feature(&name, feature);
        }
        Ok(())
    }

    /// Attach a feature, deriving missing get/set topics from the device topic
    pub fn add_feature(&mut self, name: &str, mut feature: Feature) -> &Feature {
        if feature.get_topic.is_empty() {
            feature.get_topic = format!("{}/{}/get", self.topic, name);
        }
        if feature.set_topic.is_empty() {
            feature.set_topic = format!("{}/{}/set", self.topic, name);
        }
        feature.name = name.to_string();
        feature.device = Some(self.topic.clone());
        self.features.insert(name.to_string(), feature);
        &self.features[name]
    }

    /// Detach and return a feature
    pub fn remove_feature(&mut self, name: &str) -> Result<Feature, DeviceError> {
        let mut feature = self
            .features
            .remove(name)
            .ok_or_else(|| self.feature_not_found(name))?;
        feature.device = None;
        Ok(feature)
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    pub fn get_feature(&self, name: &str) -> Result<&Feature, DeviceError> {
        self.features
            .get(name)
            .ok_or_else(|| self.feature_not_found(name))
    }

    /// Attached features keyed by name
    pub fn features(&self) -> &BTreeMap<String, Feature> {
        &self.features
    }

    fn feature_not_found(&self, name: &str) -> DeviceError {
        DeviceError::FeatureNotFound {
            device: self.topic.clone(),
            feature: name.to_string(),
        }
    }

    /// Publish this device's metadata, retained, on `announce/<topic>`
    pub fn publish_meta(&self, transport: &dyn PublishSubscriber) -> Result<(), DeviceError> {
        let payload = serde_json::to_vec(self)?;
        transport.publish(
            &format!("{}/{}", ANNOUNCE_PREFIX, self.topic),
            &payload,
            QOS_AT_LEAST_ONCE,
            true,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::sync::Arc;

    const JSON_BULB: &[u8] = br#"
    {
        "topic": "light/jsonBulb",
        "name": "jsonBulb",
        "type": "lightbulb",
        "lastWillID": "b1e4",
        "feature": {
            "on": {},
            "brightness": { "min": 0, "max": 10, "step": 1 },
            "colorTemperature": {
                "getTopic": "light/jsonBulb/color/get",
                "setTopic": "light/jsonBulb/color/set"
            }
        }
    }"#;

    fn attached_device() -> Device {
        let mut device = Device::new("lightbulb");
        device.add_feature("on", Feature::default());
        device
    }

    #[test]
    fn test_new_device() {
        let device = Device::new("test");
        assert_eq!(device.topic, "test");
        assert!(!device.has_feature(""));
        assert!(!device.reachable);
    }

    #[test]
    fn test_topic_derivation() {
        let mut device = Device::new("room/light");
        device.add_feature("on", Feature::default());

        let feature = device.get_feature("on").unwrap();
        assert_eq!(feature.get_topic, "room/light/on/get");
        assert_eq!(feature.set_topic, "room/light/on/set");
        assert_eq!(feature.device_topic(), Some("room/light"));
        assert_eq!(feature.name(), "on");
    }

    #[test]
    fn test_decode_json() {
        let device = Device::from_json(JSON_BULB).unwrap();
        assert_eq!(device.topic, "light/jsonBulb");
        assert_eq!(device.name, "jsonBulb");
        assert_eq!(device.device_type, "lightbulb");
        assert_eq!(device.last_will_id.as_deref(), Some("b1e4"));

        for name in ["on", "brightness", "colorTemperature"] {
            assert!(device.has_feature(name), "missing feature {name}");
            assert!(device.get_feature(name).unwrap().is_attached());
        }

        let on = device.get_feature("on").unwrap();
        assert_eq!(on.get_topic, "light/jsonBulb/on/get");
        assert_eq!(on.set_topic, "light/jsonBulb/on/set");

        let brightness = device.get_feature("brightness").unwrap();
        assert_eq!(brightness.min, Some(0));
        assert_eq!(brightness.max, Some(10));
        assert_eq!(brightness.step, Some(1));

        let color = device.get_feature("colorTemperature").unwrap();
        assert_eq!(color.get_topic, "light/jsonBulb/color/get");
        assert_eq!(color.set_topic, "light/jsonBulb/color/set");
    }

    #[test]
    fn test_malformed_metadata_leaves_device_untouched() {
        let mut device = Device::from_json(JSON_BULB).unwrap();
        let before = device.clone();

        let bad_payloads: [&[u8]; 3] = [
            b"not json",
            br#"{"feature": []}"#,
            br#"{"feature": {"on": {"min": "x"}}}"#,
        ];
        for bad in bad_payloads {
            let err = device.apply_metadata(bad).unwrap_err();
            assert!(matches!(err, DeviceError::MalformedMetadata(_)));
        }
        assert_eq!(device, before);
    }

    #[test]
    fn test_reapply_replaces_features() {
        let mut device = Device::new("light/jsonBulb");
        device.apply_metadata(JSON_BULB).unwrap();
        device.apply_metadata(br#"{"name": "renamed", "feature": {"on": {}}}"#).unwrap();

        assert_eq!(device.name, "renamed");
        assert_eq!(device.features().len(), 1);
        assert!(device.last_will_id.is_none());
        assert!(!device.has_feature("brightness"));
    }

    #[test]
    fn test_device_topic_wins_over_payload() {
        let mut device = Device::new("room/light");
        device.apply_metadata(br#"{"topic": "other", "feature": {"on": {}}}"#).unwrap();
        assert_eq!(device.topic, "room/light");
        assert_eq!(device.get_feature("on").unwrap().get_topic, "room/light/on/get");
    }

    #[test]
    fn test_get_missing_feature() {
        let device = attached_device();
        let err = device.get_feature("brightness").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_remove_feature() {
        let mut device = attached_device();
        let removed = device.remove_feature("on").unwrap();
        assert!(!removed.is_attached());
        assert!(!device.has_feature("on"));
        assert!(device.remove_feature("on").unwrap_err().is_not_found());
    }

    #[test]
    fn test_detached_feature_operations_fail() {
        let bus = MemoryTransport::with_recording();
        let feature = Feature::default();

        assert!(matches!(feature.set(&bus, "1"), Err(DeviceError::Detached(_))));
        assert!(matches!(feature.update(&bus, "1"), Err(DeviceError::Detached(_))));
        assert!(matches!(feature.on_set(&bus, Arc::new(|_| {})), Err(DeviceError::Detached(_))));
        assert!(matches!(feature.on_update(&bus, Arc::new(|_| {})), Err(DeviceError::Detached(_))));
        assert!(bus.published().is_empty());
    }

    #[test]
    fn test_feature_set_and_update() {
        let bus = MemoryTransport::with_recording();
        let device = attached_device();
        let feature = device.get_feature("on").unwrap();

        feature.set(&bus, "1").unwrap();
        feature.update(&bus, "0").unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "lightbulb/on/set");
        assert_eq!(published[0].payload, b"1");
        assert_eq!(published[0].qos, QOS_AT_LEAST_ONCE);
        assert!(!published[0].retain);
        assert_eq!(published[1].topic, "lightbulb/on/get");
        assert!(published[1].retain);
    }

    #[test]
    fn test_feature_subscriptions() {
        let bus = MemoryTransport::with_recording();
        let device = attached_device();
        let feature = device.get_feature("on").unwrap();

        feature.on_set(&bus, Arc::new(|_| {})).unwrap();
        feature.on_update(&bus, Arc::new(|_| {})).unwrap();
        assert_eq!(bus.subscription_count("lightbulb/on/set"), 1);
        assert_eq!(bus.subscription_count("lightbulb/on/get"), 1);
    }

    #[test]
    fn test_publish_meta() {
        let bus = MemoryTransport::with_recording();
        let device = Device::new("lightbulb/kitchen");
        device.publish_meta(&bus).unwrap();

        let published = bus.published_on("announce/lightbulb/kitchen");
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        let expected = r#"{"topic":"lightbulb/kitchen","name":"","manufacturer":"","model":"","serialNumber":"","type":"","feature":{}}"#;
        assert_eq!(String::from_utf8(published[0].payload.clone()).unwrap(), expected);
    }

    #[test]
    fn test_publish_meta_round_trips_features() {
        let bus = MemoryTransport::with_recording();
        let device = Device::from_json(JSON_BULB).unwrap();
        device.publish_meta(&bus).unwrap();

        let payload = bus.retained("announce/light/jsonBulb").unwrap();
        let decoded = Device::from_json(&payload).unwrap();
        assert_eq!(decoded, device);
    }
}

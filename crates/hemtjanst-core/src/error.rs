//! Error kinds for device and feature operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Malformed device metadata: {0}")]
    MalformedMetadata(#[from] serde_json::Error),
    #[error("Unknown device: {0}")]
    NotFound(String),
    #[error("Device {device} has no feature: {feature}")]
    FeatureNotFound { device: String, feature: String },
    #[error("Feature {0} is not attached to a device, use Device::add_feature")]
    Detached(String),
}

impl DeviceError {
    /// True for both unknown devices and unknown features
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::FeatureNotFound { .. })
    }
}

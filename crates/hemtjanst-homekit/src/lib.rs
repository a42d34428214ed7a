//! Hemtjänst HomeKit - Projects the device registry onto a bridge's accessory model
//!
//! This crate provides:
//! - Stable numeric identities derived from device topics and type codes
//! - The capability table mapping feature names to characteristics
//! - The accessory model and the presentation-layer [`Bridge`] seam
//! - The [`SyncAdapter`], a registry handler keeping accessories in sync

pub mod accessory;
pub mod adapter;
pub mod bridge;
pub mod capability;
pub mod identity;

pub use accessory::{Accessory, AccessoryInfo, Characteristic, Format, Service, Value};
pub use adapter::SyncAdapter;
pub use bridge::{Bridge, MemoryBridge};
pub use capability::{CapabilityDescriptor, ServiceDescriptor};
pub use identity::{topic_to_id, type_to_id};

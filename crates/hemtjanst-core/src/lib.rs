//! Hemtjänst Core - Device model and transport capability set
//!
//! This crate provides the foundational types for the Hemtjänst system:
//! - Devices and features announced over a publish/subscribe transport
//! - Decoding of announce metadata with topic derivation for features
//! - The publish/subscribe capability set consumed by the rest of the system
//! - An in-process transport used for wiring and tests

pub mod device;
pub mod error;
pub mod transport;

pub use device::{Device, Feature};
pub use error::DeviceError;
pub use transport::{Callback, MemoryTransport, Message, PublishSubscriber, Published, QOS_AT_LEAST_ONCE};

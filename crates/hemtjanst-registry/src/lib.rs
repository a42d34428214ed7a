//! Hemtjänst Registry - Live registry of announced devices
//!
//! This crate provides:
//! - The device [`Manager`], which applies announce/leave signals and fans
//!   change events out to registered handlers
//! - The [`Router`], which feeds transport messages into the manager

pub mod manager;
pub mod router;

pub use manager::{DeviceEvent, DeviceHandler, Manager};
pub use router::{Router, RouterConfig};

//! Handheld remote control for a small BLE vehicle.
//!
//! Input modalities are fused into one canonical [`domain::models::VehicleCommand`],
//! which is streamed over a serial-style BLE characteristic while a link
//! supervisor keeps the connection alive.

pub mod app;
pub mod console;
pub mod domain;
pub mod infrastructure;

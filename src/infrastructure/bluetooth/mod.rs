//! Bluetooth Module
//!
//! BLE link to the vehicle's serial-style characteristic.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     LinkSupervisor                      │
//! │   (lifecycle, drop recovery, telemetry and safety)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │   State    │  │ Transport  │  │  Protocol  │
//! │            │  │            │  │            │
//! │ - legal    │  │ - chunk    │  │ - UUIDs    │
//! │   moves    │  │   pacing   │  │ - framing  │
//! │            │  │ - inbound  │  │ - decoding │
//! └────────────┘  └─────┬──────┘  └────────────┘
//!                       │
//!                       ▼
//!              ┌─────────────────┐
//!              │   BleBackend    │
//!              │ (radio access)  │
//!              └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, command frames, chunking and inbound decoding
//! - [`connection`] - Backend trait, handles and link errors
//! - [`state`] - Lifecycle transition table
//! - [`transport`] - Paced chunked writes and notification reassembly
//! - [`service`] - Link supervisor
//! - [`simulated`] - In-process vehicle used by tests and the console

pub mod connection;
pub mod protocol;
pub mod service;
pub mod simulated;
pub mod state;
pub mod transport;

pub use service::LinkSupervisor;

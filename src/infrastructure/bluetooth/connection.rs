//! BLE Connection Capability
//!
//! The radio itself is not ours: scanning, GATT connect, characteristic
//! lookup, notifications and raw writes are consumed through [`BleBackend`].
//! Handles returned by a backend are opaque tokens that are only ever handed
//! back to the same backend.

use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::protocol;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("device discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("device discovery was cancelled")]
    DiscoveryCancelled,
    #[error("GATT connect failed: {0}")]
    ConnectFailed(String),
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),
    #[error("notification subscription failed: {0}")]
    SubscribeFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("link is not connected")]
    NotConnected,
    #[error("backend error: {0}")]
    Backend(String),
}

/// A device picked during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub id: String,
    pub name: String,
}

/// A live GATT connection to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub device_id: String,
    /// Distinguishes successive connections to the same device.
    pub session: u64,
}

/// The write/notify characteristic on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHandle {
    pub connection: ConnectionHandle,
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

/// What to look for while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub service_uuid: String,
    pub name_prefix: Option<String>,
}

impl DiscoveryFilter {
    pub fn matches(&self, name: &str, advertised_services: &[String]) -> bool {
        let service_ok = advertised_services
            .iter()
            .any(|uuid| uuid.eq_ignore_ascii_case(&self.service_uuid));
        let name_ok = self
            .name_prefix
            .as_deref()
            .map_or(true, |prefix| name.starts_with(prefix));
        service_ok && name_ok
    }
}

/// Inbound notification payloads.
pub type NotifySink = mpsc::UnboundedSender<Vec<u8>>;

/// Devices that dropped without being asked to.
pub type DropSink = mpsc::UnboundedSender<DeviceHandle>;

/// Wireless primitives consumed by the link layer.
///
/// Each async call is awaited to completion before the next one on the same
/// handle is issued.
#[async_trait]
pub trait BleBackend: Send + Sync + 'static {
    /// Scan (or prompt the user) for one device matching `filter`.
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, LinkError>;

    async fn connect(&self, device: &DeviceHandle) -> Result<ConnectionHandle, LinkError>;

    async fn resolve_endpoint(
        &self,
        connection: &ConnectionHandle,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<EndpointHandle, LinkError>;

    async fn subscribe_notify(
        &self,
        endpoint: &EndpointHandle,
        sink: NotifySink,
    ) -> Result<(), LinkError>;

    async fn unsubscribe_notify(&self, endpoint: &EndpointHandle) -> Result<(), LinkError>;

    /// Write at most one chunk.
    async fn write(&self, endpoint: &EndpointHandle, bytes: &[u8]) -> Result<(), LinkError>;

    /// Register interest in unexpected drops of `device`.
    fn on_unexpected_drop(&self, device: &DeviceHandle, sink: DropSink);

    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<(), LinkError>;

    fn is_connected(&self, connection: &ConnectionHandle) -> bool;
}

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service UUID to look for
    pub service_uuid: String,
    /// Write/notify characteristic UUID
    pub characteristic_uuid: String,
    /// Optional advertised-name filter
    pub name_prefix: Option<String>,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub telemetry_period: Duration,
    pub wire_format: protocol::WireFormat,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID.to_string(),
            characteristic_uuid: protocol::CHARACTERISTIC_UUID.to_string(),
            name_prefix: None,
            chunk_size: protocol::MAX_CHUNK_LEN,
            chunk_delay: Duration::from_millis(protocol::CHUNK_DELAY_MS),
            telemetry_period: Duration::from_millis(100),
            wire_format: protocol::WireFormat::Standard,
        }
    }
}

impl From<&LinkSettings> for ConnectionConfig {
    fn from(s: &LinkSettings) -> Self {
        Self {
            service_uuid: s.service_uuid.clone(),
            characteristic_uuid: s.characteristic_uuid.clone(),
            name_prefix: s.name_prefix.clone(),
            chunk_size: s.chunk_size.clamp(1, protocol::MAX_CHUNK_LEN),
            chunk_delay: Duration::from_millis(s.chunk_delay_ms),
            telemetry_period: Duration::from_millis(s.telemetry_period_ms.max(1)),
            wire_format: protocol::WireFormat::from_legacy_flag(s.legacy_wire_format),
        }
    }
}

impl ConnectionConfig {
    pub fn discovery_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            service_uuid: self.service_uuid.clone(),
            name_prefix: self.name_prefix.clone(),
        }
    }
}

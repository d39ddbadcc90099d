//! In-memory vehicle
//!
//! A [`BleBackend`] that stands in for a real radio. It keeps a log of every
//! call, reassembles written chunks the way the vehicle would, and lets the
//! caller inject drops, failures and inbound notifications. The headless
//! binary drives it interactively; tests use it to observe ordering.

use crate::infrastructure::bluetooth::connection::{
    BleBackend, ConnectionHandle, DeviceHandle, DiscoveryFilter, DropSink, EndpointHandle,
    LinkError, NotifySink,
};
use crate::infrastructure::bluetooth::protocol::{self, FrameDecoder};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Discover,
    Connect(String),
    ResolveEndpoint,
    Subscribe,
    Unsubscribe,
    Write(Vec<u8>),
    Disconnect,
}

impl BackendCall {
    fn kind(&self) -> FailPoint {
        match self {
            Self::Discover => FailPoint::Discover,
            Self::Connect(_) => FailPoint::Connect,
            Self::ResolveEndpoint => FailPoint::ResolveEndpoint,
            Self::Subscribe => FailPoint::Subscribe,
            Self::Unsubscribe => FailPoint::Unsubscribe,
            Self::Write(_) => FailPoint::Write,
            Self::Disconnect => FailPoint::Disconnect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Discover,
    Connect,
    ResolveEndpoint,
    Subscribe,
    Unsubscribe,
    Write,
    Disconnect,
}

/// How much history each recorder keeps before the oldest entries go.
pub const HISTORY_LIMIT: usize = 512;

type CallProbe = Box<dyn Fn(&BackendCall) + Send + Sync>;

struct Advertised {
    handle: DeviceHandle,
    services: Vec<String>,
}

#[derive(Default)]
struct SimState {
    devices: Vec<Advertised>,
    calls: VecDeque<BackendCall>,
    writes: VecDeque<(Instant, Vec<u8>)>,
    failures: HashMap<FailPoint, u32>,
    connection: Option<ConnectionHandle>,
    notify: Option<NotifySink>,
    drop_sinks: Vec<(String, DropSink)>,
    sessions: u64,
    decoder: FrameDecoder,
    frames: VecDeque<String>,
    echo_unknown: bool,
}

pub struct SimulatedVehicle {
    state: Mutex<SimState>,
    probe: Mutex<Option<CallProbe>>,
}

impl Default for SimulatedVehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVehicle {
    /// One vehicle named `RC-Sim` advertising the default UART service.
    pub fn new() -> Self {
        let sim = Self::empty();
        sim.add_device("sim-01", "RC-Sim", &[protocol::SERVICE_UUID]);
        sim
    }

    /// Nothing in range.
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            probe: Mutex::new(None),
        }
    }

    pub fn add_device(&self, id: &str, name: &str, services: &[&str]) {
        self.lock().devices.push(Advertised {
            handle: DeviceHandle {
                id: id.to_string(),
                name: name.to_string(),
            },
            services: services.iter().map(|s| s.to_string()).collect(),
        });
    }

    /// Reply `echo: <frame>` to frames that do not look like drive commands.
    pub fn set_echo_unknown(&self, enabled: bool) {
        self.lock().echo_unknown = enabled;
    }

    /// Fail the next `times` calls of this kind.
    pub fn fail_next(&self, point: FailPoint, times: u32) {
        self.lock().failures.insert(point, times);
    }

    /// Observe every call as it is made, before it takes effect.
    pub fn set_probe<F>(&self, probe: F)
    where
        F: Fn(&BackendCall) + Send + Sync + 'static,
    {
        *self.probe.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(probe));
    }

    /// The radio link vanishes without anyone asking for it.
    pub fn simulate_drop(&self) -> bool {
        let mut state = self.lock();
        let Some(connection) = state.connection.take() else {
            return false;
        };
        state.notify = None;
        info!("Simulated drop of {}", connection.device_id);

        let device = state
            .devices
            .iter()
            .find(|d| d.handle.id == connection.device_id)
            .map(|d| d.handle.clone());
        if let Some(device) = device {
            state
                .drop_sinks
                .retain(|(id, sink)| id != &device.id || sink.send(device.clone()).is_ok());
        }
        true
    }

    /// Push bytes to whoever subscribed to notifications.
    pub fn inject_notification(&self, bytes: &[u8]) -> bool {
        match &self.lock().notify {
            Some(sink) => sink.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.iter().cloned().collect()
    }

    pub fn count(&self, point: FailPoint) -> usize {
        self.lock().calls.iter().filter(|c| c.kind() == point).count()
    }

    /// Every chunk written, with the instant it arrived.
    pub fn writes(&self) -> Vec<(Instant, Vec<u8>)> {
        self.lock().writes.iter().cloned().collect()
    }

    /// Complete frames as the vehicle reassembled them.
    pub fn frames(&self) -> Vec<String> {
        self.lock().frames.iter().cloned().collect()
    }

    pub fn drop_listener_count(&self) -> usize {
        self.lock().drop_sinks.len()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and consume a pending failure for it, if any.
    fn enter(&self, call: BackendCall) -> Result<(), ()> {
        if let Some(probe) = self
            .probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            probe(&call);
        }

        let mut state = self.lock();
        let point = call.kind();
        record(&mut state.calls, call);
        match state.failures.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(())
            }
            _ => Ok(()),
        }
    }
}

fn looks_like_command(frame: &str) -> bool {
    let fields: Vec<&str> = frame.split(';').collect();
    (2..=3).contains(&fields.len()) && fields.iter().all(|f| f.parse::<i32>().is_ok())
}

#[async_trait]
impl BleBackend for SimulatedVehicle {
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle, LinkError> {
        if self.enter(BackendCall::Discover).is_err() {
            return Err(LinkError::DiscoveryCancelled);
        }
        let state = self.lock();
        state
            .devices
            .iter()
            .find(|d| filter.matches(&d.handle.name, &d.services))
            .map(|d| d.handle.clone())
            .ok_or_else(|| LinkError::DiscoveryFailed("no matching device in range".into()))
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<ConnectionHandle, LinkError> {
        if self.enter(BackendCall::Connect(device.id.clone())).is_err() {
            return Err(LinkError::ConnectFailed(format!("{} did not answer", device.name)));
        }
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d.handle.id == device.id) {
            return Err(LinkError::ConnectFailed(format!("unknown device {}", device.id)));
        }
        state.sessions += 1;
        let connection = ConnectionHandle {
            device_id: device.id.clone(),
            session: state.sessions,
        };
        state.connection = Some(connection.clone());
        state.decoder.clear();
        debug!("Simulated GATT connect {:?}", connection);
        Ok(connection)
    }

    async fn resolve_endpoint(
        &self,
        connection: &ConnectionHandle,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<EndpointHandle, LinkError> {
        if self.enter(BackendCall::ResolveEndpoint).is_err() {
            return Err(LinkError::EndpointNotFound(characteristic_uuid.to_string()));
        }
        let state = self.lock();
        if state.connection.as_ref() != Some(connection) {
            return Err(LinkError::NotConnected);
        }
        let offers_service = state
            .devices
            .iter()
            .filter(|d| d.handle.id == connection.device_id)
            .flat_map(|d| d.services.iter())
            .any(|s| s.eq_ignore_ascii_case(service_uuid));
        if !offers_service {
            return Err(LinkError::EndpointNotFound(service_uuid.to_string()));
        }
        Ok(EndpointHandle {
            connection: connection.clone(),
            service_uuid: service_uuid.to_string(),
            characteristic_uuid: characteristic_uuid.to_string(),
        })
    }

    async fn subscribe_notify(
        &self,
        endpoint: &EndpointHandle,
        sink: NotifySink,
    ) -> Result<(), LinkError> {
        if self.enter(BackendCall::Subscribe).is_err() {
            return Err(LinkError::SubscribeFailed("CCCD write rejected".into()));
        }
        let mut state = self.lock();
        if state.connection.as_ref() != Some(&endpoint.connection) {
            return Err(LinkError::NotConnected);
        }
        state.notify = Some(sink);
        Ok(())
    }

    async fn unsubscribe_notify(&self, _endpoint: &EndpointHandle) -> Result<(), LinkError> {
        if self.enter(BackendCall::Unsubscribe).is_err() {
            return Err(LinkError::Backend("unsubscribe rejected".into()));
        }
        self.lock().notify = None;
        Ok(())
    }

    async fn write(&self, endpoint: &EndpointHandle, bytes: &[u8]) -> Result<(), LinkError> {
        if self.enter(BackendCall::Write(bytes.to_vec())).is_err() {
            return Err(LinkError::WriteFailed("GATT operation failed".into()));
        }
        let mut state = self.lock();
        if state.connection.as_ref() != Some(&endpoint.connection) {
            return Err(LinkError::NotConnected);
        }
        if bytes.len() > protocol::MAX_CHUNK_LEN {
            return Err(LinkError::WriteFailed(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                protocol::MAX_CHUNK_LEN
            )));
        }

        record(&mut state.writes, (Instant::now(), bytes.to_vec()));
        let frames = state.decoder.push_bytes(bytes);
        for frame in frames {
            if state.echo_unknown && !looks_like_command(&frame) {
                if let Some(sink) = &state.notify {
                    let _ = sink.send(protocol::frame(&format!("echo: {}", frame)).into_bytes());
                }
            }
            record(&mut state.frames, frame);
        }
        Ok(())
    }

    fn on_unexpected_drop(&self, device: &DeviceHandle, sink: DropSink) {
        self.lock().drop_sinks.push((device.id.clone(), sink));
    }

    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<(), LinkError> {
        if self.enter(BackendCall::Disconnect).is_err() {
            return Err(LinkError::Backend("disconnect rejected".into()));
        }
        let mut state = self.lock();
        if state.connection.as_ref() == Some(connection) {
            state.connection = None;
            state.notify = None;
        }
        Ok(())
    }

    fn is_connected(&self, connection: &ConnectionHandle) -> bool {
        self.lock().connection.as_ref() == Some(connection)
    }
}

fn record<T>(history: &mut VecDeque<T>, item: T) {
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(item);
}

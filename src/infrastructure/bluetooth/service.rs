//! Link Supervisor
//!
//! Drives the link lifecycle: discovery, GATT connect, endpoint resolution,
//! notification subscription, drop recovery and teardown. Every state change
//! goes through [`state::transition`]; this type only performs the side
//! effects that belong to each move.

use crate::domain::command::CommandHandle;
use crate::domain::log_book::SessionLog;
use crate::domain::models::{AppEvent, LinkState};
use crate::infrastructure::bluetooth::connection::{
    BleBackend, ConnectionConfig, ConnectionHandle, DeviceHandle, DropSink, LinkError,
};
use crate::infrastructure::bluetooth::state::{self, LinkEvent};
use crate::infrastructure::bluetooth::transport::{FrameSink, LinkTransport};
use crate::infrastructure::safety::{SafetySupervisor, SafetyTrigger};
use crate::infrastructure::telemetry::TelemetryTransmitter;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct LinkSupervisor<B: BleBackend> {
    backend: Arc<B>,
    transport: Arc<LinkTransport<B>>,
    transmitter: TelemetryTransmitter,
    safety: SafetySupervisor,
    config: ConnectionConfig,
    state: watch::Sender<LinkState>,
    log: SessionLog,
    device: Option<DeviceHandle>,
    connection: Option<ConnectionHandle>,
    drop_listener: Option<String>,
    drop_tx: DropSink,
    inbound_pump: Option<JoinHandle<()>>,
}

impl<B: BleBackend> LinkSupervisor<B> {
    /// Build a supervisor. The returned receiver yields devices that dropped
    /// unexpectedly; feed them back through [`Self::handle_unexpected_drop`].
    pub fn new(
        backend: Arc<B>,
        config: ConnectionConfig,
        command: CommandHandle,
        log: SessionLog,
    ) -> (Self, mpsc::UnboundedReceiver<DeviceHandle>) {
        let transport = Arc::new(LinkTransport::new(Arc::clone(&backend), &config, log.clone()));
        let sink: Arc<dyn FrameSink> = transport.clone();

        let transmitter = TelemetryTransmitter::new(
            Arc::clone(&sink),
            command.clone(),
            config.telemetry_period,
            config.wire_format,
        );
        let safety = SafetySupervisor::new(command, sink, config.wire_format, log.clone());
        let (state, _) = watch::channel(LinkState::Idle);
        let (drop_tx, drop_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            backend,
            transport,
            transmitter,
            safety,
            config,
            state,
            log,
            device: None,
            connection: None,
            drop_listener: None,
            drop_tx,
            inbound_pump: None,
        };
        (supervisor, drop_rx)
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn transport(&self) -> &Arc<LinkTransport<B>> {
        &self.transport
    }

    pub fn safety(&self) -> &SafetySupervisor {
        &self.safety
    }

    pub fn cached_device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    /// Reuse a device remembered from an earlier session; the next connect
    /// skips discovery.
    pub fn seed_device(&mut self, device: DeviceHandle) {
        if self.device.is_none() {
            debug!("Seeded cached device {}", device.id);
            self.device = Some(device);
        }
    }

    /// Drop the cached device so the next connect rediscovers.
    pub fn forget_device(&mut self) -> bool {
        if matches!(self.state(), LinkState::Idle | LinkState::Disconnected) {
            self.device = None;
            true
        } else {
            false
        }
    }

    pub fn telemetry_running(&self) -> bool {
        self.transmitter.is_running()
    }

    pub async fn connect(&mut self) -> Result<(), LinkError> {
        let current = self.state();
        if current == LinkState::Connected {
            if self.link_is_healthy() {
                debug!("Already connected, nothing to do");
                return Ok(());
            }
            warn!("Connected state without a live link, recovering");
            if let Some(device) = self.device.clone() {
                self.handle_unexpected_drop(device).await;
            }
            return match self.state() {
                LinkState::Connected => Ok(()),
                _ => Err(LinkError::NotConnected),
            };
        }

        let cached = self.device.clone();
        let request = LinkEvent::ConnectRequested {
            cached_device: cached.is_some(),
        };
        if state::transition(current, request).is_none() {
            return Err(LinkError::Backend(format!("cannot connect while {}", current)));
        }
        self.apply(request);

        let device = match cached {
            Some(device) => device,
            None => self.discover().await?,
        };
        self.ensure_drop_listener(&device);

        self.log.plain(format!("Connecting to {}...", device.name));
        let connection = match self.backend.connect(&device).await {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail_connect(e).await),
        };
        self.connection = Some(connection.clone());
        self.apply(LinkEvent::GattConnected);

        if let Err(e) = self.open_endpoint(&connection).await {
            return Err(self.fail_connect(e).await);
        }
        self.apply(LinkEvent::EndpointReady);
        self.transmitter.start();
        self.log.plain(format!("Connected to {}", device.name));
        Ok(())
    }

    /// React to the radio reporting that `device` went away on its own.
    pub async fn handle_unexpected_drop(&mut self, device: DeviceHandle) {
        if self.device.as_ref().map(|d| &d.id) != Some(&device.id) {
            debug!("Ignoring drop of unrelated device {}", device.id);
            return;
        }
        if state::transition(self.state(), LinkEvent::UnexpectedDrop).is_none() {
            debug!("Ignoring drop while {}", self.state());
            return;
        }
        if self.link_is_healthy() {
            debug!("Ignoring stale drop of {}, link is up", device.id);
            return;
        }

        self.apply(LinkEvent::UnexpectedDrop);
        self.safety.force_neutral(SafetyTrigger::UnexpectedDrop);
        self.transmitter.stop();
        self.stop_inbound_pump();
        self.transport.detach();
        self.connection = None;
        self.log.plain("Connection lost, reconnecting...");

        match self.reestablish(&device).await {
            Ok(()) => {
                self.apply(LinkEvent::Reconnected);
                self.transmitter.start();
                self.log.plain(format!("Reconnected to {}", device.name));
            }
            Err(e) => {
                error!("Reconnect failed: {}", e);
                self.abandon_connection().await;
                self.apply(LinkEvent::ReconnectFailed);
                self.log.plain(format!("Reconnect failed: {}", e));
            }
        }
    }

    /// Orderly teardown. The cached device survives so a later connect can
    /// skip discovery.
    pub async fn disconnect(&mut self) {
        if state::transition(self.state(), LinkEvent::DisconnectRequested).is_none() {
            debug!("Disconnect ignored while {}", self.state());
            return;
        }

        self.transmitter.stop();
        self.safety.neutral_and_flush(SafetyTrigger::Disconnect).await;

        if let Some(endpoint) = self.transport.endpoint() {
            if let Err(e) = self.backend.unsubscribe_notify(&endpoint).await {
                debug!("Unsubscribe failed: {}", e);
            }
        }
        self.stop_inbound_pump();
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.backend.disconnect(&connection).await {
                warn!("GATT disconnect failed: {}", e);
            }
        }
        self.transport.detach();

        self.apply(LinkEvent::DisconnectRequested);
        self.log.plain("Disconnected");
    }

    async fn discover(&mut self) -> Result<DeviceHandle, LinkError> {
        self.log.plain("Scanning for vehicle...");
        match self.backend.discover(&self.config.discovery_filter()).await {
            Ok(device) => {
                info!("Selected device {} ({})", device.name, device.id);
                self.device = Some(device.clone());
                self.apply(LinkEvent::DeviceSelected);
                Ok(device)
            }
            Err(e) => {
                error!("Discovery failed: {}", e);
                self.safety.force_neutral(SafetyTrigger::LinkFailure);
                self.apply(LinkEvent::DiscoveryFailed);
                self.log.plain(format!("Discovery failed: {}", e));
                Err(e)
            }
        }
    }

    async fn reestablish(&mut self, device: &DeviceHandle) -> Result<(), LinkError> {
        let connection = self.backend.connect(device).await?;
        self.connection = Some(connection.clone());
        self.open_endpoint(&connection).await
    }

    /// Resolve the characteristic, subscribe to it and attach the transport.
    async fn open_endpoint(&mut self, connection: &ConnectionHandle) -> Result<(), LinkError> {
        let endpoint = self
            .backend
            .resolve_endpoint(
                connection,
                &self.config.service_uuid,
                &self.config.characteristic_uuid,
            )
            .await?;

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.backend.subscribe_notify(&endpoint, notify_tx).await?;
        self.transport.attach(endpoint);

        self.stop_inbound_pump();
        let transport = Arc::clone(&self.transport);
        self.inbound_pump = Some(tokio::spawn(async move {
            while let Some(bytes) = notify_rx.recv().await {
                transport.on_incoming(&bytes);
            }
        }));
        Ok(())
    }

    async fn fail_connect(&mut self, e: LinkError) -> LinkError {
        error!("Connection failed: {}", e);
        self.safety.force_neutral(SafetyTrigger::LinkFailure);
        self.abandon_connection().await;
        self.apply(LinkEvent::Failed);
        self.log.plain(format!("Connection failed: {}", e));
        e
    }

    /// Best-effort cleanup of a half-open connection.
    async fn abandon_connection(&mut self) {
        self.stop_inbound_pump();
        self.transport.detach();
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.backend.disconnect(&connection).await {
                debug!("Cleanup disconnect failed: {}", e);
            }
        }
    }

    fn link_is_healthy(&self) -> bool {
        self.transport.is_connected()
            && self
                .connection
                .as_ref()
                .is_some_and(|c| self.backend.is_connected(c))
    }

    fn ensure_drop_listener(&mut self, device: &DeviceHandle) {
        if self.drop_listener.as_deref() == Some(device.id.as_str()) {
            return;
        }
        self.backend.on_unexpected_drop(device, self.drop_tx.clone());
        self.drop_listener = Some(device.id.clone());
    }

    fn stop_inbound_pump(&mut self) {
        if let Some(pump) = self.inbound_pump.take() {
            pump.abort();
        }
    }

    fn apply(&mut self, event: LinkEvent) {
        let from = self.state();
        match state::transition(from, event) {
            Some(to) => {
                info!("Link {} -> {} ({:?})", from, to, event);
                self.state.send_replace(to);
                self.log.emit(AppEvent::LinkState(to));
            }
            None => warn!("Ignoring {:?} while {}", event, from),
        }
    }
}

impl<B: BleBackend> Drop for LinkSupervisor<B> {
    fn drop(&mut self) {
        self.stop_inbound_pump();
        self.transport.cancel_pending();
    }
}

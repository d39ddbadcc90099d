//! Control session
//!
//! The single event loop of the controller. User commands, animation frames
//! and link drop notifications are handled one at a time on the same task, so
//! the canonical command only ever has one writer at a time.

use crate::domain::command::CommandHandle;
use crate::domain::fusion::FusionEngine;
use crate::domain::input::{GamepadSnapshot, SteerKey};
use crate::domain::log_book::{SessionLog, DEFAULT_LOG_CAPACITY};
use crate::domain::models::{
    AppEvent, Capabilities, InputModality, LinkState, MessageSeverity, StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::connection::{BleBackend, ConnectionConfig, DeviceHandle};
use crate::infrastructure::bluetooth::LinkSupervisor;
use crate::infrastructure::safety::SafetyTrigger;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Connect,
    Disconnect,
    ForgetDevice,
    SelectMode(InputModality),
    SteerPress(SteerKey),
    SteerRelease(SteerKey),
    CenterSteering,
    /// Signed percent, positive forward
    Throttle(i32),
    JoystickMove { dx: f64, dy: f64 },
    JoystickRelease,
    Tilt(f64),
    TiltSourceLost,
    TiltSourceRestored,
    /// Latest controller state, `None` once it is unplugged
    Gamepad(Option<GamepadSnapshot>),
    Stop,
    SendText(String),
    Shutdown,
}

pub struct ControlSession<B: BleBackend> {
    settings: Arc<Mutex<SettingsService>>,
    fusion: FusionEngine,
    supervisor: LinkSupervisor<B>,
    drops: mpsc::UnboundedReceiver<DeviceHandle>,
    command: CommandHandle,
    log: SessionLog,
    gamepad: Option<GamepadSnapshot>,
    frame_interval: Duration,
}

impl<B: BleBackend> ControlSession<B> {
    pub fn new(
        settings: Arc<Mutex<SettingsService>>,
        backend: Arc<B>,
        capabilities: Capabilities,
        events: Option<mpsc::UnboundedSender<AppEvent>>,
    ) -> Self {
        let (link, input) = {
            let guard = settings.lock().unwrap_or_else(PoisonError::into_inner);
            let s = guard.get();
            (s.link.clone(), s.input.clone())
        };

        let command = CommandHandle::new();
        let log = SessionLog::new(DEFAULT_LOG_CAPACITY, events);
        let fusion = FusionEngine::new(&input, capabilities, command.clone());
        let (mut supervisor, drops) = LinkSupervisor::new(
            backend,
            ConnectionConfig::from(&link),
            command.clone(),
            log.clone(),
        );

        if let Some(id) = link.last_device_id {
            supervisor.seed_device(DeviceHandle {
                name: id.clone(),
                id,
            });
        }

        Self {
            settings,
            fusion,
            supervisor,
            drops,
            command,
            log,
            gamepad: None,
            frame_interval: Duration::from_millis(input.frame_interval_ms.max(1)),
        }
    }

    pub fn command(&self) -> &CommandHandle {
        &self.command
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn link_state(&self) -> LinkState {
        self.supervisor.state()
    }

    pub fn watch_link_state(&self) -> watch::Receiver<LinkState> {
        self.supervisor.watch_state()
    }

    pub fn active_mode(&self) -> InputModality {
        self.fusion.active()
    }

    pub fn supervisor(&self) -> &LinkSupervisor<B> {
        &self.supervisor
    }

    /// Run until `Shutdown` arrives or every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<UserCommand>) {
        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(device) = self.drops.recv() => {
                    self.supervisor.handle_unexpected_drop(device).await;
                }
                now = frames.tick() => {
                    self.on_frame(now.into_std());
                }
            }
        }

        self.shutdown().await;
    }

    /// One animation frame of the cooperative tick source.
    pub fn on_frame(&mut self, now: Instant) {
        if let Some(command) = self.fusion.tick(now, self.gamepad) {
            self.log.emit(AppEvent::Command(command));
        }
    }

    /// Apply one user command. Returns false once the session should end.
    pub async fn handle(&mut self, cmd: UserCommand) -> bool {
        let published = match cmd {
            UserCommand::Connect => {
                self.connect().await;
                None
            }
            UserCommand::Disconnect => {
                self.supervisor.disconnect().await;
                None
            }
            UserCommand::ForgetDevice => {
                if self.supervisor.forget_device() {
                    self.remember_device(None);
                    self.status("Forgot cached device", MessageSeverity::Info);
                } else {
                    self.status("Disconnect before forgetting the device", MessageSeverity::Warning);
                }
                None
            }
            UserCommand::SelectMode(modality) => {
                self.select_mode(modality).await;
                None
            }
            UserCommand::SteerPress(key) => self.fusion.press_steer(key),
            UserCommand::SteerRelease(key) => self.fusion.release_steer(key),
            UserCommand::CenterSteering => self.fusion.center_steering(),
            UserCommand::Throttle(percent) => self.fusion.set_throttle(percent),
            UserCommand::JoystickMove { dx, dy } => self.fusion.joystick_move(dx, dy),
            UserCommand::JoystickRelease => self.fusion.joystick_release(),
            UserCommand::Tilt(raw_deg) => self.fusion.tilt(raw_deg),
            UserCommand::TiltSourceLost => {
                self.source_lost(InputModality::Tilt).await;
                None
            }
            UserCommand::TiltSourceRestored => {
                self.fusion.source_restored(InputModality::Tilt);
                None
            }
            UserCommand::Gamepad(snapshot) => {
                if snapshot.is_none() && self.gamepad.is_some() {
                    self.gamepad = None;
                    self.source_lost(InputModality::Gamepad).await;
                }
                self.gamepad = snapshot;
                None
            }
            UserCommand::Stop => {
                self.halt(SafetyTrigger::ExplicitStop).await;
                None
            }
            UserCommand::SendText(text) => {
                if let Err(e) = self.supervisor.transport().send(&text, true).await {
                    self.status(&format!("Send failed: {}", e), MessageSeverity::Error);
                }
                None
            }
            UserCommand::Shutdown => return false,
        };

        if let Some(command) = published {
            self.log.emit(AppEvent::Command(command));
        }
        true
    }

    async fn connect(&mut self) {
        match self.supervisor.connect().await {
            Ok(()) => {
                let id = self.supervisor.cached_device().map(|d| d.id.clone());
                self.remember_device(id);
                self.status("Connected", MessageSeverity::Success);
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.status(&format!("Connection failed: {}", e), MessageSeverity::Error);
            }
        }
    }

    async fn select_mode(&mut self, modality: InputModality) {
        match self.fusion.select(modality) {
            Ok(true) => {
                self.halt(SafetyTrigger::ModeSwitch).await;
                self.status(&format!("Input mode: {}", modality), MessageSeverity::Info);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("{}", e);
                self.status(&e.to_string(), MessageSeverity::Warning);
            }
        }
    }

    /// Neutral while the link stays up. Chunks still queued from earlier
    /// frames are dropped so nothing trails the neutral frame.
    async fn halt(&self, trigger: SafetyTrigger) {
        let cancelled = self.supervisor.transport().cancel_pending();
        if cancelled > 0 {
            debug!("Dropped {} queued chunk(s) on {}", cancelled, trigger);
        }
        self.supervisor.safety().neutral_and_flush(trigger).await;
    }

    async fn source_lost(&mut self, modality: InputModality) {
        if self.fusion.source_lost(modality) {
            self.supervisor
                .safety()
                .neutral_and_flush(SafetyTrigger::InputSourceLost)
                .await;
            self.status(&format!("{} input lost", modality), MessageSeverity::Warning);
        }
    }

    fn remember_device(&self, id: Option<String>) {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = settings.remember_device(id) {
            warn!("Could not persist device choice: {}", e);
        }
    }

    fn status(&self, message: &str, severity: MessageSeverity) {
        self.log.emit(AppEvent::Status(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }

    async fn shutdown(&mut self) {
        info!("Session ending");
        self.supervisor.disconnect().await;
        self.supervisor.safety().force_neutral(SafetyTrigger::Disconnect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Direction, LogDirection, VehicleCommand};
    use crate::domain::settings::Settings;
    use crate::infrastructure::bluetooth::simulated::{FailPoint, SimulatedVehicle};

    fn session_with(
        settings: Settings,
        capabilities: Capabilities,
    ) -> (
        Arc<SimulatedVehicle>,
        ControlSession<SimulatedVehicle>,
        Arc<Mutex<SettingsService>>,
        mpsc::UnboundedReceiver<AppEvent>,
    ) {
        let sim = Arc::new(SimulatedVehicle::new());
        let settings = Arc::new(Mutex::new(SettingsService::in_memory(settings)));
        let (tx, rx) = mpsc::unbounded_channel();
        let session =
            ControlSession::new(Arc::clone(&settings), Arc::clone(&sim), capabilities, Some(tx));
        (sim, session, settings, rx)
    }

    fn session() -> (Arc<SimulatedVehicle>, ControlSession<SimulatedVehicle>) {
        let (sim, session, _, _) = session_with(Settings::default(), Capabilities::default());
        (sim, session)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_remembers_the_device() {
        let (_sim, mut session, settings, _events) =
            session_with(Settings::default(), Capabilities::default());
        session.handle(UserCommand::Connect).await;

        assert_eq!(session.link_state(), LinkState::Connected);
        let remembered = settings.lock().unwrap().get().link.last_device_id.clone();
        assert_eq!(remembered.as_deref(), Some("sim-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn remembered_device_skips_discovery() {
        let mut settings = Settings::default();
        settings.link.last_device_id = Some("sim-01".into());
        let (sim, mut session, _, _) = session_with(settings, Capabilities::default());

        session.handle(UserCommand::Connect).await;
        assert_eq!(session.link_state(), LinkState::Connected);
        assert_eq!(sim.count(FailPoint::Discover), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_switch_forces_neutral_and_tells_the_vehicle() {
        let (sim, mut session) = session();
        session.handle(UserCommand::Connect).await;
        session.handle(UserCommand::Throttle(60)).await;
        assert_eq!(session.command().current().direction, Direction::Forward);

        let writes_before = sim.writes().len();
        session
            .handle(UserCommand::SelectMode(InputModality::Joystick))
            .await;

        assert!(session.command().current().is_neutral());
        assert_eq!(session.active_mode(), InputModality::Joystick);
        let writes = sim.writes();
        assert!(writes.len() > writes_before);
        assert_eq!(writes.last().unwrap().1, b"90;0;0\n".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_mode_is_refused_with_a_status() {
        let caps = Capabilities {
            tilt: false,
            gamepad: true,
        };
        let (_sim, mut session, _, mut events) = session_with(Settings::default(), caps);
        session.handle(UserCommand::SelectMode(InputModality::Tilt)).await;

        assert_eq!(session.active_mode(), InputModality::Buttons);
        let mut saw_warning = false;
        while let Ok(event) = events.try_recv() {
            if let AppEvent::Status(status) = event {
                saw_warning |= status.severity == MessageSeverity::Warning;
            }
        }
        assert!(saw_warning);
    }

    #[tokio::test(start_paused = true)]
    async fn unplugging_the_active_gamepad_stops_the_vehicle() {
        let (_sim, mut session) = session();
        session.handle(UserCommand::SelectMode(InputModality::Gamepad)).await;
        session
            .handle(UserCommand::Gamepad(Some(GamepadSnapshot {
                left_x: 0.0,
                left_trigger: 0.0,
                right_trigger: 0.9,
            })))
            .await;
        session.on_frame(Instant::now());
        assert_eq!(session.command().current().throttle_percent, 90);

        session.handle(UserCommand::Gamepad(None)).await;
        assert!(session.command().current().is_neutral());

        session.on_frame(Instant::now());
        assert!(session.command().current().is_neutral());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_tilt_source_stops_the_vehicle() {
        let (_sim, mut session) = session();
        session.handle(UserCommand::SelectMode(InputModality::Tilt)).await;
        session.handle(UserCommand::Throttle(-50)).await;
        assert_eq!(session.command().current().direction, Direction::Backward);

        session.handle(UserCommand::TiltSourceLost).await;
        assert!(session.command().current().is_neutral());

        session.handle(UserCommand::Throttle(60)).await;
        for _ in 0..30 {
            session.handle(UserCommand::Tilt(40.0)).await;
        }
        assert!(session.command().current().is_neutral());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_is_neutral_without_disconnecting() {
        let (_sim, mut session) = session();
        session.handle(UserCommand::Connect).await;
        session
            .handle(UserCommand::SelectMode(InputModality::Joystick))
            .await;
        session
            .handle(UserCommand::JoystickMove { dx: 30.0, dy: -60.0 })
            .await;
        assert!(!session.command().current().is_neutral());

        session.handle(UserCommand::Stop).await;
        assert_eq!(session.command().current(), VehicleCommand::NEUTRAL);
        assert_eq!(session.link_state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn user_text_is_logged_and_chunked() {
        let (sim, mut session) = session();
        session.handle(UserCommand::Connect).await;
        let start = tokio::time::Instant::now();
        session
            .handle(UserCommand::SendText("light on; horn 3 times please".into()))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Telemetry frames may land between the two chunks.
        let writes = sim.writes();
        let at = |bytes: &[u8]| {
            writes
                .iter()
                .find(|(_, written)| written.as_slice() == bytes)
                .map(|(when, _)| *when - start)
        };
        assert_eq!(at(b"light on; horn 3 tim"), Some(Duration::ZERO));
        assert_eq!(at(b"es please\n"), Some(Duration::from_millis(100)));

        assert!(session
            .log()
            .snapshot()
            .iter()
            .any(|e| e.text == "light on; horn 3 times please" && e.direction == LogDirection::Out));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_chunks_still_queued() {
        let (sim, mut session) = session();
        session.handle(UserCommand::Connect).await;
        session
            .handle(UserCommand::SendText("light on; horn 3 times please".into()))
            .await;
        session.handle(UserCommand::Stop).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!sim.writes().iter().any(|(_, w)| w.as_slice() == b"es please\n"));
        assert!(session.command().current().is_neutral());
    }

    #[tokio::test(start_paused = true)]
    async fn mode_switch_drops_chunks_still_queued() {
        let (sim, mut session) = session();
        session.handle(UserCommand::Connect).await;
        session
            .handle(UserCommand::SendText("light on; horn 3 times please".into()))
            .await;
        session
            .handle(UserCommand::SelectMode(InputModality::Joystick))
            .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!sim.writes().iter().any(|(_, w)| w.as_slice() == b"es please\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_recovers_from_drop_and_shuts_down_cleanly() {
        let (sim, session) = session();
        let command = session.command().clone();
        let mut link = session.watch_link_state();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session.run(rx));

        tx.send(UserCommand::Connect).unwrap();
        tx.send(UserCommand::Throttle(40)).unwrap();
        tx.send(UserCommand::SteerPress(SteerKey::Right)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*link.borrow_and_update(), LinkState::Connected);
        assert!(command.current().steering_angle_deg > 90);

        sim.simulate_drop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*link.borrow_and_update(), LinkState::Connected);
        assert_eq!(sim.count(FailPoint::Connect), 2);
        assert_eq!(command.current().throttle_percent, 0);

        tx.send(UserCommand::Shutdown).unwrap();
        task.await.unwrap();
        assert_eq!(*link.borrow(), LinkState::Disconnected);
        assert!(command.current().is_neutral());
        assert_eq!(sim.frames().last().map(String::as_str), Some("90;0;0"));
    }
}

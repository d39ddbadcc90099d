//! Input Fusion Engine
//!
//! Owns one adapter per modality and publishes the active adapter's sample
//! into the shared [`CommandHandle`]. Inputs for inactive modalities are
//! dropped so a background source can never steer the vehicle.

use crate::domain::command::CommandHandle;
use crate::domain::input::{
    ButtonAdapter, GamepadAdapter, GamepadSnapshot, JoystickAdapter, SteerKey, TiltAdapter,
};
use crate::domain::models::{Capabilities, InputModality, InputSample, VehicleCommand};
use crate::domain::settings::InputSettings;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} input is not available on this device")]
pub struct ModalityUnavailable(pub InputModality);

pub struct FusionEngine {
    active: InputModality,
    capabilities: Capabilities,
    buttons: ButtonAdapter,
    joystick: JoystickAdapter,
    tilt: TiltAdapter,
    gamepad: GamepadAdapter,
    command: CommandHandle,
    seen_resets: u64,
}

impl FusionEngine {
    pub fn new(settings: &InputSettings, capabilities: Capabilities, command: CommandHandle) -> Self {
        let active = if capabilities.supports(settings.default_modality) {
            settings.default_modality
        } else {
            InputModality::Buttons
        };
        let seen_resets = command.resets();

        Self {
            active,
            capabilities,
            buttons: ButtonAdapter::new(settings.button_step_deg),
            joystick: JoystickAdapter::new(settings.joystick_max_radius, settings.joystick_deadzone),
            tilt: TiltAdapter::new(settings.tilt_smoothing, settings.tilt_max_deg),
            gamepad: GamepadAdapter::new(
                settings.gamepad_deadzone,
                settings.gamepad_max_rate_deg_per_s,
                settings.trigger_epsilon,
            ),
            command,
            seen_resets,
        }
    }

    pub fn active(&self) -> InputModality {
        self.active
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn command(&self) -> &CommandHandle {
        &self.command
    }

    /// Switch the live modality. Every adapter starts over from rest.
    ///
    /// Returns `Ok(false)` when the modality was already active. The caller is
    /// responsible for the safety reset that accompanies a real switch.
    pub fn select(&mut self, modality: InputModality) -> Result<bool, ModalityUnavailable> {
        if !self.capabilities.supports(modality) {
            return Err(ModalityUnavailable(modality));
        }
        if modality == self.active {
            return Ok(false);
        }
        info!("Input modality {} -> {}", self.active, modality);
        self.active = modality;
        self.reset_adapters();
        Ok(true)
    }

    /// A tilt or gamepad source went away. Returns true if it was the live one.
    pub fn source_lost(&mut self, modality: InputModality) -> bool {
        match modality {
            InputModality::Tilt => {
                self.capabilities.tilt = false;
                self.tilt.reset();
            }
            InputModality::Gamepad => self.gamepad.reset(),
            InputModality::Buttons | InputModality::Joystick => {}
        }
        modality == self.active
    }

    pub fn source_restored(&mut self, modality: InputModality) {
        if modality == InputModality::Tilt {
            self.capabilities.tilt = true;
        }
    }

    pub fn press_steer(&mut self, key: SteerKey) -> Option<VehicleCommand> {
        self.with_active(InputModality::Buttons, |engine| {
            engine.buttons.press(key);
            engine.buttons.sample()
        })
    }

    pub fn release_steer(&mut self, key: SteerKey) -> Option<VehicleCommand> {
        self.with_active(InputModality::Buttons, |engine| {
            engine.buttons.release(key);
            engine.buttons.sample()
        })
    }

    pub fn center_steering(&mut self) -> Option<VehicleCommand> {
        self.with_active(InputModality::Buttons, |engine| {
            engine.buttons.center();
            engine.buttons.sample()
        })
    }

    /// Discrete throttle control shared by the button and tilt layouts.
    pub fn set_throttle(&mut self, percent: i32) -> Option<VehicleCommand> {
        match self.active {
            InputModality::Buttons => self.with_active(InputModality::Buttons, |engine| {
                engine.buttons.set_throttle(percent);
                engine.buttons.sample()
            }),
            InputModality::Tilt => self.with_active(InputModality::Tilt, |engine| {
                engine.tilt.set_throttle(percent);
                engine.tilt.sample()
            }),
            other => {
                trace!("Throttle control ignored in {} mode", other);
                None
            }
        }
    }

    pub fn joystick_move(&mut self, dx: f64, dy: f64) -> Option<VehicleCommand> {
        self.with_active(InputModality::Joystick, |engine| engine.joystick.move_to(dx, dy))
    }

    pub fn joystick_release(&mut self) -> Option<VehicleCommand> {
        self.with_active(InputModality::Joystick, |engine| engine.joystick.release())
    }

    pub fn tilt(&mut self, raw_deg: f64) -> Option<VehicleCommand> {
        self.with_active(InputModality::Tilt, |engine| engine.tilt.on_tilt(raw_deg))
    }

    /// One animation frame. Drives held steering buttons and polls the
    /// gamepad when those modalities are live.
    pub fn tick(&mut self, now: Instant, gamepad: Option<GamepadSnapshot>) -> Option<VehicleCommand> {
        match self.active {
            InputModality::Buttons => {
                self.sync_resets();
                if self.buttons.tick() {
                    Some(self.publish(self.buttons.sample()))
                } else {
                    None
                }
            }
            InputModality::Gamepad => {
                let snapshot = gamepad?;
                self.with_active(InputModality::Gamepad, |engine| {
                    engine.gamepad.poll(snapshot, now)
                })
            }
            InputModality::Joystick | InputModality::Tilt => None,
        }
    }

    pub fn gamepad_smoothed_deg(&self) -> f64 {
        self.gamepad.smoothed_deg()
    }

    fn with_active<F>(&mut self, modality: InputModality, update: F) -> Option<VehicleCommand>
    where
        F: FnOnce(&mut Self) -> InputSample,
    {
        if self.active != modality {
            trace!("Dropping {} input while {} is active", modality, self.active);
            return None;
        }
        if !self.capabilities.supports(modality) {
            trace!("Dropping {} input, source unavailable", modality);
            return None;
        }
        self.sync_resets();
        let sample = update(self);
        Some(self.publish(sample))
    }

    /// A safety reset overrides whatever the adapters were holding.
    fn sync_resets(&mut self) {
        let resets = self.command.resets();
        if resets != self.seen_resets {
            debug!("Safety reset observed, clearing adapter state");
            self.seen_resets = resets;
            self.reset_adapters();
        }
    }

    fn reset_adapters(&mut self) {
        self.buttons.reset();
        self.joystick.reset();
        self.tilt.reset();
        self.gamepad.reset();
    }

    fn publish(&mut self, sample: InputSample) -> VehicleCommand {
        let command = VehicleCommand::from_sample(sample);
        if self.command.publish(command) {
            trace!("Command {:?}", command);
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Direction;
    use std::time::Duration;

    fn engine(modality: InputModality) -> FusionEngine {
        let settings = InputSettings {
            default_modality: modality,
            ..Default::default()
        };
        FusionEngine::new(&settings, Capabilities::default(), CommandHandle::new())
    }

    #[test]
    fn joystick_center_and_full_right() {
        let mut fusion = engine(InputModality::Joystick);
        let center = fusion.joystick_move(0.0, 0.0).unwrap();
        assert_eq!(center, VehicleCommand::NEUTRAL);

        let right = fusion.joystick_move(75.0, 0.0).unwrap();
        assert_eq!(right.steering_angle_deg, 180);
        assert_eq!(right.throttle_percent, 0);
        assert_eq!(right.direction, Direction::Brake);
    }

    #[test]
    fn inactive_modality_input_is_dropped() {
        let mut fusion = engine(InputModality::Buttons);
        assert!(fusion.joystick_move(75.0, -75.0).is_none());
        assert!(fusion.tilt(30.0).is_none());
        assert!(fusion.command().current().is_neutral());
    }

    #[test]
    fn held_button_publishes_every_frame() {
        let mut fusion = engine(InputModality::Buttons);
        let now = Instant::now();
        fusion.press_steer(SteerKey::Left);
        fusion.tick(now, None);
        fusion.tick(now, None);
        assert_eq!(fusion.command().current().steering_angle_deg, 82);
    }

    #[test]
    fn switching_modality_resets_adapters() {
        let mut fusion = engine(InputModality::Buttons);
        fusion.set_throttle(60);
        assert_eq!(fusion.select(InputModality::Tilt), Ok(true));
        assert_eq!(fusion.select(InputModality::Tilt), Ok(false));
        assert_eq!(fusion.select(InputModality::Buttons), Ok(true));

        let cmd = fusion.press_steer(SteerKey::Right).unwrap();
        assert_eq!(cmd.throttle_percent, 0);
    }

    #[test]
    fn unavailable_modality_is_refused() {
        let command = CommandHandle::new();
        let caps = Capabilities {
            tilt: false,
            gamepad: true,
        };
        let mut fusion = FusionEngine::new(&InputSettings::default(), caps, command);
        assert_eq!(
            fusion.select(InputModality::Tilt),
            Err(ModalityUnavailable(InputModality::Tilt))
        );
        assert_eq!(fusion.active(), InputModality::Buttons);
    }

    #[test]
    fn lost_tilt_source_disables_tilt_controls() {
        let mut fusion = engine(InputModality::Tilt);
        fusion.set_throttle(60).unwrap();
        assert!(fusion.source_lost(InputModality::Tilt));
        fusion.command().reset_to_neutral();

        assert!(fusion.set_throttle(60).is_none());
        for _ in 0..30 {
            assert!(fusion.tilt(40.0).is_none());
        }
        assert!(fusion.command().current().is_neutral());

        fusion.source_restored(InputModality::Tilt);
        assert!(fusion.set_throttle(60).is_some());
    }

    #[test]
    fn safety_reset_clears_held_throttle() {
        let mut fusion = engine(InputModality::Buttons);
        fusion.set_throttle(70);
        fusion.command().reset_to_neutral();

        let cmd = fusion.press_steer(SteerKey::Right).unwrap();
        assert_eq!(cmd.throttle_percent, 0);
        assert_eq!(cmd.direction, Direction::Brake);
    }

    #[test]
    fn gamepad_tick_without_snapshot_publishes_nothing() {
        let mut fusion = engine(InputModality::Gamepad);
        assert!(fusion.tick(Instant::now(), None).is_none());
    }

    #[test]
    fn zero_throttle_never_carries_a_direction() {
        let mut fusion = engine(InputModality::Buttons);
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        let mut now = Instant::now();

        for _ in 0..5_000 {
            let roll = next();
            let value = (next() % 401) as i32 - 200;
            now += Duration::from_millis(next() % 40);
            match roll % 10 {
                0 => {
                    let modality = InputModality::ALL[(next() % 4) as usize];
                    let _ = fusion.select(modality);
                }
                1 => {
                    fusion.press_steer(if value > 0 { SteerKey::Right } else { SteerKey::Left });
                }
                2 => {
                    fusion.release_steer(SteerKey::Left);
                }
                3 => {
                    fusion.set_throttle(value);
                }
                4 => {
                    fusion.joystick_move(value as f64, (next() % 201) as f64 - 100.0);
                }
                5 => {
                    fusion.joystick_release();
                }
                6 => {
                    fusion.tilt(value as f64);
                }
                7 => {
                    let snapshot = GamepadSnapshot {
                        left_x: value as f64 / 200.0,
                        left_trigger: (next() % 101) as f64 / 100.0,
                        right_trigger: (next() % 101) as f64 / 100.0,
                    };
                    fusion.tick(now, Some(snapshot));
                }
                8 => {
                    fusion.command().reset_to_neutral();
                }
                _ => {
                    fusion.tick(now, None);
                }
            }

            let cmd = fusion.command().current();
            assert!((0..=180).contains(&cmd.steering_angle_deg));
            assert!((0..=100).contains(&cmd.throttle_percent));
            if cmd.throttle_percent == 0 {
                assert_eq!(cmd.direction, Direction::Brake);
            } else {
                assert_ne!(cmd.direction, Direction::Brake);
            }
        }
    }
}

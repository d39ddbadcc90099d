//! Input adapters
//!
//! Each adapter turns one kind of human input into a raw [`InputSample`].
//! None of them publish anything; the fusion engine decides which adapter is
//! live and composes its sample into the canonical command.
//!
//! [`InputSample`]: crate::domain::models::InputSample

pub mod buttons;
pub mod gamepad;
pub mod joystick;
pub mod tilt;

pub use buttons::{ButtonAdapter, SteerKey};
pub use gamepad::{GamepadAdapter, GamepadSnapshot};
pub use joystick::JoystickAdapter;
pub use tilt::TiltAdapter;

/// Clamp a signed throttle request to [-100, 100].
pub(crate) fn clamp_throttle(percent: i32) -> i32 {
    percent.clamp(-100, 100)
}

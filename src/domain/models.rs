use serde::{Deserialize, Serialize};
use std::fmt;

/// Steering angle sent on the wire when the wheels point straight ahead.
pub const STEERING_CENTER_DEG: i32 = 90;
/// Largest steering deflection either side of center.
pub const STEERING_LIMIT_DEG: i32 = 90;
pub const THROTTLE_MAX: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
    Brake,
}

impl Direction {
    /// Wire code for the direction field.
    pub fn code(self) -> i8 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
            Self::Brake => 0,
        }
    }
}

/// Canonical vehicle command, steering expressed in wire range [0, 180].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCommand {
    pub steering_angle_deg: i32,
    pub throttle_percent: i32,
    pub direction: Direction,
}

impl VehicleCommand {
    pub const NEUTRAL: Self = Self {
        steering_angle_deg: STEERING_CENTER_DEG,
        throttle_percent: 0,
        direction: Direction::Brake,
    };

    /// Compose a command from a raw modality sample.
    ///
    /// Steering is clamped to [-90, 90] and shifted into wire range; the
    /// throttle sign picks the direction and its magnitude is clamped to
    /// [0, 100]. Zero throttle always brakes.
    pub fn from_sample(sample: InputSample) -> Self {
        let steering = sample
            .steering_deg
            .clamp(-STEERING_LIMIT_DEG, STEERING_LIMIT_DEG);
        let throttle = sample.throttle_percent.clamp(-THROTTLE_MAX, THROTTLE_MAX);

        let direction = match throttle {
            0 => Direction::Brake,
            t if t > 0 => Direction::Forward,
            _ => Direction::Backward,
        };

        Self {
            steering_angle_deg: steering + STEERING_CENTER_DEG,
            throttle_percent: throttle.abs(),
            direction,
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

impl Default for VehicleCommand {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Per-modality raw sample. Steering in [-90, 90], signed throttle in
/// [-100, 100] where the sign carries the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSample {
    pub steering_deg: i32,
    pub throttle_percent: i32,
}

impl InputSample {
    pub fn new(steering_deg: i32, throttle_percent: i32) -> Self {
        Self {
            steering_deg,
            throttle_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputModality {
    Buttons,
    Joystick,
    Tilt,
    Gamepad,
}

impl InputModality {
    pub const ALL: [InputModality; 4] = [
        InputModality::Buttons,
        InputModality::Joystick,
        InputModality::Tilt,
        InputModality::Gamepad,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "buttons" | "button" | "keys" => Some(Self::Buttons),
            "joystick" | "stick" => Some(Self::Joystick),
            "tilt" | "gyro" => Some(Self::Tilt),
            "gamepad" | "pad" => Some(Self::Gamepad),
            _ => None,
        }
    }
}

impl fmt::Display for InputModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Buttons => "buttons",
            Self::Joystick => "joystick",
            Self::Tilt => "tilt",
            Self::Gamepad => "gamepad",
        };
        f.write_str(name)
    }
}

/// Which optional input sources this front end can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub tilt: bool,
    pub gamepad: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            tilt: true,
            gamepad: true,
        }
    }
}

impl Capabilities {
    pub fn supports(&self, modality: InputModality) -> bool {
        match modality {
            InputModality::Buttons | InputModality::Joystick => true,
            InputModality::Tilt => self.tilt,
            InputModality::Gamepad => self.gamepad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Discovering,
    Connecting,
    ResolvingEndpoint,
    Connected,
    Reconnecting,
    Disconnected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
    In,
    Out,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: u64,
    /// Unix milliseconds
    pub timestamp: i64,
    pub text: String,
    pub direction: LogDirection,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    LinkState(LinkState),
    Command(VehicleCommand),
    Received(String),
    Log(LogEntry),
    Status(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

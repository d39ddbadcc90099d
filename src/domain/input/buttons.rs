use super::clamp_throttle;
use crate::domain::models::{InputSample, STEERING_LIMIT_DEG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteerKey {
    Left,
    Right,
}

/// On-screen steering buttons plus a discrete throttle control.
///
/// Steering moves by a fixed step on every animation frame while a key is
/// held. Throttle only changes when the throttle control is set.
#[derive(Debug, Clone)]
pub struct ButtonAdapter {
    step_deg: i32,
    left_held: bool,
    right_held: bool,
    steering_deg: i32,
    throttle_percent: i32,
}

impl ButtonAdapter {
    pub fn new(step_deg: i32) -> Self {
        Self {
            step_deg: step_deg.abs(),
            left_held: false,
            right_held: false,
            steering_deg: 0,
            throttle_percent: 0,
        }
    }

    pub fn press(&mut self, key: SteerKey) {
        match key {
            SteerKey::Left => self.left_held = true,
            SteerKey::Right => self.right_held = true,
        }
    }

    pub fn release(&mut self, key: SteerKey) {
        match key {
            SteerKey::Left => self.left_held = false,
            SteerKey::Right => self.right_held = false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.left_held != self.right_held
    }

    /// Advance one animation frame. Returns true if steering moved.
    pub fn tick(&mut self) -> bool {
        let delta = match (self.left_held, self.right_held) {
            (true, false) => -self.step_deg,
            (false, true) => self.step_deg,
            _ => return false,
        };
        let next = (self.steering_deg + delta).clamp(-STEERING_LIMIT_DEG, STEERING_LIMIT_DEG);
        let moved = next != self.steering_deg;
        self.steering_deg = next;
        moved
    }

    pub fn center(&mut self) {
        self.steering_deg = 0;
    }

    /// Signed percent: positive drives forward, negative backward.
    pub fn set_throttle(&mut self, percent: i32) {
        self.throttle_percent = clamp_throttle(percent);
    }

    pub fn reset(&mut self) {
        self.left_held = false;
        self.right_held = false;
        self.steering_deg = 0;
        self.throttle_percent = 0;
    }

    pub fn sample(&self) -> InputSample {
        InputSample::new(self.steering_deg, self.throttle_percent)
    }
}

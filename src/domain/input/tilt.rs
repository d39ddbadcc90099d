use super::clamp_throttle;
use crate::domain::models::{InputSample, STEERING_LIMIT_DEG};

/// Device-tilt steering with a separate bidirectional throttle control.
///
/// Raw tilt readings are noisy, so each sample goes through an exponential
/// filter before being clamped to `max_deg` and scaled to full steering.
#[derive(Debug, Clone)]
pub struct TiltAdapter {
    smoothing: f64,
    max_deg: f64,
    smoothed_deg: f64,
    throttle_percent: i32,
}

impl TiltAdapter {
    pub fn new(smoothing: f64, max_deg: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            max_deg: if max_deg > 0.0 { max_deg } else { 45.0 },
            smoothed_deg: 0.0,
            throttle_percent: 0,
        }
    }

    pub fn on_tilt(&mut self, raw_deg: f64) -> InputSample {
        if raw_deg.is_finite() {
            self.smoothed_deg += (raw_deg - self.smoothed_deg) * self.smoothing;
        }
        self.sample()
    }

    pub fn set_throttle(&mut self, percent: i32) {
        self.throttle_percent = clamp_throttle(percent);
    }

    pub fn smoothed_deg(&self) -> f64 {
        self.smoothed_deg
    }

    pub fn reset(&mut self) {
        self.smoothed_deg = 0.0;
        self.throttle_percent = 0;
    }

    pub fn sample(&self) -> InputSample {
        let clamped = self.smoothed_deg.clamp(-self.max_deg, self.max_deg);
        let steering = (clamped / self.max_deg * STEERING_LIMIT_DEG as f64).round() as i32;
        InputSample::new(steering, self.throttle_percent)
    }
}

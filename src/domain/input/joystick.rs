use crate::domain::models::{InputSample, STEERING_LIMIT_DEG, THROTTLE_MAX};

/// Virtual joystick driven by pointer displacement from a fixed center.
///
/// `dx` grows to the right, `dy` grows downward (screen coordinates), so
/// pushing the knob up drives forward.
#[derive(Debug, Clone)]
pub struct JoystickAdapter {
    max_radius: f64,
    deadzone: i32,
    knob: (f64, f64),
    sample: InputSample,
}

impl JoystickAdapter {
    pub fn new(max_radius: f64, deadzone: i32) -> Self {
        Self {
            max_radius: if max_radius > 0.0 { max_radius } else { 1.0 },
            deadzone: deadzone.abs(),
            knob: (0.0, 0.0),
            sample: InputSample::default(),
        }
    }

    pub fn move_to(&mut self, dx: f64, dy: f64) -> InputSample {
        let (x, y) = self.clamp_to_radius(dx, dy);
        self.knob = (x, y);

        let steering = (x / self.max_radius * STEERING_LIMIT_DEG as f64).round() as i32;
        let throttle = (-y / self.max_radius * THROTTLE_MAX as f64).round() as i32;
        let throttle = if throttle.abs() < self.deadzone {
            0
        } else {
            throttle
        };

        self.sample = InputSample::new(steering, throttle);
        self.sample
    }

    /// Pointer lifted: knob springs back to center.
    pub fn release(&mut self) -> InputSample {
        self.reset();
        self.sample
    }

    pub fn reset(&mut self) {
        self.knob = (0.0, 0.0);
        self.sample = InputSample::default();
    }

    /// Knob position after clamping, for the front end to draw.
    pub fn knob(&self) -> (f64, f64) {
        self.knob
    }

    pub fn sample(&self) -> InputSample {
        self.sample
    }

    fn clamp_to_radius(&self, dx: f64, dy: f64) -> (f64, f64) {
        if !dx.is_finite() || !dy.is_finite() {
            return (0.0, 0.0);
        }
        let distance = dx.hypot(dy);
        if distance <= self.max_radius {
            (dx, dy)
        } else {
            let scale = self.max_radius / distance;
            (dx * scale, dy * scale)
        }
    }
}

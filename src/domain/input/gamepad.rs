use crate::domain::models::{InputSample, STEERING_LIMIT_DEG, THROTTLE_MAX};
use std::time::Instant;

/// One poll of the game controller. Axes in [-1, 1], triggers in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GamepadSnapshot {
    pub left_x: f64,
    pub left_trigger: f64,
    pub right_trigger: f64,
}

/// Game controller adapter.
///
/// Steering chases the left stick at a bounded rate measured in real time
/// between polls, so the feel does not depend on the poll frequency. The
/// right trigger drives forward, the left trigger backward.
#[derive(Debug, Clone)]
pub struct GamepadAdapter {
    deadzone: f64,
    max_rate_deg_per_s: f64,
    trigger_epsilon: f64,
    smoothed_deg: f64,
    throttle_percent: i32,
    last_poll: Option<Instant>,
}

impl GamepadAdapter {
    pub fn new(deadzone: f64, max_rate_deg_per_s: f64, trigger_epsilon: f64) -> Self {
        Self {
            deadzone: deadzone.clamp(0.0, 0.99),
            max_rate_deg_per_s: max_rate_deg_per_s.abs(),
            trigger_epsilon: trigger_epsilon.abs(),
            smoothed_deg: 0.0,
            throttle_percent: 0,
            last_poll: None,
        }
    }

    pub fn poll(&mut self, snapshot: GamepadSnapshot, now: Instant) -> InputSample {
        let elapsed_s = self
            .last_poll
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last_poll = Some(now);

        let target = self.target_steering(snapshot.left_x);
        let max_step = self.max_rate_deg_per_s * elapsed_s;
        let step = (target - self.smoothed_deg).clamp(-max_step, max_step);
        self.smoothed_deg += step;

        self.throttle_percent = self.resolve_triggers(snapshot.left_trigger, snapshot.right_trigger);
        self.sample()
    }

    fn target_steering(&self, axis: f64) -> f64 {
        if !axis.is_finite() {
            return 0.0;
        }
        let axis = axis.clamp(-1.0, 1.0);
        if axis.abs() < self.deadzone {
            0.0
        } else {
            axis * STEERING_LIMIT_DEG as f64
        }
    }

    fn resolve_triggers(&self, left: f64, right: f64) -> i32 {
        let left = sanitize_trigger(left);
        let right = sanitize_trigger(right);

        if (right - left).abs() <= self.trigger_epsilon {
            return 0;
        }
        if right > left {
            (right * THROTTLE_MAX as f64).round() as i32
        } else {
            -(left * THROTTLE_MAX as f64).round() as i32
        }
    }

    pub fn smoothed_deg(&self) -> f64 {
        self.smoothed_deg
    }

    /// Controller unplugged or mode left: recentre and forget timing.
    pub fn reset(&mut self) {
        self.smoothed_deg = 0.0;
        self.throttle_percent = 0;
        self.last_poll = None;
    }

    pub fn sample(&self) -> InputSample {
        InputSample::new(self.smoothed_deg.round() as i32, self.throttle_percent)
    }
}

fn sanitize_trigger(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pad() -> GamepadAdapter {
        GamepadAdapter::new(0.1, 300.0, 0.02)
    }

    fn stick(x: f64) -> GamepadSnapshot {
        GamepadSnapshot {
            left_x: x,
            ..Default::default()
        }
    }

    #[test]
    fn step_is_bounded_by_elapsed_time() {
        let mut gamepad = pad();
        let start = Instant::now();
        gamepad.poll(stick(1.0), start);
        assert_eq!(gamepad.smoothed_deg(), 0.0);

        let mut previous = gamepad.smoothed_deg();
        let mut now = start;
        for dt_ms in [16u64, 33, 7, 50, 16, 100] {
            now += Duration::from_millis(dt_ms);
            gamepad.poll(stick(1.0), now);
            let change = (gamepad.smoothed_deg() - previous).abs();
            assert!(change <= 300.0 * dt_ms as f64 / 1000.0 + 1e-9);
            previous = gamepad.smoothed_deg();
        }
    }

    #[test]
    fn converges_to_target_once_enough_time_passes() {
        let mut gamepad = pad();
        let mut now = Instant::now();
        gamepad.poll(stick(-1.0), now);
        for _ in 0..30 {
            now += Duration::from_millis(16);
            gamepad.poll(stick(-1.0), now);
        }
        assert!((gamepad.smoothed_deg() + 90.0).abs() < 1e-6);
    }

    #[test]
    fn poll_rate_does_not_change_the_result() {
        let start = Instant::now();
        let mut fast = pad();
        let mut slow = pad();
        fast.poll(stick(0.5), start);
        slow.poll(stick(0.5), start);

        for i in 1..=10 {
            fast.poll(stick(0.5), start + Duration::from_millis(10 * i));
        }
        slow.poll(stick(0.5), start + Duration::from_millis(100));
        assert!((fast.smoothed_deg() - slow.smoothed_deg()).abs() < 1e-9);
    }

    #[test]
    fn stick_inside_deadzone_targets_center() {
        let mut gamepad = pad();
        let start = Instant::now();
        gamepad.poll(stick(0.05), start);
        gamepad.poll(stick(0.05), start + Duration::from_secs(1));
        assert_eq!(gamepad.sample().steering_deg, 0);
    }

    #[test]
    fn triggers_pick_direction() {
        let mut gamepad = pad();
        let now = Instant::now();
        let forward = gamepad.poll(
            GamepadSnapshot {
                left_trigger: 0.2,
                right_trigger: 0.8,
                ..Default::default()
            },
            now,
        );
        assert_eq!(forward.throttle_percent, 80);

        let backward = gamepad.poll(
            GamepadSnapshot {
                left_trigger: 0.6,
                right_trigger: 0.1,
                ..Default::default()
            },
            now,
        );
        assert_eq!(backward.throttle_percent, -60);

        let equal = gamepad.poll(
            GamepadSnapshot {
                left_trigger: 0.5,
                right_trigger: 0.5,
                ..Default::default()
            },
            now,
        );
        assert_eq!(equal.throttle_percent, 0);
    }
}

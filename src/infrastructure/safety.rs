//! Safety Supervisor
//!
//! Forces the neutral command whenever control is lost or handed over, and
//! tries to tell the vehicle before the link goes away. Nothing here returns
//! an error.

use crate::domain::command::CommandHandle;
use crate::domain::log_book::SessionLog;
use crate::domain::models::VehicleCommand;
use crate::infrastructure::bluetooth::protocol::{self, WireFormat};
use crate::infrastructure::bluetooth::transport::FrameSink;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyTrigger {
    UnexpectedDrop,
    LinkFailure,
    Disconnect,
    ModeSwitch,
    InputSourceLost,
    ExplicitStop,
}

impl fmt::Display for SafetyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::UnexpectedDrop => "link dropped",
            Self::LinkFailure => "link could not be established",
            Self::Disconnect => "disconnect requested",
            Self::ModeSwitch => "input mode changed",
            Self::InputSourceLost => "input source lost",
            Self::ExplicitStop => "stop requested",
        };
        f.write_str(reason)
    }
}

#[derive(Clone)]
pub struct SafetySupervisor {
    command: CommandHandle,
    sink: Arc<dyn FrameSink>,
    format: WireFormat,
    log: SessionLog,
}

impl SafetySupervisor {
    pub fn new(
        command: CommandHandle,
        sink: Arc<dyn FrameSink>,
        format: WireFormat,
        log: SessionLog,
    ) -> Self {
        Self {
            command,
            sink,
            format,
            log,
        }
    }

    /// Neutral immediately, no smoothing.
    pub fn force_neutral(&self, trigger: SafetyTrigger) {
        let was = self.command.current();
        self.command.reset_to_neutral();
        if was.is_neutral() {
            debug!("Safety reset ({}), already neutral", trigger);
        } else {
            warn!("Safety reset ({}), was {:?}", trigger, was);
            self.log.plain(format!("Safety stop: {}", trigger));
        }
    }

    /// Neutral, then one best-effort neutral frame if the link still takes
    /// writes. Returns true if the frame was handed to the link.
    pub async fn neutral_and_flush(&self, trigger: SafetyTrigger) -> bool {
        self.force_neutral(trigger);
        if !self.sink.is_connected() {
            return false;
        }
        let text = protocol::format_command(&VehicleCommand::NEUTRAL, self.format);
        match self.sink.send_frame(&text, false).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Neutral frame not delivered ({}): {}", trigger, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Direction;
    use crate::infrastructure::telemetry::tests::RecordingSink;

    fn driving() -> VehicleCommand {
        VehicleCommand {
            steering_angle_deg: 30,
            throttle_percent: 90,
            direction: Direction::Backward,
        }
    }

    #[test]
    fn force_neutral_is_deterministic() {
        let command = CommandHandle::new();
        command.publish(driving());
        let safety = SafetySupervisor::new(
            command.clone(),
            Arc::new(RecordingSink::default()),
            WireFormat::Standard,
            SessionLog::detached(),
        );

        safety.force_neutral(SafetyTrigger::ModeSwitch);
        assert_eq!(command.current(), VehicleCommand::NEUTRAL);
        assert_eq!(command.resets(), 1);
    }

    #[tokio::test]
    async fn flush_sends_one_neutral_frame() {
        let command = CommandHandle::new();
        command.publish(driving());
        let sink = Arc::new(RecordingSink::default());
        let safety = SafetySupervisor::new(
            command.clone(),
            sink.clone(),
            WireFormat::Standard,
            SessionLog::detached(),
        );

        assert!(safety.neutral_and_flush(SafetyTrigger::Disconnect).await);
        assert_eq!(sink.texts(), vec!["90;0;0"]);
    }

    #[tokio::test]
    async fn flush_failure_is_swallowed() {
        let command = CommandHandle::new();
        command.publish(driving());
        let sink = Arc::new(RecordingSink::default());
        *sink.fail.lock().unwrap() = true;
        let safety = SafetySupervisor::new(
            command.clone(),
            sink,
            WireFormat::Legacy,
            SessionLog::detached(),
        );

        assert!(!safety.neutral_and_flush(SafetyTrigger::ExplicitStop).await);
        assert!(command.current().is_neutral());
    }
}

//! Telemetry Transmitter
//!
//! While the link is up, the current command goes out every period whether
//! or not it changed. The receiver treats silence as loss of control, so the
//! stream is a heartbeat as much as a command channel.

use crate::domain::command::CommandHandle;
use crate::infrastructure::bluetooth::protocol::{self, WireFormat};
use crate::infrastructure::bluetooth::transport::FrameSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

pub struct TelemetryTransmitter {
    sink: Arc<dyn FrameSink>,
    command: CommandHandle,
    period: Duration,
    format: WireFormat,
    task: Option<JoinHandle<()>>,
}

impl TelemetryTransmitter {
    pub fn new(
        sink: Arc<dyn FrameSink>,
        command: CommandHandle,
        period: Duration,
        format: WireFormat,
    ) -> Self {
        Self {
            sink,
            command,
            period,
            format,
            task: None,
        }
    }

    /// Start ticking. A ticker that is already running is replaced, never
    /// duplicated.
    pub fn start(&mut self) {
        self.stop();

        let sink = Arc::clone(&self.sink);
        let command = self.command.clone();
        let period = self.period;
        let format = self.format;

        debug!("Telemetry started ({:?} period)", period);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let text = protocol::format_command(&command.current(), format);
                trace!("Telemetry {}", text);
                if let Err(e) = sink.send_frame(&text, false).await {
                    trace!("Telemetry frame not delivered: {}", e);
                }
            }
        }));
    }

    /// Returns true if a running ticker was stopped.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                debug!("Telemetry stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TelemetryTransmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

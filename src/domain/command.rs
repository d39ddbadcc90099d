//! Shared canonical command
//!
//! One `VehicleCommand` is current at any time. The fusion engine writes it,
//! the telemetry transmitter and the safety supervisor read it, and the front
//! end can watch it. Safety resets bump an epoch so the writer can tell its
//! adapters were overruled.

use crate::domain::models::{Direction, VehicleCommand};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandState {
    pub command: VehicleCommand,
    /// Number of safety resets applied so far.
    pub resets: u64,
}

#[derive(Debug, Clone)]
pub struct CommandHandle {
    tx: Arc<watch::Sender<CommandState>>,
}

impl Default for CommandHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CommandState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> VehicleCommand {
        self.tx.borrow().command
    }

    pub fn resets(&self) -> u64 {
        self.tx.borrow().resets
    }

    /// Publish a new command. Returns true if the value changed.
    pub fn publish(&self, mut command: VehicleCommand) -> bool {
        if command.throttle_percent == 0 {
            command.direction = Direction::Brake;
        }
        self.tx.send_if_modified(|state| {
            if state.command == command {
                return false;
            }
            state.command = command;
            true
        })
    }

    /// Force the neutral command and record the reset.
    pub fn reset_to_neutral(&self) {
        self.tx.send_modify(|state| {
            state.command = VehicleCommand::NEUTRAL;
            state.resets += 1;
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<CommandState> {
        self.tx.subscribe()
    }
}

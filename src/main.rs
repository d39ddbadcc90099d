use rc_link_controller::app::{ControlSession, UserCommand};
use rc_link_controller::console::{self, ConsoleCommand};
use rc_link_controller::domain::models::{AppEvent, Capabilities, LogDirection};
use rc_link_controller::domain::settings::{Settings, SettingsService};
use rc_link_controller::infrastructure::bluetooth::protocol;
use rc_link_controller::infrastructure::bluetooth::simulated::SimulatedVehicle;
use rc_link_controller::infrastructure::logging;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().unwrap_or_else(|e| {
        eprintln!("Settings unavailable ({}), using defaults", e);
        SettingsService::in_memory(Settings::default())
    });

    let _logging_guard = match logging::init_logger(&settings_service.get().log_settings) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    info!("Starting RC link controller");

    // One thread: the canonical command has exactly one writer at a time.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_console(settings_service))
}

async fn run_console(settings: SettingsService) -> anyhow::Result<()> {
    let vehicle = Arc::new(SimulatedVehicle::new());
    vehicle.set_echo_unknown(true);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let session = ControlSession::new(
        Arc::new(Mutex::new(settings)),
        Arc::clone(&vehicle),
        Capabilities::default(),
        Some(event_tx),
    );
    let log = session.log().clone();
    let command = session.command().clone();
    let link = session.watch_link_state();
    let session_task = tokio::spawn(session.run(command_rx));

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                AppEvent::LinkState(state) => println!("link: {}", state),
                AppEvent::Status(status) => println!("[{:?}] {}", status.severity, status.message),
                AppEvent::Log(entry) if entry.direction == LogDirection::In => {
                    println!("<< {}", entry.text)
                }
                _ => {}
            }
        }
    });

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match console::parse(&line) {
            Ok(ConsoleCommand::Session(commands)) => {
                let quit = commands.contains(&UserCommand::Shutdown);
                for cmd in commands {
                    if command_tx.send(cmd).is_err() {
                        warn!("Session already ended");
                    }
                }
                if quit {
                    break;
                }
            }
            Ok(ConsoleCommand::Drop) => {
                if !vehicle.simulate_drop() {
                    println!("vehicle is not connected");
                }
            }
            Ok(ConsoleCommand::Notify(text)) => {
                if !vehicle.inject_notification(protocol::frame(&text).as_bytes()) {
                    println!("nobody is listening");
                }
            }
            Ok(ConsoleCommand::ShowLog) => {
                for entry in log.snapshot() {
                    println!("#{:<4} {:?} {}", entry.id, entry.direction, entry.text);
                }
            }
            Ok(ConsoleCommand::Status) => {
                let current = command.current();
                println!(
                    "link: {}  steering: {}  throttle: {}  direction: {:?}",
                    *link.borrow(),
                    current.steering_angle_deg,
                    current.throttle_percent,
                    current.direction
                );
            }
            Ok(ConsoleCommand::Help) => println!("{}", console::HELP),
            Ok(ConsoleCommand::Empty) => {}
            Err(message) => println!("{}", message),
        }
    }

    let _ = command_tx.send(UserCommand::Shutdown);
    session_task.await?;
    info!("Bye");
    Ok(())
}

//! Line-oriented command parser for the headless front end.

use crate::app::UserCommand;
use crate::domain::input::{GamepadSnapshot, SteerKey};
use crate::domain::models::InputModality;

pub const HELP: &str = "\
commands:
  connect | disconnect | forget
  mode <buttons|joystick|tilt|gamepad>
  left | right | release [left|right] | center
  throttle <-100..100>
  stick <dx> <dy> | stick release
  tilt <deg> | tilt lost | tilt back
  pad <x> <lt> <rt> | unplug
  stop | send <text>
  drop | notify <text>      (simulated vehicle)
  log | status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Session(Vec<UserCommand>),
    /// Make the simulated vehicle vanish.
    Drop,
    /// Push a record from the simulated vehicle.
    Notify(String),
    ShowLog,
    Status,
    Help,
    Empty,
}

pub fn parse(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let one = |cmd: UserCommand| -> Result<ConsoleCommand, String> {
        Ok(ConsoleCommand::Session(vec![cmd]))
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Ok(ConsoleCommand::Empty),
        "connect" => one(UserCommand::Connect),
        "disconnect" => one(UserCommand::Disconnect),
        "forget" => one(UserCommand::ForgetDevice),
        "mode" => {
            let name = args.first().ok_or("usage: mode <buttons|joystick|tilt|gamepad>")?;
            let modality =
                InputModality::parse(name).ok_or_else(|| format!("unknown mode '{}'", name))?;
            one(UserCommand::SelectMode(modality))
        }
        "left" => one(UserCommand::SteerPress(SteerKey::Left)),
        "right" => one(UserCommand::SteerPress(SteerKey::Right)),
        "release" => match args.first().copied() {
            Some("left") => one(UserCommand::SteerRelease(SteerKey::Left)),
            Some("right") => one(UserCommand::SteerRelease(SteerKey::Right)),
            None => Ok(ConsoleCommand::Session(vec![
                UserCommand::SteerRelease(SteerKey::Left),
                UserCommand::SteerRelease(SteerKey::Right),
            ])),
            Some(other) => Err(format!("unknown key '{}'", other)),
        },
        "center" => one(UserCommand::CenterSteering),
        "throttle" => {
            let percent: i32 = number(args.first(), "throttle <-100..100>")?;
            one(UserCommand::Throttle(percent))
        }
        "stick" => match args.as_slice() {
            ["release"] => one(UserCommand::JoystickRelease),
            [dx, dy] => one(UserCommand::JoystickMove {
                dx: number(Some(dx), "stick <dx> <dy>")?,
                dy: number(Some(dy), "stick <dx> <dy>")?,
            }),
            _ => Err("usage: stick <dx> <dy> | stick release".into()),
        },
        "tilt" => match args.first().copied() {
            Some("lost") => one(UserCommand::TiltSourceLost),
            Some("back") => one(UserCommand::TiltSourceRestored),
            deg => one(UserCommand::Tilt(number(deg.as_ref(), "tilt <deg>")?)),
        },
        "pad" => match args.as_slice() {
            [x, lt, rt] => {
                let usage = "pad <x> <lt> <rt>";
                one(UserCommand::Gamepad(Some(GamepadSnapshot {
                    left_x: number(Some(x), usage)?,
                    left_trigger: number(Some(lt), usage)?,
                    right_trigger: number(Some(rt), usage)?,
                })))
            }
            _ => Err("usage: pad <x> <lt> <rt>".into()),
        },
        "unplug" => one(UserCommand::Gamepad(None)),
        "stop" => one(UserCommand::Stop),
        "send" if !rest.is_empty() => one(UserCommand::SendText(rest.to_string())),
        "send" => Err("usage: send <text>".into()),
        "drop" => Ok(ConsoleCommand::Drop),
        "notify" => Ok(ConsoleCommand::Notify(rest.to_string())),
        "log" => Ok(ConsoleCommand::ShowLog),
        "status" => Ok(ConsoleCommand::Status),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => one(UserCommand::Shutdown),
        other => Err(format!("unknown command '{}', try 'help'", other)),
    }
}

fn number<T: std::str::FromStr>(arg: Option<&&str>, usage: &str) -> Result<T, String> {
    arg.and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("usage: {}", usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(line: &str) -> Vec<UserCommand> {
        match parse(line) {
            Ok(ConsoleCommand::Session(cmds)) => cmds,
            other => panic!("expected session command, got {:?}", other),
        }
    }

    #[test]
    fn parses_driving_commands() {
        assert_eq!(session("throttle -40"), vec![UserCommand::Throttle(-40)]);
        assert_eq!(
            session("stick 10 -20.5"),
            vec![UserCommand::JoystickMove { dx: 10.0, dy: -20.5 }]
        );
        assert_eq!(
            session("mode Gamepad"),
            vec![UserCommand::SelectMode(InputModality::Gamepad)]
        );
        assert_eq!(session("release").len(), 2);
    }

    #[test]
    fn send_keeps_the_whole_text() {
        assert_eq!(
            session("send  horn on; lights off "),
            vec![UserCommand::SendText("horn on; lights off".into())]
        );
        assert!(parse("send").is_err());
    }

    #[test]
    fn bad_input_is_reported_not_guessed() {
        assert!(parse("throttle fast").is_err());
        assert!(parse("pad 0.1 0.2").is_err());
        assert!(parse("mode hover").is_err());
        assert!(parse("jump").is_err());
        assert_eq!(parse("   "), Ok(ConsoleCommand::Empty));
    }
}

//! Benutzerbefehle
//!
//! Jede Zeile der Konsole wird zu genau einem `Command`, der 1:1 auf eine
//! Operation des Koordinators abgebildet wird.

use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}', try: set-identity, call, hang-up, start-mic, stop-mic, toggle-transmit, set-volume, accept, reject, enable-audio, status, quit")]
    Unknown(String),

    #[error("Volume must be a number between 0.0 and 1.0, got '{0}'")]
    InvalidVolume(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetIdentity(String),
    Call(String),
    HangUp,
    StartMic,
    StopMic,
    ToggleTransmit,
    SetVolume(f32),
    Accept,
    Reject,
    EnableAudio,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, argument) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        // Leere Argumente prüft der Koordinator (InvalidInput / EmptyTarget)
        let command = match name.to_ascii_lowercase().as_str() {
            "" => return Err(CommandParseError::Empty),
            "set-identity" | "id" => Command::SetIdentity(argument.to_string()),
            "call" => Command::Call(argument.to_string()),
            "hang-up" | "hangup" => Command::HangUp,
            "start-mic" => Command::StartMic,
            "stop-mic" => Command::StopMic,
            "toggle-transmit" | "ptt" => Command::ToggleTransmit,
            "set-volume" | "volume" => {
                let volume = argument
                    .parse::<f32>()
                    .map_err(|_| CommandParseError::InvalidVolume(argument.to_string()))?;
                Command::SetVolume(volume)
            }
            "accept" => Command::Accept,
            "reject" => Command::Reject,
            "enable-audio" => Command::EnableAudio,
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };

        Ok(command)
    }
}

//! Coordinator Module - Orchestrierung einer Funk-Session
//!
//! Verbindet Identität, Audio Gate, Call Session und Transport:
//! - Registriert den Endpoint unter der Session-ID
//! - Verarbeitet alle Transport- und Mikrofon-Events über eine Queue
//! - Höchstens ein aktiver Anruf pro Koordinator
//! - Jeder Fehler wird zusätzlich als Statusmeldung ausgegeben

mod command;
mod session_coordinator;

#[cfg(test)]
mod tests;

pub use command::{Command, CommandParseError};
pub use session_coordinator::{
    Capabilities, CoordinatorConfig, CoordinatorError, EndpointState, SessionCoordinator,
};

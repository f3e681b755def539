//! Status Log - Benachrichtigungen für den Benutzer
//!
//! Append-only Liste menschenlesbarer Statusmeldungen. Die Reihenfolge
//! entspricht der Reihenfolge der zugrundeliegenden Events; Einträge werden
//! nie verändert oder entfernt. Abonnenten bekommen jeden neuen Eintrag
//! zusätzlich über einen Broadcast-Channel.

use crate::call_engine::{CallState, EndReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Kapazität des Broadcast-Channels
const CHANNEL_CAPACITY: usize = 100;

// ============================================================================
// NOTICES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// Strukturierte Statusmeldung
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    EndpointOpen { id: String, primary: bool },
    EndpointError { message: String },
    IdentityCollision { id: String },
    IdentityChanged { id: String },
    InvalidInput { message: String },
    NotReady,
    Calling { peer: String },
    CallFailed { message: String },
    IncomingCall { peer: String },
    AnswerFallback { message: String },
    CallAttached { peer: String },
    ReceivingAudio { peer: String },
    CallState { state: CallState },
    CallEnded { reason: EndReason },
    CallError { message: String },
    MicOn,
    MicMuted,
    MicError { message: String },
    NoMicrophone,
    Transmitting,
    Listening,
    PlaybackBlocked,
    VolumeChanged { volume: f32 },
    Failure { message: String },
    Shutdown,
}

impl Notice {
    pub fn level(&self) -> StatusLevel {
        match self {
            Notice::EndpointError { .. }
            | Notice::CallFailed { .. }
            | Notice::CallError { .. }
            | Notice::MicError { .. }
            | Notice::Failure { .. } => StatusLevel::Error,
            Notice::IdentityCollision { .. }
            | Notice::InvalidInput { .. }
            | Notice::NotReady
            | Notice::AnswerFallback { .. }
            | Notice::NoMicrophone
            | Notice::PlaybackBlocked => StatusLevel::Warning,
            _ => StatusLevel::Info,
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::EndpointOpen { id, primary: true } => write!(f, "Permanent radio ID: {id}"),
            Notice::EndpointOpen { id, primary: false } => {
                write!(f, "Secondary tab, temporary ID: {id}")
            }
            Notice::EndpointError { message } => write!(f, "Peer error: {message}"),
            Notice::IdentityCollision { id } => {
                write!(f, "ID '{id}' is already in use, choose a new one")
            }
            Notice::IdentityChanged { id } => write!(f, "Radio ID set to {id}, registering again"),
            Notice::InvalidInput { message } => write!(f, "{message}"),
            Notice::NotReady => write!(f, "Not connected yet, wait until your ID is registered"),
            Notice::Calling { peer } => write!(f, "Calling {peer} ..."),
            Notice::CallFailed { message } => write!(f, "Call failed: {message}"),
            Notice::IncomingCall { peer } => write!(f, "Incoming call from {peer}"),
            Notice::AnswerFallback { message } => {
                write!(f, "Error answering call ({message}), answering receive-only")
            }
            Notice::CallAttached { peer } => write!(f, "Call connected with {peer}"),
            Notice::ReceivingAudio { peer } => write!(f, "Receiving audio from {peer}"),
            Notice::CallState { state } => write!(f, "Call state: {state}"),
            Notice::CallEnded { reason } => write!(f, "{reason}"),
            Notice::CallError { message } => write!(f, "Call error: {message}"),
            Notice::MicOn => write!(f, "Microphone ON"),
            Notice::MicMuted => write!(f, "Microphone muted"),
            Notice::MicError { message } => write!(f, "Mic error: {message}"),
            Notice::NoMicrophone => write!(f, "No microphone: start the mic before transmitting"),
            Notice::Transmitting => write!(f, "TRANSMITTING"),
            Notice::Listening => write!(f, "LISTENING"),
            Notice::PlaybackBlocked => {
                write!(f, "Audio playback blocked, run enable-audio to start it")
            }
            Notice::VolumeChanged { volume } => write!(f, "Volume {:.0}%", volume * 100.0),
            Notice::Failure { message } => write!(f, "Error: {message}"),
            Notice::Shutdown => write!(f, "Radio switched off"),
        }
    }
}

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    /// Fortlaufende Nummer ab 1
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub level: StatusLevel,
    pub notice: Notice,
    pub message: String,
}

impl StatusEntry {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Display for StatusEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

// ============================================================================
// STATUS LOG
// ============================================================================

pub struct StatusLog {
    entries: Vec<StatusEntry>,
    tx: broadcast::Sender<StatusEntry>,
}

impl StatusLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            entries: Vec::new(),
            tx,
        }
    }

    /// Gibt einen Receiver für neue Einträge zurück
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEntry> {
        self.tx.subscribe()
    }

    /// Hängt eine Meldung an
    pub fn push(&mut self, notice: Notice) -> &StatusEntry {
        let entry = StatusEntry {
            seq: self.entries.len() as u64 + 1,
            at: Utc::now(),
            level: notice.level(),
            message: notice.to_string(),
            notice,
        };

        match entry.level {
            StatusLevel::Info => tracing::info!("{}", entry.message),
            StatusLevel::Warning => tracing::warn!("{}", entry.message),
            StatusLevel::Error => tracing::error!("{}", entry.message),
        }

        // Ohne Abonnenten schlägt send fehl, das ist kein Fehler
        let _ = self.tx.send(entry.clone());
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    /// Einträge mit `seq > after`
    pub fn since(&self, after: u64) -> &[StatusEntry] {
        let start = (after as usize).min(self.entries.len());
        &self.entries[start..]
    }

    pub fn last(&self) -> Option<&StatusEntry> {
        self.entries.last()
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.entries.iter().map(|e| &e.notice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLog")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_ordered_and_broadcast() {
        let mut log = StatusLog::new();
        let mut rx = log.subscribe();

        log.push(Notice::MicOn);
        log.push(Notice::Calling {
            peer: "bob".to_string(),
        });
        log.push(Notice::NoMicrophone);

        let seqs: Vec<u64> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(log.entries()[1].message, "Calling bob ...");
        assert_eq!(log.entries()[2].level, StatusLevel::Warning);

        assert_eq!(rx.try_recv().unwrap().seq, 1);
        assert_eq!(rx.try_recv().unwrap().seq, 2);
        assert_eq!(rx.try_recv().unwrap().seq, 3);

        assert_eq!(log.since(1).len(), 2);
        assert!(log.since(10).is_empty());
    }

    #[test]
    fn test_entry_json() {
        let mut log = StatusLog::new();
        let entry = log.push(Notice::EndpointOpen {
            id: "alice".to_string(),
            primary: true,
        });

        let json: serde_json::Value = serde_json::from_str(&entry.to_json().unwrap()).unwrap();
        assert_eq!(json["seq"], 1);
        assert_eq!(json["level"], "info");
        assert_eq!(json["notice"]["type"], "endpoint_open");
        assert_eq!(json["notice"]["id"], "alice");
        assert_eq!(json["message"], "Permanent radio ID: alice");
    }
}

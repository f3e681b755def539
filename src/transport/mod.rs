//! Transport Module - Abstrakter P2P Transport
//!
//! Signaling und Media-Aushandlung sind extern. Dieses Modul definiert
//! nur die Schnittstelle, über die der Koordinator sie benutzt:
//! - Endpoint unter einer ID registrieren
//! - Ausgehende Anrufe, eingehende Anrufe beantworten, Anrufe schließen
//! - Events (open, error, call, stream, close) über einen `EventSink`
//!
//! `LoopbackNetwork` ist ein In-Process Transport für Tests und die Konsole.

mod loopback;

pub use loopback::{LoopbackCall, LoopbackNetwork, LoopbackTransport};

use crate::audio::MediaStream;
use crate::events::EventSink;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("ID '{0}' is already taken")]
    IdUnavailable(String),

    #[error("Peer '{0}' is unavailable")]
    PeerUnavailable(String),

    #[error("Transport endpoint is not open")]
    NotOpen,

    #[error("Call {0} is already closed")]
    CallClosed(CallId),

    #[error("Transport error: {0}")]
    Other(String),
}

// ============================================================================
// CALL ID
// ============================================================================

/// Identität eines Call-Objekts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Ein laufender oder ausstehender Anruf mit genau einer Gegenstelle
pub trait CallHandle: Send + std::fmt::Debug {
    fn id(&self) -> CallId;

    /// ID der Gegenstelle
    fn peer(&self) -> &str;

    /// Beantwortet einen eingehenden Anruf, optional ohne eigenen Stream
    fn answer(&mut self, local: Option<MediaStream>) -> Result<(), TransportError>;

    /// Schließt den Anruf; mehrfaches Schließen ist erlaubt
    fn close(&mut self);
}

/// Registrierter Endpoint beim Transport
pub trait PeerTransport: Send {
    /// Registriert den Endpoint
    ///
    /// Bestätigung bzw. Ablehnung kommen asynchron als `Open` oder
    /// `Error(IdUnavailable)`; ein `Err` hier ist ein sofortiger Fehler.
    fn open(&mut self, id: &str) -> Result<(), TransportError>;

    fn call(
        &mut self,
        remote_id: &str,
        local: Option<MediaStream>,
    ) -> Result<Box<dyn CallHandle>, TransportError>;

    /// Meldet den Endpoint ab und schließt alle Anrufe
    fn destroy(&mut self);
}

/// Erzeugt pro Registrierung einen neuen Transport
pub trait TransportFactory: Send {
    fn create(&mut self, events: EventSink) -> Box<dyn PeerTransport>;
}

impl<F> TransportFactory for F
where
    F: FnMut(EventSink) -> Box<dyn PeerTransport> + Send,
{
    fn create(&mut self, events: EventSink) -> Box<dyn PeerTransport> {
        self(events)
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Events eines Transports
#[derive(Debug)]
pub enum TransportEvent {
    /// Endpoint ist unter `id` registriert
    Open { id: String },

    /// Fehler auf Endpoint-Ebene
    Error(TransportError),

    /// Eingehender Anruf
    IncomingCall(Box<dyn CallHandle>),

    /// Media der Gegenstelle ist angekommen
    RemoteStream { call: CallId, stream: MediaStream },

    /// Anruf wurde geschlossen (lokal oder remote)
    CallClosed { call: CallId },

    /// Fehler eines einzelnen Anrufs
    CallError { call: CallId, error: TransportError },
}

//! Call Session
//!
//! Zustandsmaschine für genau einen aktiven oder ausstehenden Anruf.
//! Besitzt das Call-Objekt des Transports, aber nie den Mikrofon-Stream:
//! der wird nur beim Anrufen/Beantworten vom Gate geliehen.
//!
//! Events eines Call-Objekts, das nicht mehr angehängt ist (z.B. `close`
//! oder `stream` nach lokalem Auflegen), sind No-ops.

use crate::audio::MediaStream;
use crate::status::{Notice, StatusLog};
use crate::transport::{CallHandle, CallId, PeerTransport, TransportError};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Enter the ID of the peer to call")]
    EmptyTarget,

    #[error("No incoming call waiting for an answer")]
    NothingToAccept,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Ausgehender Anruf, wartet auf Media der Gegenstelle
    Dialing,
    /// Eingehender Anruf, (noch) ohne Media
    Ringing,
    /// Media der Gegenstelle ist angekommen
    Connected,
    /// Anruf wird abgebaut
    Ending,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Dialing => "dialing",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::Ending => "ending",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    None,
    Outbound,
    Inbound,
}

/// Warum ein Anruf beendet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Lokales Auflegen
    HangUp,
    /// Gegenstelle hat geschlossen
    RemoteClosed,
    /// Durch einen neuen Anruf ersetzt
    Replaced,
    /// Eingehender Anruf abgelehnt
    Rejected,
    /// Transport-Fehler
    Failed,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            EndReason::HangUp => "Call ended",
            EndReason::RemoteClosed => "Call ended by peer",
            EndReason::Replaced => "Previous call closed",
            EndReason::Rejected => "Incoming call rejected",
            EndReason::Failed => "Call reset after error",
        };
        f.write_str(text)
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

pub struct CallSession {
    state: CallState,
    direction: CallDirection,
    remote_peer_id: Option<String>,
    call: Option<Box<dyn CallHandle>>,
    /// Eingehender Anruf wurde beantwortet (ausgehende gelten als beantwortet)
    answered: bool,
    auto_answer: bool,
}

impl CallSession {
    pub fn new(auto_answer: bool) -> Self {
        Self {
            state: CallState::Idle,
            direction: CallDirection::None,
            remote_peer_id: None,
            call: None,
            answered: false,
            auto_answer,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn remote_peer_id(&self) -> Option<&str> {
        self.remote_peer_id.as_deref()
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call.as_ref().map(|c| c.id())
    }

    pub fn is_idle(&self) -> bool {
        self.state == CallState::Idle
    }

    pub fn auto_answer(&self) -> bool {
        self.auto_answer
    }

    /// Eingehender Anruf wartet auf `accept`/`reject`
    pub fn awaiting_answer(&self) -> bool {
        self.state == CallState::Ringing && !self.answered
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    ///
    /// Ein laufender Anruf wird vorher vollständig abgebaut.
    pub fn place_call(
        &mut self,
        transport: &mut dyn PeerTransport,
        remote_id: &str,
        local: Option<MediaStream>,
        status: &mut StatusLog,
    ) -> Result<CallId, CallError> {
        let remote_id = remote_id.trim();
        if remote_id.is_empty() {
            return Err(CallError::EmptyTarget);
        }

        if !self.is_idle() {
            self.teardown(EndReason::Replaced, status);
        }

        status.push(Notice::Calling {
            peer: remote_id.to_string(),
        });

        let handle = transport.call(remote_id, local)?;
        let id = handle.id();

        self.attach_call(handle, CallDirection::Outbound, status);
        self.answered = true;
        self.set_state(CallState::Dialing, status);

        Ok(id)
    }

    /// Beantwortet den klingelnden Anruf (ohne Auto-Answer)
    pub fn accept(
        &mut self,
        local: Option<MediaStream>,
        status: &mut StatusLog,
    ) -> Result<(), CallError> {
        if !self.awaiting_answer() {
            return Err(CallError::NothingToAccept);
        }
        self.answer(local, status)
    }

    /// Lehnt den klingelnden Anruf ab
    pub fn reject(&mut self, status: &mut StatusLog) -> bool {
        if !self.awaiting_answer() {
            return false;
        }
        self.teardown(EndReason::Rejected, status);
        true
    }

    /// Legt auf; `false` wenn kein Anruf bestand
    pub fn hang_up(&mut self, status: &mut StatusLog) -> bool {
        if self.is_idle() && self.call.is_none() {
            return false;
        }
        self.teardown(EndReason::HangUp, status);
        true
    }

    // ========================================================================
    // TRANSPORT EVENTS
    // ========================================================================

    /// Eingehender Anruf
    ///
    /// Ein bestehender Anruf wird zuerst abgebaut. Mit Auto-Answer wird
    /// sofort mit dem aktuellen Gate-Stream (oder ohne) geantwortet.
    pub fn receive_call(
        &mut self,
        handle: Box<dyn CallHandle>,
        local: Option<MediaStream>,
        status: &mut StatusLog,
    ) -> Result<(), CallError> {
        status.push(Notice::IncomingCall {
            peer: handle.peer().to_string(),
        });

        if !self.is_idle() {
            self.teardown(EndReason::Replaced, status);
        }

        self.attach_call(handle, CallDirection::Inbound, status);
        self.set_state(CallState::Ringing, status);

        if self.auto_answer {
            self.answer(local, status)
        } else {
            Ok(())
        }
    }

    /// Media der Gegenstelle
    ///
    /// Gibt den Stream zurück, wenn er an die Wiedergabe gehängt werden soll.
    pub fn on_remote_stream(
        &mut self,
        call: CallId,
        stream: MediaStream,
        status: &mut StatusLog,
    ) -> Option<MediaStream> {
        if !self.is_current(call) {
            tracing::debug!("Ignoring stream of detached call {}", call);
            return None;
        }

        match self.state {
            CallState::Dialing | CallState::Ringing if self.answered => {
                self.set_state(CallState::Connected, status);
                if let Some(peer) = &self.remote_peer_id {
                    status.push(Notice::ReceivingAudio { peer: peer.clone() });
                }
                Some(stream)
            }
            // Neuer Track während des Gesprächs
            CallState::Connected => Some(stream),
            _ => {
                tracing::debug!("Ignoring stream in state {}", self.state);
                None
            }
        }
    }

    /// Gegenstelle hat geschlossen; `true` wenn der aktuelle Anruf endete
    pub fn on_remote_close(&mut self, call: CallId, status: &mut StatusLog) -> bool {
        if !self.is_current(call) {
            tracing::debug!("Ignoring close of detached call {}", call);
            return false;
        }
        self.teardown(EndReason::RemoteClosed, status);
        true
    }

    /// Fehler eines Anrufs; kein automatischer Neuversuch
    pub fn on_call_error(
        &mut self,
        call: CallId,
        error: &TransportError,
        status: &mut StatusLog,
    ) -> bool {
        if !self.is_current(call) {
            tracing::debug!("Ignoring error of detached call {}: {}", call, error);
            return false;
        }
        status.push(Notice::CallError {
            message: error.to_string(),
        });
        self.teardown(EndReason::Failed, status);
        true
    }

    /// Fehler auf Endpoint-Ebene setzt jeden Anruf zurück
    pub fn on_transport_error(&mut self, status: &mut StatusLog) -> bool {
        if self.is_idle() && self.call.is_none() {
            return false;
        }
        self.teardown(EndReason::Failed, status);
        true
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn is_current(&self, call: CallId) -> bool {
        self.call_id() == Some(call)
    }

    /// Übernimmt ein Call-Objekt; ein anderes angehängtes wird geschlossen
    fn attach_call(
        &mut self,
        handle: Box<dyn CallHandle>,
        direction: CallDirection,
        status: &mut StatusLog,
    ) {
        if let Some(mut previous) = self.call.take() {
            if previous.id() != handle.id() {
                tracing::info!(
                    "Closing previous call {} before attaching {}",
                    previous.id(),
                    handle.id()
                );
                previous.close();
            }
        }

        let peer = handle.peer().to_string();
        self.remote_peer_id = Some(peer.clone());
        self.direction = direction;
        self.answered = false;
        self.call = Some(handle);

        status.push(Notice::CallAttached { peer });
    }

    fn answer(
        &mut self,
        local: Option<MediaStream>,
        status: &mut StatusLog,
    ) -> Result<(), CallError> {
        let Some(handle) = self.call.as_mut() else {
            return Err(CallError::NothingToAccept);
        };

        let with_stream = local.is_some();
        let result = match handle.answer(local) {
            Err(e) if with_stream => {
                // Nur empfangen, wenn der eigene Stream nicht angehängt werden kann
                status.push(Notice::AnswerFallback {
                    message: e.to_string(),
                });
                handle.answer(None)
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.answered = true;
                tracing::info!("Answered call from {:?}", self.remote_peer_id);
                Ok(())
            }
            Err(e) => {
                status.push(Notice::CallFailed {
                    message: e.to_string(),
                });
                self.teardown(EndReason::Failed, status);
                Err(e.into())
            }
        }
    }

    /// Baut den aktuellen Anruf ab; mehrfacher Aufruf ist unschädlich
    fn teardown(&mut self, reason: EndReason, status: &mut StatusLog) {
        if self.is_idle() && self.call.is_none() {
            return;
        }

        self.set_state(CallState::Ending, status);

        if let Some(mut call) = self.call.take() {
            call.close();
        }
        self.remote_peer_id = None;
        self.direction = CallDirection::None;
        self.answered = false;

        self.set_state(CallState::Idle, status);
        status.push(Notice::CallEnded { reason });
    }

    /// Aktualisiert den State und meldet ihn
    fn set_state(&mut self, new_state: CallState, status: &mut StatusLog) {
        if self.state == new_state {
            return;
        }
        tracing::info!("Call state: {} -> {}", self.state, new_state);
        self.state = new_state;
        status.push(Notice::CallState { state: new_state });
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("state", &self.state)
            .field("direction", &self.direction)
            .field("remote_peer_id", &self.remote_peer_id)
            .field("call", &self.call_id())
            .field("auto_answer", &self.auto_answer)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

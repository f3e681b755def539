//! Loopback Transport
//!
//! In-Process Vermittlung zwischen Endpoints derselben Anwendung.
//! Verhält sich wie ein P2P Signaling-Server:
//! - Doppelte IDs werden mit `IdUnavailable` abgelehnt
//! - Unbekannte Ziele liefern `PeerUnavailable` am Anruf
//! - Schließen meldet `CallClosed` an beide Seiten

use super::{CallHandle, CallId, PeerTransport, TransportError, TransportEvent, TransportFactory};
use crate::audio::MediaStream;
use crate::events::EventSink;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// NETWORK STATE
// ============================================================================

#[derive(Debug)]
struct CallLink {
    caller: String,
    callee: String,
    caller_sink: EventSink,
    callee_sink: EventSink,
    caller_stream: Option<MediaStream>,
    answered: bool,
}

#[derive(Debug, Default)]
struct NetworkState {
    endpoints: HashMap<String, EventSink>,
    calls: HashMap<CallId, CallLink>,
}

impl NetworkState {
    /// Schließt einen Anruf und benachrichtigt beide Seiten
    fn close_call(&mut self, call: CallId) {
        if let Some(link) = self.calls.remove(&call) {
            tracing::debug!("Loopback call {} closed ({} -> {})", call, link.caller, link.callee);
            link.caller_sink.transport(TransportEvent::CallClosed { call });
            link.callee_sink.transport(TransportEvent::CallClosed { call });
        }
    }
}

// ============================================================================
// NETWORK
// ============================================================================

/// Gemeinsames In-Process Netzwerk; Klone teilen den Zustand
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Erstellt einen Transport, der Events an `events` liefert
    pub fn transport(&self, events: EventSink) -> LoopbackTransport {
        LoopbackTransport {
            network: self.clone(),
            events,
            id: None,
        }
    }

    /// Prüft ob eine ID registriert ist
    pub fn is_registered(&self, id: &str) -> bool {
        self.state.lock().endpoints.contains_key(id)
    }

    /// Alle registrierten IDs (sortiert)
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().endpoints.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Anzahl offener Anrufe
    pub fn active_calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Simuliert einen Endpoint-Fehler (z.B. Verbindungsabbruch)
    pub fn fail_endpoint(&self, id: &str, message: &str) -> bool {
        let state = self.state.lock();
        match state.endpoints.get(id) {
            Some(sink) => sink.transport(TransportEvent::Error(TransportError::Other(
                message.to_string(),
            ))),
            None => false,
        }
    }

    /// Simuliert einen Fehler auf allen Anrufen eines Endpoints
    pub fn fail_calls_of(&self, id: &str, message: &str) -> usize {
        let state = self.state.lock();
        let mut failed = 0;
        for (call, link) in state.calls.iter() {
            let error = TransportError::Other(message.to_string());
            if link.caller == id {
                link.caller_sink.transport(TransportEvent::CallError {
                    call: *call,
                    error,
                });
                failed += 1;
            } else if link.callee == id {
                link.callee_sink
                    .transport(TransportEvent::CallError { call: *call, error });
                failed += 1;
            }
        }
        failed
    }
}

impl TransportFactory for LoopbackNetwork {
    fn create(&mut self, events: EventSink) -> Box<dyn PeerTransport> {
        Box::new(self.transport(events))
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackNetwork")
            .field("endpoints", &state.endpoints.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Endpoint im Loopback-Netzwerk
#[derive(Debug)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    events: EventSink,
    id: Option<String>,
}

impl PeerTransport for LoopbackTransport {
    fn open(&mut self, id: &str) -> Result<(), TransportError> {
        if let Some(current) = &self.id {
            return Err(TransportError::Other(format!(
                "endpoint already open as '{current}'"
            )));
        }

        let mut state = self.network.state.lock();
        if state.endpoints.contains_key(id) {
            tracing::warn!("Loopback: id '{}' is already registered", id);
            self.events
                .transport(TransportEvent::Error(TransportError::IdUnavailable(
                    id.to_string(),
                )));
            return Ok(());
        }

        state.endpoints.insert(id.to_string(), self.events.clone());
        self.id = Some(id.to_string());
        tracing::debug!("Loopback: registered '{}'", id);
        self.events.transport(TransportEvent::Open { id: id.to_string() });
        Ok(())
    }

    fn call(
        &mut self,
        remote_id: &str,
        local: Option<MediaStream>,
    ) -> Result<Box<dyn CallHandle>, TransportError> {
        let caller = self.id.clone().ok_or(TransportError::NotOpen)?;
        let call = CallId::new();

        let mut state = self.network.state.lock();
        if let Some(sink) = state.endpoints.get(remote_id).cloned() {
            sink.transport(TransportEvent::IncomingCall(Box::new(LoopbackCall {
                network: self.network.clone(),
                call,
                peer: caller.clone(),
                is_callee: true,
            })));
            state.calls.insert(
                call,
                CallLink {
                    caller,
                    callee: remote_id.to_string(),
                    caller_sink: self.events.clone(),
                    callee_sink: sink,
                    caller_stream: local,
                    answered: false,
                },
            );
        } else {
            tracing::debug!("Loopback: '{}' is not registered", remote_id);
            self.events.transport(TransportEvent::CallError {
                call,
                error: TransportError::PeerUnavailable(remote_id.to_string()),
            });
        }

        Ok(Box::new(LoopbackCall {
            network: self.network.clone(),
            call,
            peer: remote_id.to_string(),
            is_callee: false,
        }))
    }

    fn destroy(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };

        let mut state = self.network.state.lock();
        state.endpoints.remove(&id);

        let calls: Vec<CallId> = state
            .calls
            .iter()
            .filter(|(_, link)| link.caller == id || link.callee == id)
            .map(|(call, _)| *call)
            .collect();
        for call in calls {
            state.close_call(call);
        }

        tracing::debug!("Loopback: '{}' unregistered", id);
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// CALL
// ============================================================================

/// Eine Seite eines Loopback-Anrufs
pub struct LoopbackCall {
    network: LoopbackNetwork,
    call: CallId,
    peer: String,
    is_callee: bool,
}

impl CallHandle for LoopbackCall {
    fn id(&self) -> CallId {
        self.call
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn answer(&mut self, local: Option<MediaStream>) -> Result<(), TransportError> {
        if !self.is_callee {
            return Err(TransportError::Other(
                "only the receiving side can answer".to_string(),
            ));
        }

        let mut state = self.network.state.lock();
        let link = state
            .calls
            .get_mut(&self.call)
            .ok_or(TransportError::CallClosed(self.call))?;

        if link.answered {
            return Ok(());
        }
        link.answered = true;

        // Media fließt nur in Richtungen, in denen ein Stream gesendet wird
        if let Some(stream) = &link.caller_stream {
            link.callee_sink.transport(TransportEvent::RemoteStream {
                call: self.call,
                stream: stream.clone(),
            });
        }
        if let Some(stream) = local {
            link.caller_sink.transport(TransportEvent::RemoteStream {
                call: self.call,
                stream,
            });
        }

        Ok(())
    }

    fn close(&mut self) {
        self.network.state.lock().close_call(self.call);
    }
}

impl std::fmt::Debug for LoopbackCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackCall")
            .field("call", &self.call)
            .field("peer", &self.peer)
            .field("is_callee", &self.is_callee)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

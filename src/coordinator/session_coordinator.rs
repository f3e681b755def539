//! Session Coordinator
//!
//! Besitzt Identität, Audio Gate, Call Session, Remote-Wiedergabe und den
//! Transport-Endpoint. Benutzerbefehle kommen als Methodenaufrufe, alles
//! Asynchrone (Transport-Callbacks, Mikrofon-Freigabe) als `Envelope` über
//! die eigene Queue.
//!
//! Verworfen werden:
//! - Transport-Events einer älteren Endpoint-Generation
//! - Mikrofon-Antworten mit veraltetem Ticket
//! - Call-Events eines nicht mehr angehängten Anrufs

use super::{Command, CommandParseError};
use crate::audio::{
    AudioDevice, AudioGate, AudioOutput, CaptureOutcome, CaptureStart, DeviceError, GateError,
    MediaStream, MicTicket, PlaybackError, RemoteAudio, DEFAULT_VOLUME,
};
use crate::call_engine::{CallError, CallSession, CallState};
use crate::events::{CoordinatorEvent, Envelope, EventSink};
use crate::identity::{Identity, IdentityError, IdentityPrompt, IdentityResolver, PromptReason};
use crate::status::{Notice, StatusEntry, StatusLog};
use crate::storage::{ProfileStores, StoreError};
use crate::transport::{CallId, PeerTransport, TransportError, TransportEvent, TransportFactory};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Microphone unavailable: {0}")]
    DeviceUnavailable(DeviceError),

    #[error("No microphone: start the microphone before transmitting")]
    NoMicrophone,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Not connected yet, wait until your ID is registered")]
    NotReady,

    #[error("Enter the ID of the peer to call")]
    EmptyTarget,

    #[error("No incoming call waiting for an answer")]
    NothingToAccept,

    #[error("Playback failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Profile storage failed: {0}")]
    Store(#[from] StoreError),
}

impl From<IdentityError> for CoordinatorError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::InvalidInput => {
                CoordinatorError::InvalidInput("radio ID must not be empty".to_string())
            }
            IdentityError::Store(e) => CoordinatorError::Store(e),
        }
    }
}

impl From<GateError> for CoordinatorError {
    fn from(error: GateError) -> Self {
        match error {
            GateError::DeviceUnavailable(e) => CoordinatorError::DeviceUnavailable(e),
            GateError::NoMicrophone => CoordinatorError::NoMicrophone,
        }
    }
}

impl From<CallError> for CoordinatorError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::EmptyTarget => CoordinatorError::EmptyTarget,
            CallError::NothingToAccept => CoordinatorError::NothingToAccept,
            CallError::Transport(e) => CoordinatorError::Transport(e),
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Nachfragen nach einer Kollision, bis wieder ein `Open` kommt
const MAX_COLLISION_PROMPTS: u32 = 3;

/// Verhalten des Koordinators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorConfig {
    /// Eingehende Anrufe sofort beantworten
    pub auto_answer: bool,
    /// Start-Lautstärke der Remote-Wiedergabe
    pub volume: f32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auto_answer: true,
            volume: DEFAULT_VOLUME,
        }
    }
}

/// Externe Fähigkeiten, die der Koordinator benutzt
pub struct Capabilities {
    pub stores: ProfileStores,
    pub prompt: Box<dyn IdentityPrompt>,
    pub device: Box<dyn AudioDevice>,
    pub output: Box<dyn AudioOutput>,
    pub transport: Box<dyn TransportFactory>,
}

// ============================================================================
// ENDPOINT STATE
// ============================================================================

/// Registrierungsstatus beim Transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EndpointState {
    Closed,
    Opening { id: String },
    Open { id: String },
    Failed { message: String },
}

// ============================================================================
// SESSION COORDINATOR
// ============================================================================

pub struct SessionCoordinator {
    resolver: IdentityResolver,
    prompt: Box<dyn IdentityPrompt>,
    device: Box<dyn AudioDevice>,
    factory: Box<dyn TransportFactory>,

    identity: Option<Identity>,
    transport: Option<Box<dyn PeerTransport>>,
    endpoint: EndpointState,
    /// Wird bei jeder neuen Registrierung erhöht
    generation: u64,
    collision_prompts: u32,

    gate: AudioGate,
    session: CallSession,
    remote: RemoteAudio,
    status: StatusLog,

    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl SessionCoordinator {
    /// Erstellt einen Koordinator; registriert wird erst mit `start`
    pub fn new(capabilities: Capabilities, config: CoordinatorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let Capabilities {
            stores,
            prompt,
            device,
            output,
            transport,
        } = capabilities;

        Self {
            resolver: IdentityResolver::new(stores),
            prompt,
            device,
            factory: transport,
            identity: None,
            transport: None,
            endpoint: EndpointState::Closed,
            generation: 0,
            collision_prompts: 0,
            gate: AudioGate::new(),
            session: CallSession::new(config.auto_answer),
            remote: RemoteAudio::new(output, config.volume),
            status: StatusLog::new(),
            tx,
            rx,
        }
    }

    /// Löst die Identität auf und registriert den Endpoint
    ///
    /// `my_id` ist erst nach dem `Open`-Event des Transports gesetzt.
    pub fn start(&mut self) -> Result<Identity, CoordinatorError> {
        tracing::info!("Starting session coordinator...");
        let identity = self.resolve_identity()?;
        self.open_endpoint()?;
        Ok(identity)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Beim Transport bestätigte ID
    pub fn my_id(&self) -> Option<&str> {
        match &self.endpoint {
            EndpointState::Open { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.endpoint, EndpointState::Open { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn endpoint(&self) -> &EndpointState {
        &self.endpoint
    }

    pub fn call_state(&self) -> CallState {
        self.session.state()
    }

    pub fn call_session(&self) -> &CallSession {
        &self.session
    }

    pub fn remote_peer_id(&self) -> Option<&str> {
        self.session.remote_peer_id()
    }

    pub fn is_capture_active(&self) -> bool {
        self.gate.is_capture_active()
    }

    pub fn is_transmitting(&self) -> bool {
        self.gate.is_transmitting()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.gate.stream()
    }

    /// Aktuell wiedergegebener Remote-Stream
    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote.source()
    }

    pub fn volume(&self) -> f32 {
        self.remote.volume()
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEntry> {
        self.status.subscribe()
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Führt einen Konsolenbefehl aus
    pub fn execute(&mut self, command: &Command) -> Result<(), CoordinatorError> {
        match command {
            Command::SetIdentity(id) => self.change_identity(id).map(|_| ()),
            Command::Call(peer) => self.place_call(peer).map(|_| ()),
            Command::HangUp => {
                self.hang_up();
                Ok(())
            }
            Command::StartMic => {
                self.start_mic();
                Ok(())
            }
            Command::StopMic => {
                self.stop_mic();
                Ok(())
            }
            Command::ToggleTransmit => self.toggle_transmit().map(|_| ()),
            Command::SetVolume(volume) => self.set_volume(*volume).map(|_| ()),
            Command::Accept => self.accept(),
            Command::Reject => self.reject(),
            Command::EnableAudio => self.enable_audio().map(|_| ()),
            // Werden vom Frontend selbst behandelt
            Command::Status | Command::Quit => Ok(()),
        }
    }

    /// Liest eine Konsolenzeile; ungültige Eingaben landen im Status
    pub fn parse_command(&mut self, line: &str) -> Option<Command> {
        match line.parse::<Command>() {
            Ok(command) => Some(command),
            Err(CommandParseError::Empty) => None,
            Err(e) => {
                self.report(CoordinatorError::InvalidInput(e.to_string()));
                None
            }
        }
    }

    /// Startet einen ausgehenden Anruf mit dem Gate-Stream (oder ohne)
    pub fn place_call(&mut self, remote_id: &str) -> Result<CallId, CoordinatorError> {
        if remote_id.trim().is_empty() {
            return Err(self.report(CoordinatorError::EmptyTarget));
        }
        if !self.is_ready() {
            return Err(self.report(CoordinatorError::NotReady));
        }

        if !self.session.is_idle() {
            self.remote.clear();
        }

        let local = self.gate.stream();
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.report(CoordinatorError::NotReady));
        };
        match self
            .session
            .place_call(transport.as_mut(), remote_id, local, &mut self.status)
        {
            Ok(call) => Ok(call),
            Err(e) => Err(self.report(e.into())),
        }
    }

    /// Legt auf; `false` wenn kein Anruf bestand
    pub fn hang_up(&mut self) -> bool {
        let ended = self.session.hang_up(&mut self.status);
        self.remote.clear();
        ended
    }

    /// Beantwortet einen klingelnden Anruf (nur ohne Auto-Answer nötig)
    pub fn accept(&mut self) -> Result<(), CoordinatorError> {
        let local = self.gate.stream();
        match self.session.accept(local, &mut self.status) {
            Ok(()) => Ok(()),
            Err(CallError::NothingToAccept) => {
                Err(self.report(CoordinatorError::NothingToAccept))
            }
            // CallSession hat den Fehler bereits gemeldet
            Err(e) => Err(e.into()),
        }
    }

    pub fn reject(&mut self) -> Result<(), CoordinatorError> {
        if self.session.reject(&mut self.status) {
            Ok(())
        } else {
            Err(self.report(CoordinatorError::NothingToAccept))
        }
    }

    /// Fordert das Mikrofon an
    ///
    /// Das Ergebnis kommt als Event; ein behaltener Stream wird sofort
    /// wieder aktiviert.
    pub fn start_mic(&mut self) -> CaptureStart {
        let events = self.event_sink();
        let start = self.gate.start_capture(self.device.as_mut(), &events);

        match start {
            CaptureStart::Resumed => {
                self.status.push(Notice::MicOn);
            }
            CaptureStart::Requested(ticket) => {
                tracing::debug!("Waiting for microphone permission ({:?})", ticket);
            }
            CaptureStart::AlreadyActive | CaptureStart::AlreadyPending => {
                tracing::debug!("Microphone start ignored: {:?}", start);
            }
        }

        start
    }

    /// Schaltet das Mikrofon stumm; der Stream bleibt erhalten
    pub fn stop_mic(&mut self) -> bool {
        let stopped = self.gate.stop_capture();
        if stopped {
            self.status.push(Notice::MicMuted);
        }
        stopped
    }

    pub fn set_transmit(&mut self, on: bool) -> Result<bool, CoordinatorError> {
        match self.gate.set_transmit(on) {
            Ok(true) => {
                self.status.push(Notice::Transmitting);
                Ok(true)
            }
            Ok(false) => {
                self.status.push(Notice::Listening);
                Ok(false)
            }
            Err(e) => Err(self.report(e.into())),
        }
    }

    pub fn toggle_transmit(&mut self) -> Result<bool, CoordinatorError> {
        self.set_transmit(!self.gate.is_transmitting())
    }

    /// Setzt die Lautstärke der Remote-Wiedergabe (0.0 - 1.0, begrenzt)
    pub fn set_volume(&mut self, volume: f32) -> Result<f32, CoordinatorError> {
        if volume.is_nan() {
            return Err(self.report(CoordinatorError::InvalidInput(
                "volume must be a number".to_string(),
            )));
        }

        let volume = self.remote.set_volume(volume);
        self.status.push(Notice::VolumeChanged { volume });
        Ok(volume)
    }

    /// Startet eine durch Autoplay blockierte Wiedergabe erneut
    pub fn enable_audio(&mut self) -> Result<bool, CoordinatorError> {
        match self.remote.resume() {
            Ok(true) => {
                if let Some(peer) = self.session.remote_peer_id() {
                    self.status.push(Notice::ReceivingAudio {
                        peer: peer.to_string(),
                    });
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => Err(self.report(e.into())),
        }
    }

    /// Setzt eine neue Permanent-ID und registriert von vorn
    ///
    /// Anruf und Endpoint werden abgebaut; der Mikrofon-Zustand bleibt.
    pub fn change_identity(&mut self, new_id: &str) -> Result<Identity, CoordinatorError> {
        self.collision_prompts = 0;
        self.reregister(new_id)
    }

    fn reregister(&mut self, new_id: &str) -> Result<Identity, CoordinatorError> {
        let permanent_id = match self.resolver.change_identity(new_id) {
            Ok(id) => id,
            Err(e) => return Err(self.report(e.into())),
        };

        self.hang_up();
        self.close_endpoint();
        self.identity = None;

        self.status.push(Notice::IdentityChanged { id: permanent_id });

        let identity = self.resolve_identity()?;
        self.open_endpoint()?;
        Ok(identity)
    }

    /// Beendet die Session und gibt den Tab-Slot frei
    pub fn shutdown(&mut self) -> Result<(), CoordinatorError> {
        tracing::info!("Shutting down session coordinator...");

        self.hang_up();
        self.gate.stop_capture();
        self.close_endpoint();

        if let Some(identity) = self.identity.take() {
            if let Err(e) = self.resolver.release(&identity) {
                return Err(self.report(e.into()));
            }
        }

        self.status.push(Notice::Shutdown);
        Ok(())
    }

    // ========================================================================
    // EVENT QUEUE
    // ========================================================================

    /// Verarbeitet alle bereits eingetroffenen Events
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            self.handle_event(envelope);
            handled += 1;
        }
        handled
    }

    /// Wartet auf das nächste Event und verarbeitet es
    pub async fn step(&mut self) {
        // Der Koordinator hält selbst einen Sender, die Queue schließt nie
        if let Some(envelope) = self.rx.recv().await {
            self.handle_event(envelope);
        }
    }

    pub fn handle_event(&mut self, envelope: Envelope) {
        match envelope.event {
            CoordinatorEvent::Microphone { ticket, result } => {
                self.on_microphone(ticket, result);
            }
            CoordinatorEvent::Transport(event) if envelope.generation != self.generation => {
                tracing::debug!(
                    "Dropping event of replaced endpoint (generation {} != {})",
                    envelope.generation,
                    self.generation
                );
                if let TransportEvent::IncomingCall(mut call) = event {
                    call.close();
                }
            }
            CoordinatorEvent::Transport(event) => self.on_transport_event(event),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open { id } => {
                let primary = self
                    .identity
                    .as_ref()
                    .map(|identity| identity.is_primary())
                    .unwrap_or(true);
                self.endpoint = EndpointState::Open { id: id.clone() };
                self.collision_prompts = 0;
                self.status.push(Notice::EndpointOpen { id, primary });
            }
            TransportEvent::Error(error) => self.on_endpoint_error(error),
            TransportEvent::IncomingCall(call) => {
                if !self.session.is_idle() {
                    self.remote.clear();
                }
                let local = self.gate.stream();
                if let Err(e) = self.session.receive_call(call, local, &mut self.status) {
                    tracing::warn!("Incoming call could not be answered: {}", e);
                }
            }
            TransportEvent::RemoteStream { call, stream } => {
                if let Some(stream) = self.session.on_remote_stream(call, stream, &mut self.status)
                {
                    self.play_remote(stream);
                }
            }
            TransportEvent::CallClosed { call } => {
                if self.session.on_remote_close(call, &mut self.status) {
                    self.remote.clear();
                }
            }
            TransportEvent::CallError { call, error } => {
                if self.session.on_call_error(call, &error, &mut self.status) {
                    self.remote.clear();
                }
            }
        }
    }

    fn on_microphone(&mut self, ticket: MicTicket, result: Result<MediaStream, DeviceError>) {
        match self.gate.complete_capture(ticket, result) {
            Ok(CaptureOutcome::Started(_)) => {
                self.status.push(Notice::MicOn);
            }
            Ok(CaptureOutcome::Discarded) => {}
            Err(e) => {
                self.report(e.into());
            }
        }
    }

    /// Fehler auf Endpoint-Ebene
    ///
    /// Ein laufender Anruf wird zurückgesetzt; eine belegte ID führt zur
    /// Nachfrage beim Benutzer.
    fn on_endpoint_error(&mut self, error: TransportError) {
        if self.session.on_transport_error(&mut self.status) {
            self.remote.clear();
        }

        match error {
            TransportError::IdUnavailable(id) => {
                self.endpoint = EndpointState::Failed {
                    message: format!("ID '{id}' is already taken"),
                };
                self.status.push(Notice::IdentityCollision { id: id.clone() });
                self.handle_collision(&id);
            }
            other => {
                let message = other.to_string();
                if !self.is_ready() {
                    self.endpoint = EndpointState::Failed {
                        message: message.clone(),
                    };
                }
                self.status.push(Notice::EndpointError { message });
            }
        }
    }

    /// Fragt nach einer neuen Permanent-ID und registriert von vorn
    ///
    /// Der neue Versuch läuft wieder über die Queue. Dieselbe ID wird nicht
    /// erneut registriert, und nach `MAX_COLLISION_PROMPTS` Nachfragen ohne
    /// `Open` wird nicht mehr gefragt.
    fn handle_collision(&mut self, id: &str) {
        if self.collision_prompts >= MAX_COLLISION_PROMPTS {
            tracing::warn!(
                "Giving up after {} colliding radio IDs",
                self.collision_prompts
            );
            self.status.push(Notice::InvalidInput {
                message: format!(
                    "Radio ID '{id}' is taken too, use set-identity to register"
                ),
            });
            return;
        }
        self.collision_prompts += 1;

        let answer = self
            .prompt
            .request_identity(&PromptReason::Collision { id: id.to_string() });

        match answer.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(new_id) if new_id == id => {
                tracing::debug!("Collision answer repeats the taken ID '{}'", id);
                self.status.push(Notice::InvalidInput {
                    message: format!(
                        "Radio ID '{id}' is already taken, use set-identity to register"
                    ),
                });
            }
            Some(new_id) => {
                let new_id = new_id.to_string();
                if let Err(e) = self.reregister(&new_id) {
                    tracing::warn!("Identity change after collision failed: {}", e);
                }
            }
            None => {
                self.status.push(Notice::InvalidInput {
                    message: "No new radio ID given, use set-identity to register".to_string(),
                });
            }
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn resolve_identity(&mut self) -> Result<Identity, CoordinatorError> {
        match self.resolver.resolve(self.prompt.as_mut()) {
            Ok(identity) => {
                self.identity = Some(identity.clone());
                Ok(identity)
            }
            Err(e) => Err(self.report(e.into())),
        }
    }

    /// Registriert den Endpoint unter der Session-ID neu
    fn open_endpoint(&mut self) -> Result<(), CoordinatorError> {
        let Some(session_id) = self.identity.as_ref().map(|i| i.session_id.clone()) else {
            return Err(self.report(CoordinatorError::NotReady));
        };

        self.close_endpoint();
        self.generation += 1;

        let events = self.event_sink();
        let mut transport = self.factory.create(events.clone());
        self.endpoint = EndpointState::Opening {
            id: session_id.clone(),
        };
        tracing::info!(
            "Registering '{}' (generation {})",
            session_id,
            self.generation
        );

        let opened = transport.open(&session_id);
        self.transport = Some(transport);

        // Ein sofortiger Fehler wird wie ein asynchron gemeldeter zugestellt
        if let Err(e) = opened {
            tracing::warn!("Registering '{}' failed: {}", session_id, e);
            events.transport(TransportEvent::Error(e));
        }
        Ok(())
    }

    fn close_endpoint(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.destroy();
            tracing::debug!("Endpoint destroyed (generation {})", self.generation);
        }
        self.endpoint = EndpointState::Closed;
    }

    fn event_sink(&self) -> EventSink {
        EventSink::new(self.tx.clone(), self.generation)
    }

    fn play_remote(&mut self, stream: MediaStream) {
        match self.remote.attach(stream) {
            Ok(()) => {}
            Err(e) => {
                self.report(e.into());
            }
        }
    }

    /// Meldet einen Fehler als Statusmeldung und gibt ihn zurück
    fn report(&mut self, error: CoordinatorError) -> CoordinatorError {
        let notice = match &error {
            CoordinatorError::InvalidInput(message) => Notice::InvalidInput {
                message: message.clone(),
            },
            CoordinatorError::EmptyTarget | CoordinatorError::NothingToAccept => {
                Notice::InvalidInput {
                    message: error.to_string(),
                }
            }
            CoordinatorError::DeviceUnavailable(e) => Notice::MicError {
                message: e.to_string(),
            },
            CoordinatorError::NoMicrophone => Notice::NoMicrophone,
            CoordinatorError::NotReady => Notice::NotReady,
            CoordinatorError::Transport(e) => Notice::CallFailed {
                message: e.to_string(),
            },
            CoordinatorError::Playback(PlaybackError::Blocked) => Notice::PlaybackBlocked,
            CoordinatorError::Playback(_) | CoordinatorError::Store(_) => Notice::Failure {
                message: error.to_string(),
            },
        };
        self.status.push(notice);
        error
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("identity", &self.identity)
            .field("endpoint", &self.endpoint)
            .field("generation", &self.generation)
            .field("gate", &self.gate)
            .field("session", &self.session)
            .field("remote", &self.remote)
            .finish()
    }
}

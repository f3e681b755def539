//! Audio-Geräte
//!
//! Mikrofon-Zugriff und Wiedergabe sind externe Fähigkeiten. Die
//! Mikrofon-Freigabe ist asynchron: das Gerät liefert das Ergebnis mit dem
//! Ticket der Anfrage über den `EventSink`.

use super::MediaStream;
use crate::events::EventSink;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No audio input device found")]
    NotFound,

    #[error("Audio device error: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Playback blocked until the user interacts with the page")]
    Blocked,

    #[error("Playback failed: {0}")]
    Failed(String),
}

// ============================================================================
// TRAITS
// ============================================================================

/// Kennung einer Mikrofon-Anfrage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MicTicket(u64);

impl MicTicket {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

/// Mikrofon-Zugriff
pub trait AudioDevice: Send {
    /// Startet eine Anfrage; das Ergebnis kommt über `events.microphone`
    fn request_microphone(&mut self, ticket: MicTicket, events: &EventSink);
}

/// Wiedergabe des Remote-Streams
pub trait AudioOutput: Send {
    fn play(&mut self, stream: &MediaStream) -> Result<(), PlaybackError>;

    fn clear(&mut self);

    /// Lautstärke im Bereich 0.0 - 1.0
    fn set_volume(&mut self, volume: f32);
}

// ============================================================================
// SYNTHETIC MICROPHONE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicBehaviour {
    Grant,
    Deny,
    Absent,
}

/// Mikrofon ohne Hardware
///
/// Antwortet sofort; Klone teilen den Anfragezähler.
#[derive(Debug, Clone)]
pub struct SyntheticMicrophone {
    behaviour: MicBehaviour,
    requests: Arc<AtomicUsize>,
}

impl SyntheticMicrophone {
    /// Gibt bei jeder Anfrage einen neuen Stream frei
    pub fn new() -> Self {
        Self::with(MicBehaviour::Grant)
    }

    /// Verweigert die Berechtigung
    pub fn denied() -> Self {
        Self::with(MicBehaviour::Deny)
    }

    /// Kein Eingabegerät vorhanden
    pub fn absent() -> Self {
        Self::with(MicBehaviour::Absent)
    }

    fn with(behaviour: MicBehaviour) -> Self {
        Self {
            behaviour,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Anzahl bisheriger Berechtigungsanfragen
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for SyntheticMicrophone {
    fn request_microphone(&mut self, ticket: MicTicket, events: &EventSink) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let result = match self.behaviour {
            MicBehaviour::Grant => Ok(MediaStream::new("synthetic microphone", 1)),
            MicBehaviour::Deny => Err(DeviceError::PermissionDenied),
            MicBehaviour::Absent => Err(DeviceError::NotFound),
        };
        events.microphone(ticket, result);
    }
}

// ============================================================================
// CPAL MICROPHONE
// ============================================================================

/// Prüft das Standard-Eingabegerät über cpal
///
/// Es wird nur die Verfügbarkeit geprüft; Capture und Encoding
/// übernimmt der Media-Stack des Transports.
#[cfg(feature = "cpal")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalMicrophone;

#[cfg(feature = "cpal")]
impl AudioDevice for CpalMicrophone {
    fn request_microphone(&mut self, ticket: MicTicket, events: &EventSink) {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let result = match host.default_input_device() {
            None => Err(DeviceError::NotFound),
            Some(device) => match device.default_input_config() {
                Ok(config) => {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| "default input".to_string());
                    tracing::info!(
                        "Microphone '{}' available: {} Hz, {} channel(s)",
                        name,
                        config.sample_rate().0,
                        config.channels()
                    );
                    Ok(MediaStream::new(name, 1))
                }
                Err(e) => Err(DeviceError::Failed(e.to_string())),
            },
        };
        events.microphone(ticket, result);
    }
}

// ============================================================================
// MEMORY OUTPUT
// ============================================================================

/// Zustand einer `MemoryOutput`
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// Aktuell angehängter Stream
    pub stream: Option<Uuid>,
    pub volume: f32,
    /// Erfolgreiche `play`-Aufrufe
    pub plays: usize,
    pub autoplay_blocked: bool,
}

/// Wiedergabe ohne Lautsprecher, merkt sich nur den Zustand
#[derive(Debug, Clone)]
pub struct MemoryOutput {
    state: Arc<Mutex<PlaybackState>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PlaybackState {
                stream: None,
                volume: super::DEFAULT_VOLUME,
                plays: 0,
                autoplay_blocked: false,
            })),
        }
    }

    /// Simuliert eine Autoplay-Sperre des Browsers
    pub fn block_autoplay(&self, blocked: bool) {
        self.state.lock().autoplay_blocked = blocked;
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.state.lock().clone()
    }
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for MemoryOutput {
    fn play(&mut self, stream: &MediaStream) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        state.stream = Some(stream.id());
        if state.autoplay_blocked {
            return Err(PlaybackError::Blocked);
        }
        state.plays += 1;
        Ok(())
    }

    fn clear(&mut self) {
        self.state.lock().stream = None;
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().volume = volume;
    }
}

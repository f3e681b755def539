//! Audio Gate - Mikrofon und Transmit
//!
//! Besitzt den lokalen Mikrofon-Stream. Der Gate-Zustand ist unabhängig
//! vom Call-Zustand; hörbar wird er nur während eines verbundenen Anrufs.
//!
//! Invariante: `transmitting` impliziert `capture_active`.

use super::{AudioDevice, DeviceError, MediaStream, MicTicket};
use crate::events::EventSink;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Microphone unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),

    #[error("No microphone: start the microphone before transmitting")]
    NoMicrophone,
}

/// Ergebnis von `start_capture`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStart {
    /// Anfrage an das Gerät gestellt
    Requested(MicTicket),
    /// Eine Anfrage läuft bereits
    AlreadyPending,
    /// Capture ist bereits aktiv
    AlreadyActive,
    /// Der behaltene Stream wurde ohne neue Anfrage reaktiviert
    Resumed,
}

/// Ergebnis einer abgeschlossenen Geräteanfrage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Started(MediaStream),
    /// Veraltete Antwort (stop_capture kam dazwischen)
    Discarded,
}

// ============================================================================
// AUDIO GATE
// ============================================================================

#[derive(Debug, Default)]
pub struct AudioGate {
    stream: Option<MediaStream>,
    capture_active: bool,
    transmitting: bool,
    pending: Option<MicTicket>,
    next_ticket: u64,
}

impl AudioGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capture_active(&self) -> bool {
        self.capture_active
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    /// Eine Geräteanfrage ist offen
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Stream für ausgehende Anrufe und Antworten
    ///
    /// Auch nach `stop_capture` wird der (deaktivierte) Stream geliefert;
    /// `None` nur wenn das Mikrofon nie gestartet wurde.
    pub fn stream(&self) -> Option<MediaStream> {
        self.stream.clone()
    }

    /// Startet den Mikrofon-Capture
    ///
    /// Idempotent: während einer offenen Anfrage oder bei aktivem Capture
    /// wird das Gerät nicht erneut gefragt.
    pub fn start_capture(&mut self, device: &mut dyn AudioDevice, events: &EventSink) -> CaptureStart {
        if self.capture_active {
            return CaptureStart::AlreadyActive;
        }
        if self.pending.is_some() {
            return CaptureStart::AlreadyPending;
        }

        if let Some(stream) = &self.stream {
            stream.set_enabled(false);
            self.capture_active = true;
            self.transmitting = false;
            tracing::info!("Microphone resumed without new permission request");
            return CaptureStart::Resumed;
        }

        self.next_ticket += 1;
        let ticket = MicTicket::new(self.next_ticket);
        self.pending = Some(ticket);

        tracing::debug!("Requesting microphone ({:?})", ticket);
        device.request_microphone(ticket, events);

        CaptureStart::Requested(ticket)
    }

    /// Verarbeitet die Antwort des Geräts
    pub fn complete_capture(
        &mut self,
        ticket: MicTicket,
        result: Result<MediaStream, DeviceError>,
    ) -> Result<CaptureOutcome, GateError> {
        if self.pending != Some(ticket) {
            tracing::debug!("Discarding stale microphone result ({:?})", ticket);
            if let Ok(stream) = result {
                stream.set_enabled(false);
            }
            return Ok(CaptureOutcome::Discarded);
        }
        self.pending = None;

        let stream = result?;

        // Startet stumm, Transmit entscheidet der Aufrufer
        stream.set_enabled(false);
        self.stream = Some(stream.clone());
        self.capture_active = true;
        self.transmitting = false;

        tracing::info!("Microphone captured: {}", stream.label());
        Ok(CaptureOutcome::Started(stream))
    }

    /// Deaktiviert die Tracks; der Stream bleibt erhalten
    ///
    /// Gibt `true` zurück wenn Capture aktiv war oder eine Anfrage lief.
    pub fn stop_capture(&mut self) -> bool {
        let changed = self.capture_active || self.pending.is_some();

        self.pending = None;
        if let Some(stream) = &self.stream {
            stream.set_enabled(false);
        }
        self.capture_active = false;
        self.transmitting = false;

        changed
    }

    /// Setzt Transmit; ohne Capture bleibt `transmitting` immer `false`
    pub fn set_transmit(&mut self, on: bool) -> Result<bool, GateError> {
        if !self.capture_active {
            self.transmitting = false;
            return Err(GateError::NoMicrophone);
        }

        if let Some(stream) = &self.stream {
            stream.set_enabled(on);
        }
        self.transmitting = on;
        tracing::debug!("Transmit: {}", on);

        Ok(on)
    }

    pub fn toggle_transmit(&mut self) -> Result<bool, GateError> {
        self.set_transmit(!self.transmitting)
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Remote Audio - Wiedergabe der Gegenstelle
//!
//! Hält den aktuell angehängten Remote-Stream und die Lautstärke.
//! Scheitert die Wiedergabe an einer Autoplay-Sperre, bleibt der Stream
//! angehängt und kann später mit `resume` gestartet werden.

use super::{AudioOutput, MediaStream, PlaybackError};

/// Standard-Lautstärke der Wiedergabe
pub const DEFAULT_VOLUME: f32 = 0.6;

pub struct RemoteAudio {
    output: Box<dyn AudioOutput>,
    source: Option<MediaStream>,
    volume: f32,
    blocked: bool,
}

impl RemoteAudio {
    pub fn new(mut output: Box<dyn AudioOutput>, volume: f32) -> Self {
        let volume = clamp_volume(volume).unwrap_or(DEFAULT_VOLUME);
        output.set_volume(volume);
        Self {
            output,
            source: None,
            volume,
            blocked: false,
        }
    }

    pub fn source(&self) -> Option<&MediaStream> {
        self.source.as_ref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Wiedergabe wartet auf eine Benutzerinteraktion
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Hängt einen Remote-Stream an und startet die Wiedergabe
    pub fn attach(&mut self, stream: MediaStream) -> Result<(), PlaybackError> {
        self.source = Some(stream.clone());
        self.play(&stream)
    }

    /// Entfernt den Remote-Stream
    pub fn clear(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!("Remote audio sink cleared");
        }
        self.blocked = false;
        self.output.clear();
    }

    /// Startet eine blockierte Wiedergabe erneut
    ///
    /// `Ok(false)` wenn kein Stream angehängt ist.
    pub fn resume(&mut self) -> Result<bool, PlaybackError> {
        match self.source.clone() {
            Some(stream) => self.play(&stream).map(|_| true),
            None => Ok(false),
        }
    }

    /// Setzt die Lautstärke, Werte außerhalb 0.0 - 1.0 werden begrenzt
    ///
    /// NaN wird ignoriert. Gibt die wirksame Lautstärke zurück.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        if let Some(volume) = clamp_volume(volume) {
            self.volume = volume;
            self.output.set_volume(volume);
        }
        self.volume
    }

    fn play(&mut self, stream: &MediaStream) -> Result<(), PlaybackError> {
        match self.output.play(stream) {
            Ok(()) => {
                self.blocked = false;
                Ok(())
            }
            Err(e) => {
                self.blocked = matches!(e, PlaybackError::Blocked);
                tracing::warn!("Remote playback failed: {}", e);
                Err(e)
            }
        }
    }
}

fn clamp_volume(volume: f32) -> Option<f32> {
    if volume.is_nan() {
        None
    } else {
        Some(volume.clamp(0.0, 1.0))
    }
}

impl std::fmt::Debug for RemoteAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAudio")
            .field("source", &self.source.as_ref().map(MediaStream::id))
            .field("volume", &self.volume)
            .field("blocked", &self.blocked)
            .finish()
    }
}

//! Media Streams
//!
//! Ein Stream besteht aus Audio-Tracks, deren `enabled`-Flag von allen
//! Klonen geteilt wird. Ein Call, der einen Klon hält, sieht eine Änderung
//! am Gate sofort, ohne neue Aushandlung.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Einzelner Audio-Track
#[derive(Debug, Clone)]
pub struct AudioTrack {
    id: Uuid,
    enabled: Arc<AtomicBool>,
}

impl AudioTrack {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// Audio-Stream (Mikrofon oder Gegenstelle)
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    label: String,
    tracks: Arc<Vec<AudioTrack>>,
}

impl MediaStream {
    /// Neuer Stream mit `track_count` aktivierten Tracks
    pub fn new(label: impl Into<String>, track_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            tracks: Arc::new((0..track_count).map(|_| AudioTrack::new()).collect()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn audio_tracks(&self) -> &[AudioTrack] {
        &self.tracks
    }

    /// Setzt `enabled` auf allen Tracks
    pub fn set_enabled(&self, enabled: bool) {
        for track in self.tracks.iter() {
            track.set_enabled(enabled);
        }
    }

    /// Mindestens ein Track sendet
    pub fn is_enabled(&self) -> bool {
        self.tracks.iter().any(AudioTrack::is_enabled)
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaStream {}

//! Audio Module - Mikrofon-Gate und Wiedergabe
//!
//! Dieses Modul verwaltet:
//! - Den lokalen Mikrofon-Stream (AudioGate, Mute/Transmit)
//! - Die Wiedergabe des Remote-Streams (Lautstärke, Autoplay-Sperre)
//! - Die abstrakten Geräte-Schnittstellen (AudioDevice, AudioOutput)

mod device;
mod gate;
mod remote;
mod stream;

#[cfg(feature = "cpal")]
pub use device::CpalMicrophone;
pub use device::{
    AudioDevice, AudioOutput, DeviceError, MemoryOutput, MicTicket, PlaybackError,
    PlaybackState, SyntheticMicrophone,
};
pub use gate::{AudioGate, CaptureOutcome, CaptureStart, GateError};
pub use remote::{RemoteAudio, DEFAULT_VOLUME};
pub use stream::{AudioTrack, MediaStream};

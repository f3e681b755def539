//! Event Queue
//!
//! Alle asynchronen Ergebnisse (Transport-Callbacks, Mikrofon-Freigabe)
//! landen als `Envelope` in einer einzigen Queue des Koordinators und
//! werden dort in Ankunftsreihenfolge verarbeitet.

use crate::audio::{DeviceError, MediaStream, MicTicket};
use crate::transport::TransportEvent;
use tokio::sync::mpsc;

/// Ein Event aus der Außenwelt
#[derive(Debug)]
pub enum CoordinatorEvent {
    Transport(TransportEvent),
    Microphone {
        ticket: MicTicket,
        result: Result<MediaStream, DeviceError>,
    },
}

/// Event mit der Endpoint-Generation, unter der es erzeugt wurde
#[derive(Debug)]
pub struct Envelope {
    pub generation: u64,
    pub event: CoordinatorEvent,
}

/// Sendeseite der Queue
///
/// Jeder Transport bekommt einen Sink mit eigener Generation; Events eines
/// bereits ersetzten Transports werden dadurch erkannt und verworfen.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Envelope>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Liefert ein Transport-Event; `false` wenn der Koordinator weg ist
    pub fn transport(&self, event: TransportEvent) -> bool {
        self.send(CoordinatorEvent::Transport(event))
    }

    /// Liefert das Ergebnis einer Mikrofon-Anfrage
    pub fn microphone(&self, ticket: MicTicket, result: Result<MediaStream, DeviceError>) -> bool {
        self.send(CoordinatorEvent::Microphone { ticket, result })
    }

    fn send(&self, event: CoordinatorEvent) -> bool {
        let sent = self
            .tx
            .send(Envelope {
                generation: self.generation,
                event,
            })
            .is_ok();
        if !sent {
            tracing::debug!("Event queue closed, dropping event");
        }
        sent
    }
}

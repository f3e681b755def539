//! Call Engine Module - Zustandsmaschine eines Anrufs
//!
//! Dieses Modul verwaltet:
//! - Ausgehende und eingehende Anrufe (Auto-Answer als Policy)
//! - Übergänge Idle → Dialing/Ringing → Connected → Idle
//! - Idempotenten Abbau bei Hang-up, Remote-Close und Fehlern

mod session;

pub use session::{CallDirection, CallError, CallSession, CallState, EndReason};

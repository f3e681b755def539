//! Identity Module - Permanent- und Session-ID
//!
//! Dieses Modul verwaltet die Identität des Benutzers:
//! - Permanente Radio-ID (vom Benutzer gewählt oder zufällig erzeugt)
//! - Kollisionsfreie Session-ID pro Tab (`{id}_temp{n}`)
//! - Vollständiger Reset beim Wechsel der Identität
//!

mod resolver;

pub use resolver::{
    random_radio_id, FixedPrompt, Identity, IdentityError, IdentityPrompt, IdentityResolver,
    NoPrompt, PromptReason, PERMANENT_ID_KEY, SESSION_ACTIVE_KEY, TAB_COUNT_KEY, TAB_ID_KEY,
};

//! Identity Resolver
//!
//! Leitet aus dem Profilspeicher eine stabile Permanent-ID und eine
//! pro Tab eindeutige Session-ID ab.
//!
//! ## Verwendung
//! ```rust
//! use ham_radio_lib::identity::{FixedPrompt, IdentityResolver};
//! use ham_radio_lib::storage::ProfileStores;
//!
//! let resolver = IdentityResolver::new(ProfileStores::in_memory());
//! let identity = resolver.resolve(&mut FixedPrompt::new("alice")).unwrap();
//! assert_eq!(identity.session_id, "alice");
//! ```

use crate::storage::{ProfileStores, StoreError};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Persistente Permanent-ID
pub const PERMANENT_ID_KEY: &str = "myRadioId";

/// Persistenter Zähler der gleichzeitig registrierten Tabs
pub const TAB_COUNT_KEY: &str = "tabCount";

/// Session-Scope: die für diesen Tab abgeleitete ID
pub const TAB_ID_KEY: &str = "myTabRadioId";

/// Session-Scope: Slot-Nummer dieses Tabs
const TAB_SLOT_KEY: &str = "myTabSlot";

/// Session-Scope: Marker für eine laufende Session
pub const SESSION_ACTIVE_KEY: &str = "sessionActive";

/// Präfix für zufällig erzeugte IDs
const RANDOM_ID_PREFIX: &str = "radio_";

/// Länge des zufälligen Anteils
const RANDOM_ID_LEN: usize = 8;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid identity: must not be empty")]
    InvalidInput,

    #[error("Identity storage failed: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// IDENTITY
// ============================================================================

/// Aufgelöste Identität eines Tabs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Stabile, persistierte ID des Benutzers
    pub permanent_id: String,
    /// Beim Transport registrierte ID dieses Tabs
    pub session_id: String,
    /// 1-basierter Tab-Slot
    pub slot: u64,
}

impl Identity {
    /// Erster Tab im Profil (Session-ID == Permanent-ID)
    pub fn is_primary(&self) -> bool {
        self.session_id == self.permanent_id
    }
}

// ============================================================================
// PROMPT
// ============================================================================

/// Warum der Benutzer nach einer ID gefragt wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptReason {
    /// Noch keine Permanent-ID gespeichert
    FirstRun,
    /// Die Session-ID ist bereits anderswo registriert
    Collision { id: String },
}

/// Fragt den Benutzer nach einer Radio-ID
///
/// `None` oder ein leerer String bedeutet "keine Angabe".
pub trait IdentityPrompt: Send {
    fn request_identity(&mut self, reason: &PromptReason) -> Option<String>;
}

impl<F> IdentityPrompt for F
where
    F: FnMut(&PromptReason) -> Option<String> + Send,
{
    fn request_identity(&mut self, reason: &PromptReason) -> Option<String> {
        self(reason)
    }
}

/// Fragt nie; beim ersten Start wird eine zufällige ID erzeugt
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl IdentityPrompt for NoPrompt {
    fn request_identity(&mut self, _reason: &PromptReason) -> Option<String> {
        None
    }
}

/// Antwortet nur beim ersten Start mit einer festen ID
///
/// Bei Kollisionen gibt es keine Antwort, sonst würde dieselbe ID
/// endlos erneut kollidieren.
#[derive(Debug, Clone)]
pub struct FixedPrompt {
    id: String,
}

impl FixedPrompt {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl IdentityPrompt for FixedPrompt {
    fn request_identity(&mut self, reason: &PromptReason) -> Option<String> {
        match reason {
            PromptReason::FirstRun => Some(self.id.clone()),
            PromptReason::Collision { .. } => None,
        }
    }
}

/// Erzeugt `radio_` + 8 zufällige Base-36 Zeichen
pub fn random_radio_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RANDOM_ID_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{RANDOM_ID_PREFIX}{suffix}")
}

fn normalize(candidate: Option<String>) -> Option<String> {
    candidate
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Löst Identitäten gegen die Profilspeicher auf
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    stores: ProfileStores,
}

impl IdentityResolver {
    pub fn new(stores: ProfileStores) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &ProfileStores {
        &self.stores
    }

    /// Ermittelt Permanent- und Session-ID
    ///
    /// Ein Tab, der bereits einen Slot besitzt, behält ihn; sonst wird
    /// der nächste Slot atomar beansprucht.
    pub fn resolve(&self, prompt: &mut dyn IdentityPrompt) -> Result<Identity, IdentityError> {
        let permanent_id = match normalize(self.stores.persistent.get(PERMANENT_ID_KEY)?) {
            Some(id) => id,
            None => {
                let id = normalize(prompt.request_identity(&PromptReason::FirstRun))
                    .unwrap_or_else(random_radio_id);
                tracing::info!("Persisting new permanent radio id '{}'", id);
                self.stores.persistent.set(PERMANENT_ID_KEY, &id)?;
                id
            }
        };

        let existing = (
            self.stores.session.get(TAB_ID_KEY)?,
            self.stores.session.get(TAB_SLOT_KEY)?,
        );

        let (session_id, slot) = match existing {
            (Some(tab_id), Some(slot)) => match slot.parse::<u64>() {
                Ok(slot) => (tab_id, slot),
                Err(_) => self.claim_slot(&permanent_id)?,
            },
            _ => self.claim_slot(&permanent_id)?,
        };

        self.stores.session.set(SESSION_ACTIVE_KEY, "true")?;

        tracing::info!(
            "Resolved identity: permanent='{}' session='{}' slot={}",
            permanent_id,
            session_id,
            slot
        );

        Ok(Identity {
            permanent_id,
            session_id,
            slot,
        })
    }

    /// Beansprucht den nächsten Tab-Slot und leitet die Session-ID ab
    fn claim_slot(&self, permanent_id: &str) -> Result<(String, u64), IdentityError> {
        let slot = self.stores.persistent.increment(TAB_COUNT_KEY)?;

        let session_id = if slot <= 1 {
            permanent_id.to_string()
        } else {
            format!("{}_temp{}", permanent_id, slot - 1)
        };

        self.stores.session.set(TAB_ID_KEY, &session_id)?;
        self.stores.session.set(TAB_SLOT_KEY, &slot.to_string())?;

        Ok((session_id, slot.max(1)))
    }

    /// Setzt eine neue Permanent-ID und verwirft alle abgeleiteten IDs
    ///
    /// Bei leerer Eingabe bleibt der Speicher unverändert. Danach muss der
    /// Aufrufer `resolve` und die Transport-Registrierung neu starten.
    pub fn change_identity(&self, new_id: &str) -> Result<String, IdentityError> {
        let new_id = new_id.trim();
        if new_id.is_empty() {
            return Err(IdentityError::InvalidInput);
        }

        tracing::info!("Changing permanent radio id to '{}'", new_id);

        self.stores.persistent.set(PERMANENT_ID_KEY, new_id)?;
        self.stores.persistent.remove(TAB_COUNT_KEY)?;
        self.clear_session()?;

        Ok(new_id.to_string())
    }

    /// Gibt den Slot dieses Tabs frei
    ///
    /// Der Zähler wird nur verringert, wenn dieser Tab den höchsten Slot
    /// hält; ein älterer Tab würde sonst seinen Suffix an einen neuen Tab
    /// weitergeben.
    pub fn release(&self, identity: &Identity) -> Result<(), IdentityError> {
        let released = self
            .stores
            .persistent
            .decrement_if(TAB_COUNT_KEY, identity.slot)?;
        tracing::debug!(
            "Released tab slot {} (counter decremented: {})",
            identity.slot,
            released
        );
        self.clear_session()
    }

    fn clear_session(&self) -> Result<(), IdentityError> {
        self.stores.session.remove(TAB_ID_KEY)?;
        self.stores.session.remove(TAB_SLOT_KEY)?;
        self.stores.session.remove(SESSION_ACTIVE_KEY)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

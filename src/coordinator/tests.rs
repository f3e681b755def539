//! Szenarien über das Loopback-Netzwerk
//!
//! Jeder `Radio` ist ein Tab mit eigenem Koordinator; `pump` stellt die
//! Events zu, die der Transport inzwischen geliefert hat.

use super::*;
use crate::audio::{CaptureStart, MediaStream, MemoryOutput, SyntheticMicrophone};
use crate::call_engine::{CallDirection, CallState, EndReason};
use crate::events::EventSink;
use crate::identity::{FixedPrompt, IdentityPrompt, PromptReason, PERMANENT_ID_KEY};
use crate::status::Notice;
use crate::storage::{KeyValueStore, ProfileStores};
use crate::transport::{
    CallHandle, LoopbackNetwork, PeerTransport, TransportError, TransportEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Radio {
    coordinator: SessionCoordinator,
    mic: SyntheticMicrophone,
    output: MemoryOutput,
    stores: ProfileStores,
}

impl Radio {
    fn new(
        network: &LoopbackNetwork,
        stores: ProfileStores,
        prompt: impl IdentityPrompt + 'static,
        mic: SyntheticMicrophone,
        config: CoordinatorConfig,
    ) -> Self {
        let output = MemoryOutput::new();
        let coordinator = SessionCoordinator::new(
            Capabilities {
                stores: stores.clone(),
                prompt: Box::new(prompt),
                device: Box::new(mic.clone()),
                output: Box::new(output.clone()),
                transport: Box::new(network.clone()),
            },
            config,
        );
        Self {
            coordinator,
            mic,
            output,
            stores,
        }
    }

    /// Frisches Profil, beim Transport registriert
    fn online(network: &LoopbackNetwork, id: &str) -> Self {
        let mut radio = Self::new(
            network,
            ProfileStores::in_memory(),
            FixedPrompt::new(id),
            SyntheticMicrophone::new(),
            CoordinatorConfig::default(),
        );
        radio.coordinator.start().unwrap();
        radio.coordinator.pump();
        assert_eq!(radio.coordinator.my_id(), Some(id));
        radio
    }

    /// Wie `online`, mit freigegebenem Mikrofon
    fn online_with_mic(network: &LoopbackNetwork, id: &str) -> Self {
        let mut radio = Self::online(network, id);
        radio.coordinator.start_mic();
        radio.coordinator.pump();
        assert!(radio.coordinator.is_capture_active());
        radio
    }

    fn has_notice(&self, predicate: impl Fn(&Notice) -> bool) -> bool {
        self.coordinator.status().notices().any(predicate)
    }
}

/// Transport, dessen `open` sofort antwortet
///
/// Belegte IDs und Ausfälle kommen als `Err` direkt aus `open`, nicht als Event.
#[derive(Debug)]
struct ImmediateTransport {
    events: EventSink,
    taken: Vec<String>,
    failure: Option<TransportError>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl PeerTransport for ImmediateTransport {
    fn open(&mut self, id: &str) -> Result<(), TransportError> {
        self.opened.lock().push(id.to_string());
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.taken.iter().any(|taken| taken == id) {
            return Err(TransportError::IdUnavailable(id.to_string()));
        }
        self.events.transport(TransportEvent::Open { id: id.to_string() });
        Ok(())
    }

    fn call(
        &mut self,
        _remote_id: &str,
        _local: Option<MediaStream>,
    ) -> Result<Box<dyn CallHandle>, TransportError> {
        Err(TransportError::NotOpen)
    }

    fn destroy(&mut self) {}
}

/// Koordinator über `ImmediateTransport`, dazu die Liste der `open`-Aufrufe
fn immediate_coordinator(
    taken: &[&str],
    failure: Option<TransportError>,
    prompt: impl IdentityPrompt + 'static,
) -> (SessionCoordinator, Arc<Mutex<Vec<String>>>) {
    let opened = Arc::new(Mutex::new(Vec::new()));
    let taken: Vec<String> = taken.iter().map(|id| id.to_string()).collect();
    let log = opened.clone();
    let factory = move |events: EventSink| -> Box<dyn PeerTransport> {
        Box::new(ImmediateTransport {
            events,
            taken: taken.clone(),
            failure: failure.clone(),
            opened: log.clone(),
        })
    };

    let coordinator = SessionCoordinator::new(
        Capabilities {
            stores: ProfileStores::in_memory(),
            prompt: Box::new(prompt),
            device: Box::new(SyntheticMicrophone::new()),
            output: Box::new(MemoryOutput::new()),
            transport: Box::new(factory),
        },
        CoordinatorConfig::default(),
    );
    (coordinator, opened)
}

// ============================================================================
// IDENTITY
// ============================================================================

#[test]
fn test_fresh_profile_uses_prompted_id() {
    let network = LoopbackNetwork::new();
    let radio = Radio::online(&network, "alice");

    let identity = radio.coordinator.identity().unwrap();
    assert_eq!(identity.permanent_id, "alice");
    assert_eq!(identity.session_id, "alice");
    assert!(network.is_registered("alice"));
    assert!(radio.has_notice(|n| *n
        == Notice::EndpointOpen {
            id: "alice".to_string(),
            primary: true
        }));
}

#[test]
fn test_second_tab_gets_temporary_id() {
    let network = LoopbackNetwork::new();
    let first = Radio::online(&network, "alice");

    let mut second = Radio::new(
        &network,
        first.stores.new_tab(),
        FixedPrompt::new("ignored"),
        SyntheticMicrophone::new(),
        CoordinatorConfig::default(),
    );
    let identity = second.coordinator.start().unwrap();
    second.coordinator.pump();

    assert_eq!(identity.permanent_id, "alice");
    assert_eq!(identity.session_id, "alice_temp1");
    assert_eq!(second.coordinator.my_id(), Some("alice_temp1"));
    assert!(second.has_notice(|n| *n
        == Notice::EndpointOpen {
            id: "alice_temp1".to_string(),
            primary: false
        }));
}

#[test]
fn test_not_ready_until_open_event() {
    let network = LoopbackNetwork::new();
    let mut radio = Radio::new(
        &network,
        ProfileStores::in_memory(),
        FixedPrompt::new("alice"),
        SyntheticMicrophone::new(),
        CoordinatorConfig::default(),
    );
    radio.coordinator.start().unwrap();

    assert_eq!(
        radio.coordinator.endpoint(),
        &EndpointState::Opening {
            id: "alice".to_string()
        }
    );
    assert_eq!(radio.coordinator.my_id(), None);
    assert!(matches!(
        radio.coordinator.place_call("bob"),
        Err(CoordinatorError::NotReady)
    ));
    assert!(radio.has_notice(|n| *n == Notice::NotReady));
    assert_eq!(radio.coordinator.call_state(), CallState::Idle);
}

#[test]
fn test_change_identity_rejects_blank() {
    let network = LoopbackNetwork::new();
    let mut radio = Radio::online(&network, "alice");

    assert!(matches!(
        radio.coordinator.change_identity("   "),
        Err(CoordinatorError::InvalidInput(_))
    ));
    assert_eq!(
        radio.stores.persistent.get(PERMANENT_ID_KEY).unwrap(),
        Some("alice".to_string())
    );
    assert_eq!(radio.coordinator.my_id(), Some("alice"));
    assert!(network.is_registered("alice"));
}

#[test]
fn test_change_identity_reregisters_and_keeps_mic() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online_with_mic(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");

    alice.coordinator.place_call("bob").unwrap();
    bob.coordinator.pump();
    alice.coordinator.pump();
    assert_eq!(alice.coordinator.call_state(), CallState::Connected);

    let identity = alice.coordinator.change_identity(" carol ").unwrap();
    assert_eq!(identity.permanent_id, "carol");
    assert_eq!(identity.session_id, "carol");
    assert_eq!(alice.coordinator.call_state(), CallState::Idle);
    assert!(alice.coordinator.remote_stream().is_none());

    alice.coordinator.pump();
    assert_eq!(alice.coordinator.my_id(), Some("carol"));
    assert_eq!(network.registered_ids(), vec!["bob", "carol"]);
    assert!(alice.coordinator.is_capture_active());

    bob.coordinator.pump();
    assert_eq!(bob.coordinator.call_state(), CallState::Idle);
}

#[test]
fn test_collision_prompts_for_new_id() {
    let network = LoopbackNetwork::new();
    let _other = Radio::online(&network, "alice");

    let prompt = |reason: &PromptReason| match reason {
        PromptReason::FirstRun => Some("alice".to_string()),
        PromptReason::Collision { .. } => Some("alice2".to_string()),
    };
    let mut radio = Radio::new(
        &network,
        ProfileStores::in_memory(),
        prompt,
        SyntheticMicrophone::new(),
        CoordinatorConfig::default(),
    );
    radio.coordinator.start().unwrap();
    radio.coordinator.pump();

    assert!(radio.has_notice(|n| *n
        == Notice::IdentityCollision {
            id: "alice".to_string()
        }));
    assert_eq!(radio.coordinator.my_id(), Some("alice2"));
    assert_eq!(
        radio.stores.persistent.get(PERMANENT_ID_KEY).unwrap(),
        Some("alice2".to_string())
    );
}

#[test]
fn test_collision_without_answer_stays_not_ready() {
    let network = LoopbackNetwork::new();
    let _other = Radio::online(&network, "alice");

    let mut radio = Radio::new(
        &network,
        ProfileStores::in_memory(),
        FixedPrompt::new("alice"),
        SyntheticMicrophone::new(),
        CoordinatorConfig::default(),
    );
    radio.coordinator.start().unwrap();
    radio.coordinator.pump();

    assert!(!radio.coordinator.is_ready());
    assert!(matches!(
        radio.coordinator.endpoint(),
        EndpointState::Failed { .. }
    ));
    assert!(radio.has_notice(|n| matches!(n, Notice::InvalidInput { .. })));

    radio.coordinator.change_identity("alice3").unwrap();
    radio.coordinator.pump();
    assert_eq!(radio.coordinator.my_id(), Some("alice3"));
}

#[test]
fn test_immediate_collision_recovers_on_start() {
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    let prompt = move |reason: &PromptReason| match reason {
        PromptReason::FirstRun => Some("alice".to_string()),
        PromptReason::Collision { .. } => {
            counter.fetch_add(1, Ordering::SeqCst);
            Some("alice2".to_string())
        }
    };
    let (mut coordinator, opened) = immediate_coordinator(&["alice"], None, prompt);

    let identity = coordinator.start().unwrap();
    assert_eq!(identity.session_id, "alice");
    assert_eq!(
        coordinator.endpoint(),
        &EndpointState::Opening {
            id: "alice".to_string()
        }
    );

    coordinator.pump();
    assert_eq!(coordinator.my_id(), Some("alice2"));
    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(*opened.lock(), vec!["alice", "alice2"]);
    assert!(coordinator.status().notices().any(|n| *n
        == Notice::IdentityCollision {
            id: "alice".to_string()
        }));
}

#[test]
fn test_repeated_taken_answer_is_not_registered_again() {
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    let prompt = move |reason: &PromptReason| {
        if matches!(reason, PromptReason::Collision { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Some("alice".to_string())
    };
    let (mut coordinator, opened) = immediate_coordinator(&["alice"], None, prompt);

    coordinator.start().unwrap();
    assert_eq!(coordinator.pump(), 1);
    assert_eq!(coordinator.pump(), 0);

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(*opened.lock(), vec!["alice"]);
    assert!(!coordinator.is_ready());
    assert!(matches!(
        coordinator.endpoint(),
        EndpointState::Failed { .. }
    ));
    assert!(coordinator
        .status()
        .notices()
        .any(|n| matches!(n, Notice::InvalidInput { .. })));
}

#[test]
fn test_collision_prompts_are_bounded() {
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    let mut answers = vec!["alice2", "alice3", "alice4", "alice5"].into_iter();
    let prompt = move |reason: &PromptReason| match reason {
        PromptReason::FirstRun => Some("alice".to_string()),
        PromptReason::Collision { .. } => {
            counter.fetch_add(1, Ordering::SeqCst);
            answers.next().map(str::to_string)
        }
    };
    let taken = ["alice", "alice2", "alice3", "alice4", "alice5"];
    let (mut coordinator, opened) = immediate_coordinator(&taken, None, prompt);

    coordinator.start().unwrap();
    assert_eq!(coordinator.pump(), 4);

    assert_eq!(asked.load(Ordering::SeqCst), 3);
    assert_eq!(*opened.lock(), vec!["alice", "alice2", "alice3", "alice4"]);
    assert!(!coordinator.is_ready());

    // Ein ausdrücklicher Wechsel fragt wieder von vorn
    coordinator.change_identity("bob").unwrap();
    coordinator.pump();
    assert_eq!(coordinator.my_id(), Some("bob"));
}

#[test]
fn test_immediate_open_error_fails_endpoint() {
    let failure = TransportError::Other("signaling down".to_string());
    let (mut coordinator, opened) =
        immediate_coordinator(&[], Some(failure), FixedPrompt::new("alice"));

    coordinator.start().unwrap();
    coordinator.pump();

    assert_eq!(*opened.lock(), vec!["alice"]);
    assert_eq!(
        coordinator.endpoint(),
        &EndpointState::Failed {
            message: "Transport error: signaling down".to_string()
        }
    );
    assert!(coordinator.status().notices().any(|n| *n
        == Notice::EndpointError {
            message: "Transport error: signaling down".to_string()
        }));
    assert!(!coordinator
        .status()
        .notices()
        .any(|n| matches!(n, Notice::IdentityCollision { .. })));
}

#[test]
fn test_shutdown_releases_slot() {
    let network = LoopbackNetwork::new();
    let mut first = Radio::online(&network, "alice");
    let stores = first.stores.clone();

    first.coordinator.shutdown().unwrap();
    assert!(!network.is_registered("alice"));
    assert_eq!(first.coordinator.endpoint(), &EndpointState::Closed);
    assert!(first.has_notice(|n| *n == Notice::Shutdown));

    let mut restarted = Radio::new(
        &network,
        stores.new_tab(),
        FixedPrompt::new("ignored"),
        SyntheticMicrophone::new(),
        CoordinatorConfig::default(),
    );
    let identity = restarted.coordinator.start().unwrap();
    assert_eq!(identity.session_id, "alice");
}

// ============================================================================
// CALLS
// ============================================================================

#[test]
fn test_call_without_mic_connects_on_remote_stream() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");

    alice.coordinator.place_call("bob").unwrap();
    assert_eq!(alice.coordinator.call_state(), CallState::Dialing);
    assert_eq!(alice.coordinator.local_stream(), None);

    // bob beantwortet automatisch mit seinem Stream
    bob.coordinator.pump();
    assert_eq!(bob.coordinator.call_state(), CallState::Ringing);
    assert_eq!(bob.coordinator.remote_peer_id(), Some("alice"));
    assert_eq!(
        bob.coordinator.call_session().direction(),
        CallDirection::Inbound
    );

    alice.coordinator.pump();
    assert_eq!(alice.coordinator.call_state(), CallState::Connected);
    assert_eq!(
        alice.coordinator.remote_stream().map(|s| s.id()),
        bob.coordinator.local_stream().map(|s| s.id())
    );
    assert_eq!(alice.output.snapshot().plays, 1);
    assert!(alice.has_notice(|n| *n
        == Notice::ReceivingAudio {
            peer: "bob".to_string()
        }));
}

#[test]
fn test_blank_target_is_rejected() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");

    assert!(matches!(
        alice.coordinator.place_call("  "),
        Err(CoordinatorError::EmptyTarget)
    ));
    assert_eq!(alice.coordinator.call_state(), CallState::Idle);
    assert_eq!(network.active_calls(), 0);
}

#[test]
fn test_unknown_peer_resets_to_idle() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");

    alice.coordinator.place_call("nobody").unwrap();
    alice.coordinator.pump();

    assert_eq!(alice.coordinator.call_state(), CallState::Idle);
    assert!(alice.has_notice(|n| matches!(n, Notice::CallError { .. })));
}

#[test]
fn test_incoming_call_replaces_connected_call() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");
    let mut carol = Radio::online_with_mic(&network, "carol");

    alice.coordinator.place_call("carol").unwrap();
    carol.coordinator.pump();
    alice.coordinator.pump();
    assert_eq!(alice.coordinator.call_state(), CallState::Connected);
    assert_eq!(alice.coordinator.remote_peer_id(), Some("carol"));

    bob.coordinator.place_call("alice").unwrap();
    alice.coordinator.pump();

    // Alter Anruf geschlossen, neuer beantwortet, bobs Stream angekommen
    assert_eq!(alice.coordinator.remote_peer_id(), Some("bob"));
    assert_eq!(alice.coordinator.call_state(), CallState::Connected);
    assert_eq!(
        alice.coordinator.remote_stream().map(|s| s.id()),
        bob.coordinator.local_stream().map(|s| s.id())
    );
    assert!(alice.has_notice(|n| *n
        == Notice::CallEnded {
            reason: EndReason::Replaced
        }));
    assert_eq!(network.active_calls(), 1);

    carol.coordinator.pump();
    assert_eq!(carol.coordinator.call_state(), CallState::Idle);
}

#[test]
fn test_place_call_while_connected_tears_down_first() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");
    let _carol = Radio::online(&network, "carol");

    alice.coordinator.place_call("bob").unwrap();
    bob.coordinator.pump();
    alice.coordinator.pump();
    assert_eq!(alice.coordinator.call_state(), CallState::Connected);

    alice.coordinator.place_call("carol").unwrap();
    assert_eq!(alice.coordinator.call_state(), CallState::Dialing);
    assert_eq!(alice.coordinator.remote_peer_id(), Some("carol"));
    assert!(alice.coordinator.remote_stream().is_none());

    bob.coordinator.pump();
    assert_eq!(bob.coordinator.call_state(), CallState::Idle);
}

#[test]
fn test_hang_up_then_stale_stream() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");

    alice.coordinator.place_call("bob").unwrap();
    bob.coordinator.pump();

    assert!(alice.coordinator.hang_up());
    assert_eq!(alice.coordinator.call_state(), CallState::Idle);

    // Stream und close des alten Anrufs liegen noch in der Queue
    alice.coordinator.pump();
    assert_eq!(alice.coordinator.call_state(), CallState::Idle);
    assert!(alice.coordinator.remote_stream().is_none());
    assert_eq!(alice.output.snapshot().plays, 0);
    assert!(!alice.coordinator.hang_up());

    bob.coordinator.pump();
    assert_eq!(bob.coordinator.call_state(), CallState::Idle);
}

#[test]
fn test_remote_hang_up_clears_playback() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");

    alice.coordinator.place_call("bob").unwrap();
    bob.coordinator.pump();
    alice.coordinator.pump();
    assert!(alice.coordinator.remote_stream().is_some());

    bob.coordinator.hang_up();
    alice.coordinator.pump();

    assert_eq!(alice.coordinator.call_state(), CallState::Idle);
    assert!(alice.coordinator.remote_stream().is_none());
    assert_eq!(alice.output.snapshot().stream, None);
    assert!(alice.has_notice(|n| *n
        == Notice::CallEnded {
            reason: EndReason::RemoteClosed
        }));
}

#[test]
fn test_call_error_resets_without_redial() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");

    alice.coordinator.place_call("bob").unwrap();
    bob.coordinator.pump();
    alice.coordinator.pump();

    assert_eq!(network.fail_calls_of("alice", "ice failed"), 1);
    alice.coordinator.pump();

    assert_eq!(alice.coordinator.call_state(), CallState::Idle);
    assert!(alice.has_notice(|n| *n
        == Notice::CallEnded {
            reason: EndReason::Failed
        }));
    assert_eq!(network.active_calls(), 0);
}

#[test]
fn test_endpoint_error_keeps_registration() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");

    assert!(network.fail_endpoint("alice", "network hiccup"));
    alice.coordinator.pump();

    assert!(alice.coordinator.is_ready());
    assert!(alice.has_notice(|n| matches!(n, Notice::EndpointError { .. })));
}

#[test]
fn test_manual_answer_policy() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::new(
        &network,
        ProfileStores::in_memory(),
        FixedPrompt::new("alice"),
        SyntheticMicrophone::new(),
        CoordinatorConfig {
            auto_answer: false,
            ..CoordinatorConfig::default()
        },
    );
    alice.coordinator.start().unwrap();
    alice.coordinator.pump();
    let mut bob = Radio::online_with_mic(&network, "bob");

    bob.coordinator.place_call("alice").unwrap();
    alice.coordinator.pump();
    assert!(alice.coordinator.call_session().awaiting_answer());

    alice.coordinator.accept().unwrap();
    alice.coordinator.pump();
    assert_eq!(alice.coordinator.call_state(), CallState::Connected);
    assert!(matches!(
        alice.coordinator.accept(),
        Err(CoordinatorError::NothingToAccept)
    ));

    // Zweiter Anruf wird abgelehnt
    bob.coordinator.hang_up();
    alice.coordinator.pump();
    bob.coordinator.place_call("alice").unwrap();
    alice.coordinator.pump();
    alice.coordinator.reject().unwrap();

    assert_eq!(alice.coordinator.call_state(), CallState::Idle);
    bob.coordinator.pump();
    assert_eq!(bob.coordinator.call_state(), CallState::Idle);
}

// ============================================================================
// AUDIO
// ============================================================================

#[test]
fn test_mic_and_transmit_gate() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");

    assert!(matches!(
        alice.coordinator.set_transmit(true),
        Err(CoordinatorError::NoMicrophone)
    ));
    assert!(!alice.coordinator.is_transmitting());
    assert!(alice.has_notice(|n| *n == Notice::NoMicrophone));

    assert!(matches!(
        alice.coordinator.start_mic(),
        CaptureStart::Requested(_)
    ));
    assert_eq!(alice.coordinator.start_mic(), CaptureStart::AlreadyPending);
    alice.coordinator.pump();
    assert!(alice.coordinator.is_capture_active());
    assert_eq!(alice.mic.requests(), 1);

    let stream = alice.coordinator.local_stream().unwrap();
    assert!(!stream.is_enabled());
    assert!(alice.coordinator.toggle_transmit().unwrap());
    assert!(stream.is_enabled());

    assert!(alice.coordinator.stop_mic());
    assert!(!alice.coordinator.is_capture_active());
    assert!(!alice.coordinator.is_transmitting());
    assert!(!stream.is_enabled());

    // Behaltener Stream, keine neue Berechtigungsanfrage
    assert_eq!(alice.coordinator.start_mic(), CaptureStart::Resumed);
    assert_eq!(alice.mic.requests(), 1);
    assert!(alice.coordinator.is_capture_active());
}

#[test]
fn test_stop_mic_discards_pending_grant() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");

    alice.coordinator.start_mic();
    assert!(alice.coordinator.stop_mic());
    alice.coordinator.pump();

    assert!(!alice.coordinator.is_capture_active());
    assert!(alice.coordinator.local_stream().is_none());

    assert!(matches!(
        alice.coordinator.start_mic(),
        CaptureStart::Requested(_)
    ));
    alice.coordinator.pump();
    assert!(alice.coordinator.is_capture_active());
    assert_eq!(alice.mic.requests(), 2);
}

#[test]
fn test_denied_microphone_is_reported() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::new(
        &network,
        ProfileStores::in_memory(),
        FixedPrompt::new("alice"),
        SyntheticMicrophone::denied(),
        CoordinatorConfig::default(),
    );
    alice.coordinator.start().unwrap();
    alice.coordinator.start_mic();
    alice.coordinator.pump();

    assert!(!alice.coordinator.is_capture_active());
    assert!(alice.has_notice(|n| matches!(n, Notice::MicError { .. })));
}

#[test]
fn test_transmit_reaches_live_call() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online_with_mic(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");

    alice.coordinator.place_call("bob").unwrap();
    bob.coordinator.pump();
    alice.coordinator.pump();
    assert_eq!(bob.coordinator.call_state(), CallState::Connected);

    let heard_by_bob = bob.coordinator.remote_stream().unwrap().clone();
    assert!(!heard_by_bob.is_enabled());

    alice.coordinator.set_transmit(true).unwrap();
    assert!(heard_by_bob.is_enabled());

    alice.coordinator.set_transmit(false).unwrap();
    assert!(!heard_by_bob.is_enabled());
}

#[test]
fn test_volume_is_clamped() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");

    assert_eq!(alice.coordinator.volume(), 0.6);
    assert_eq!(alice.coordinator.set_volume(1.5).unwrap(), 1.0);
    assert_eq!(alice.coordinator.set_volume(-0.2).unwrap(), 0.0);
    assert_eq!(alice.coordinator.set_volume(0.3).unwrap(), 0.3);
    assert_eq!(alice.output.snapshot().volume, 0.3);

    assert!(matches!(
        alice.coordinator.set_volume(f32::NAN),
        Err(CoordinatorError::InvalidInput(_))
    ));
    assert_eq!(alice.coordinator.volume(), 0.3);
}

#[test]
fn test_blocked_playback_can_be_enabled() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut bob = Radio::online_with_mic(&network, "bob");
    alice.output.block_autoplay(true);

    alice.coordinator.place_call("bob").unwrap();
    bob.coordinator.pump();
    alice.coordinator.pump();

    assert_eq!(alice.coordinator.call_state(), CallState::Connected);
    assert!(alice.has_notice(|n| *n == Notice::PlaybackBlocked));
    assert_eq!(alice.output.snapshot().plays, 0);

    alice.output.block_autoplay(false);
    assert!(alice.coordinator.enable_audio().unwrap());
    assert_eq!(alice.output.snapshot().plays, 1);
}

// ============================================================================
// COMMANDS & ASYNC
// ============================================================================

#[test]
fn test_execute_commands() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let _bob = Radio::online(&network, "bob");

    let run = |radio: &mut Radio, line: &str| {
        let command: Command = line.parse().unwrap();
        radio.coordinator.execute(&command)
    };

    run(&mut alice, "start-mic").unwrap();
    alice.coordinator.pump();
    assert!(alice.coordinator.is_capture_active());

    run(&mut alice, "toggle-transmit").unwrap();
    assert!(alice.coordinator.is_transmitting());

    run(&mut alice, "set-volume 0.9").unwrap();
    assert_eq!(alice.coordinator.volume(), 0.9);

    run(&mut alice, "call bob").unwrap();
    assert_eq!(alice.coordinator.call_state(), CallState::Dialing);

    run(&mut alice, "hang-up").unwrap();
    assert_eq!(alice.coordinator.call_state(), CallState::Idle);

    assert!(matches!(
        run(&mut alice, "call"),
        Err(CoordinatorError::EmptyTarget)
    ));

    run(&mut alice, "stop-mic").unwrap();
    assert!(!alice.coordinator.is_capture_active());
}

#[test]
fn test_invalid_console_input_is_reported() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");

    assert_eq!(alice.coordinator.parse_command("set-volume loud"), None);
    assert!(alice.has_notice(|n| matches!(
        n,
        Notice::InvalidInput { message } if message.contains("'loud'")
    )));

    let before = alice.coordinator.status().entries().len();
    assert_eq!(alice.coordinator.parse_command("   "), None);
    assert_eq!(alice.coordinator.status().entries().len(), before);

    assert_eq!(
        alice.coordinator.parse_command("ptt"),
        Some(Command::ToggleTransmit)
    );
}

#[test]
fn test_status_entries_are_ordered() {
    let network = LoopbackNetwork::new();
    let mut alice = Radio::online(&network, "alice");
    let mut rx = alice.coordinator.subscribe();

    alice.coordinator.start_mic();
    alice.coordinator.pump();
    alice.coordinator.stop_mic();

    let entries = alice.coordinator.status().entries();
    assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));

    assert_eq!(rx.try_recv().unwrap().notice, Notice::MicOn);
    assert_eq!(rx.try_recv().unwrap().notice, Notice::MicMuted);
}

#[tokio::test]
async fn test_step_delivers_open_event() {
    let network = LoopbackNetwork::new();
    let mut radio = Radio::new(
        &network,
        ProfileStores::in_memory(),
        FixedPrompt::new("alice"),
        SyntheticMicrophone::new(),
        CoordinatorConfig::default(),
    );
    radio.coordinator.start().unwrap();
    assert!(!radio.coordinator.is_ready());

    radio.coordinator.step().await;
    assert_eq!(radio.coordinator.my_id(), Some("alice"));
}

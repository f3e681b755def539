//! Ham Radio - P2P Walkie-Talkie
//!
//! Ein Zwei-Parteien Walkie-Talkie mit:
//! - Stabiler Radio-ID pro Profil und kollisionsfreier ID pro Tab
//! - Genau einem Anruf pro Tab (Auto-Answer als Policy)
//! - Mikrofon-Gate mit Push-to-Talk
//! - SQLite für die persistente Radio-ID

pub mod audio;
pub mod call_engine;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod identity;
pub mod status;
pub mod storage;
pub mod transport;

pub use config::RadioConfig;
pub use coordinator::{
    Capabilities, Command, CoordinatorConfig, CoordinatorError, EndpointState,
    SessionCoordinator,
};
pub use events::{CoordinatorEvent, Envelope, EventSink};
pub use status::{Notice, StatusEntry, StatusLevel, StatusLog};

use audio::{AudioDevice, MemoryOutput, SyntheticMicrophone};
use identity::{FixedPrompt, IdentityPrompt, NoPrompt};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use storage::{MemoryStore, ProfileStores, SqliteStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use transport::LoopbackNetwork;

/// Standard-Filter, wenn `RUST_LOG` nicht gesetzt ist
const DEFAULT_LOG_FILTER: &str = "ham_radio_lib=info";

static LOGGING: OnceCell<()> = OnceCell::new();

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging (nach stderr, stdout gehört der Konsole)
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

        // Ein bereits gesetzter globaler Subscriber (z.B. in Tests) bleibt aktiv
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

// ============================================================================
// CONSOLE
// ============================================================================

/// Startet die Konsole
///
/// Das eigene Radio und ein zweiter Tab ("Companion") im selben Profil
/// teilen ein In-Process Netzwerk. Der Companion sendet dauerhaft, so dass
/// `call <companion-id>` sofort eine Verbindung aufbaut.
pub fn run() -> anyhow::Result<()> {
    init_logging();
    let config = RadioConfig::from_env();
    tracing::info!("Starting Ham Radio with {:?}", config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(console(config))
}

async fn console(config: RadioConfig) -> anyhow::Result<()> {
    let store = match &config.data_dir {
        Some(dir) => SqliteStore::open_in_dir(dir)?,
        None => SqliteStore::open_default()?,
    };
    tracing::info!("Profile database: {:?}", store.path());

    let stores = ProfileStores::new(Arc::new(store), Arc::new(MemoryStore::new()));
    let network = LoopbackNetwork::new();

    let prompt: Box<dyn IdentityPrompt> = match &config.identity {
        Some(id) => Box::new(FixedPrompt::new(id.clone())),
        None => Box::new(NoPrompt),
    };

    let mut radio = SessionCoordinator::new(
        Capabilities {
            stores: stores.clone(),
            prompt,
            device: microphone(),
            output: Box::new(MemoryOutput::new()),
            transport: Box::new(network.clone()),
        },
        config.coordinator(),
    );

    let mut companion = SessionCoordinator::new(
        Capabilities {
            stores: stores.new_tab(),
            prompt: Box::new(NoPrompt),
            device: Box::new(SyntheticMicrophone::new()),
            output: Box::new(MemoryOutput::new()),
            transport: Box::new(network),
        },
        CoordinatorConfig::default(),
    );

    radio.start()?;
    radio.pump();
    companion.start()?;
    companion.start_mic();
    companion.pump();
    companion.set_transmit(true)?;

    print_help(&radio, &companion);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = (0u64, 0u64);

    loop {
        print_status(&radio, &companion, &mut printed, config.json_status)?;

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match radio.parse_command(&line) {
                    Some(Command::Quit) => break,
                    Some(Command::Status) => print_summary(&radio),
                    Some(command) => {
                        if let Err(e) = radio.execute(&command) {
                            tracing::debug!("Command {:?} failed: {}", command, e);
                        }
                        radio.pump();
                    }
                    None => {}
                }
            }
            _ = radio.step() => {}
            _ = companion.step() => {}
        }
    }

    // Neuester Slot zuerst, damit beide Slots freigegeben werden
    companion.shutdown()?;
    radio.shutdown()?;
    print_status(&radio, &companion, &mut printed, config.json_status)?;

    Ok(())
}

#[cfg(feature = "cpal")]
fn microphone() -> Box<dyn AudioDevice> {
    Box::new(audio::CpalMicrophone)
}

#[cfg(not(feature = "cpal"))]
fn microphone() -> Box<dyn AudioDevice> {
    Box::new(SyntheticMicrophone::new())
}

fn print_help(radio: &SessionCoordinator, companion: &SessionCoordinator) {
    println!("Ham Radio console");
    if let Some(identity) = companion.identity() {
        println!("Companion tab is on air as '{}'", identity.session_id);
    }
    if let Some(identity) = radio.identity() {
        println!("Your radio ID: '{}'", identity.session_id);
    }
    println!(
        "Commands: set-identity <id>, call <id>, hang-up, start-mic, stop-mic, \
         toggle-transmit, set-volume <0..1>, accept, reject, enable-audio, status, quit"
    );
}

fn print_status(
    radio: &SessionCoordinator,
    companion: &SessionCoordinator,
    printed: &mut (u64, u64),
    json: bool,
) -> anyhow::Result<()> {
    for entry in radio.status().since(printed.0) {
        if json {
            println!("{}", entry.to_json()?);
        } else {
            println!("{entry}");
        }
        printed.0 = entry.seq;
    }
    for entry in companion.status().since(printed.1) {
        if json {
            println!("{}", entry.to_json()?);
        } else {
            println!("  (companion) {entry}");
        }
        printed.1 = entry.seq;
    }
    Ok(())
}

fn print_summary(radio: &SessionCoordinator) {
    println!("ID:        {}", radio.my_id().unwrap_or("(not registered)"));
    println!("Endpoint:  {:?}", radio.endpoint());
    println!("Call:      {}", radio.call_state());
    println!("Peer:      {}", radio.remote_peer_id().unwrap_or("-"));
    println!(
        "Mic:       {} / {}",
        if radio.is_capture_active() { "on" } else { "off" },
        if radio.is_transmitting() {
            "transmitting"
        } else {
            "listening"
        }
    );
    println!("Volume:    {:.0}%", radio.volume() * 100.0);
}

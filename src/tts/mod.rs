//! TTS (Text-to-Speech) Backends
//!
//! The platform speech backend capability the engine drives, the utterance
//! handle backends report progress through, and the backends shipped with
//! the crate.

use crate::config::Config;
use crate::error::{SpeechError, SpeechResult};
use crate::quirks::{HostFamily, SettleFlag};
use crate::voices::Voice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

pub mod espeak;
pub mod speechd;

/// A platform speech backend.
///
/// Assumed unreliable: completion may fire twice or never, cancellation may
/// surface as an error, and long speech may stop silently. The engine
/// compensates for all of that.
pub trait SpeechBackend: Send + Sync + std::fmt::Debug {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Whether the backend can speak at all on this host
    fn is_available(&self) -> bool {
        true
    }

    fn host_family(&self) -> HostFamily {
        HostFamily::Desktop
    }

    /// Voices the backend currently reports (may be empty while loading)
    fn voices(&self) -> Vec<Voice>;

    /// Notification fired when the voice list changes, if the backend has one
    fn voices_changed(&self) -> Option<broadcast::Receiver<()>> {
        None
    }

    /// Start speaking an utterance. Progress is reported through
    /// [`Utterance::emit`].
    fn speak(&self, utterance: Arc<Utterance>) -> SpeechResult<()>;

    fn cancel(&self);

    fn pause(&self);

    fn resume(&self);

    fn is_speaking(&self) -> bool;

    /// Speech queued but not started
    fn is_pending(&self) -> bool {
        false
    }

    fn is_paused(&self) -> bool {
        false
    }
}

/// Word/sentence boundary reached during speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub char_index: usize,
    pub char_length: usize,
}

/// Error reported by a backend for one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtteranceError {
    /// Backend error code, e.g. `interrupted` or `synthesis-failed`
    pub code: String,
}

impl UtteranceError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl std::fmt::Display for UtteranceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    End,
    Error(UtteranceError),
    Boundary(Boundary),
}

impl UtteranceEvent {
    fn is_terminal(&self) -> bool {
        !matches!(self, UtteranceEvent::Boundary(_))
    }
}

/// Receiving side of an utterance's events
pub type UtteranceEvents = mpsc::UnboundedReceiver<UtteranceEvent>;

static NEXT_UTTERANCE_ID: AtomicU64 = AtomicU64::new(1);

/// One request to vocalize text with a specific voice, rate and pitch.
///
/// Every attempt gets a brand-new utterance: there is no `Clone`, and
/// [`Utterance::new`] is the only constructor, so a handle from a previous
/// chunk or retry can never be handed to a backend again.
#[derive(Debug)]
pub struct Utterance {
    id: u64,
    text: String,
    voice: Option<Voice>,
    lang: String,
    rate: f32,
    pitch: f32,
    settled: SettleFlag,
    events: mpsc::UnboundedSender<UtteranceEvent>,
}

impl Utterance {
    pub fn new(
        text: impl Into<String>,
        voice: Option<Voice>,
        lang: impl Into<String>,
        rate: f32,
        pitch: f32,
    ) -> (Arc<Self>, UtteranceEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let utterance = Self {
            id: NEXT_UTTERANCE_ID.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            voice,
            lang: lang.into(),
            rate,
            pitch,
            settled: SettleFlag::new(),
            events,
        };
        (Arc::new(utterance), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Report an event. Only the first terminal event (end or error) is
    /// delivered; anything after that is dropped and `false` is returned.
    pub fn emit(&self, event: UtteranceEvent) -> bool {
        if event.is_terminal() {
            if !self.settled.settle() {
                return false;
            }
        } else if self.settled.is_settled() {
            return false;
        }
        self.events.send(event).is_ok()
    }

    pub fn end(&self) -> bool {
        self.emit(UtteranceEvent::End)
    }

    pub fn fail(&self, code: impl Into<String>) -> bool {
        self.emit(UtteranceEvent::Error(UtteranceError::new(code)))
    }

    /// Settle without delivering an event (timeout or cancellation on the
    /// engine side). Late backend callbacks are then ignored.
    pub(crate) fn settle(&self) -> bool {
        self.settled.settle()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.is_settled()
    }
}

/// Factory to create the configured speech backend
pub async fn create_backend(config: &Config) -> SpeechResult<Arc<dyn SpeechBackend>> {
    info!("🛠️ Creating speech backend: {}", config.backend);
    let backend: Arc<dyn SpeechBackend> = match config.backend.as_str() {
        "speechd_ng" | "speechd" => {
            info!("  - Using speechd-ng over D-Bus");
            Arc::new(speechd::SpeechdBackend::connect().await?)
        }
        "espeak" | "espeak-ng" => {
            info!("  - Using espeak-ng ({})", config.espeak_binary);
            espeak_backend(&config.espeak_binary)?
        }
        other => {
            warn!("  - Unknown backend '{}', falling back to espeak-ng", other);
            espeak_backend(&config.espeak_binary)?
        }
    };
    info!("✅ Speech backend '{}' initialized", backend.name());
    Ok(backend)
}

fn espeak_backend(binary: &str) -> SpeechResult<Arc<dyn SpeechBackend>> {
    if binary.trim().is_empty() {
        return Err(SpeechError::Config("espeak_binary is empty".to_string()));
    }
    let backend = espeak::EspeakBackend::new(binary);
    if !backend.is_available() {
        return Err(SpeechError::Config(format!(
            "espeak_binary '{}' is not runnable",
            binary
        )));
    }
    Ok(Arc::new(backend))
}

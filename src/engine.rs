//! Speech Engine
//!
//! Drives one utterance at a time through a [`SpeechBackend`], turning its
//! unreliable callbacks into a single predictable contract:
//! `speak` resolves on completion or fails with a typed [`SpeechError`].
//!
//! States: idle → speaking ⇄ paused → idle, with `destroyed` terminal from
//! anywhere. A new `speak()` supersedes the one in flight; chunks of one
//! call are spoken strictly in order.

use crate::error::{SpeechError, SpeechResult};
use crate::quirks::{
    self, KeepAliveTick, RetryPolicy, CANCEL_SETTLE_DELAY, KEEP_ALIVE_INTERVAL,
};
use crate::text::{chunk_for_speech, clamp_rate, estimate_duration, MAX_WORDS_PER_CHUNK};
use crate::tts::{Boundary, SpeechBackend, Utterance, UtteranceEvent};
use crate::voices::{find_voice, Voice, VoiceCatalog, VoicePreferences};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Subscriber notified on every state transition
pub type StateCallback = Arc<dyn Fn(&SpeechState) + Send + Sync>;

/// Receives word/sentence boundaries while speaking
pub type ProgressCallback = Arc<dyn Fn(Boundary) + Send + Sync>;

/// Observable engine state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechState {
    pub is_speaking: bool,
    pub is_paused: bool,
    /// The full text passed to `speak`, never an individual chunk
    pub current_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Speaking,
    Paused,
    Destroyed,
}

/// Per-engine defaults, applied when a `speak` call doesn't override them
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDefaults {
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
    pub preferences: VoicePreferences,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            lang: "en-US".to_string(),
            rate: 0.98,
            pitch: 1.02,
            preferences: VoicePreferences::default(),
        }
    }
}

/// Partial update for [`SpeechEngine::set_defaults`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultsPatch {
    pub lang: Option<String>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub preferences: Option<VoicePreferences>,
}

impl EngineDefaults {
    fn merge(&mut self, patch: DefaultsPatch) {
        if let Some(lang) = patch.lang {
            self.lang = lang;
        }
        if let Some(rate) = patch.rate {
            self.rate = rate;
        }
        if let Some(pitch) = patch.pitch {
            self.pitch = pitch;
        }
        if let Some(preferences) = patch.preferences {
            self.preferences = preferences;
        }
    }
}

/// Per-call overrides for [`SpeechEngine::speak`]
#[derive(Clone, Default)]
pub struct SpeakOptions {
    pub lang: Option<String>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    /// Use this voice instead of selecting one from the catalog
    pub voice: Option<Voice>,
    pub on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for SpeakOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakOptions")
            .field("lang", &self.lang)
            .field("rate", &self.rate)
            .field("pitch", &self.pitch)
            .field("voice", &self.voice)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl SpeakOptions {
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = Some(pitch);
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Boundary) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

/// Settings frozen when `speak` is called; later `set_defaults` calls don't
/// reach an utterance already in flight.
struct Snapshot {
    lang: String,
    rate: f32,
    pitch: f32,
    voice: Option<Voice>,
    preferences: VoicePreferences,
    on_progress: Option<ProgressCallback>,
}

impl Snapshot {
    fn resolve(defaults: &EngineDefaults, options: SpeakOptions) -> Self {
        Self {
            lang: options.lang.unwrap_or_else(|| defaults.lang.clone()),
            rate: clamp_rate(options.rate.unwrap_or(defaults.rate)),
            pitch: options.pitch.unwrap_or(defaults.pitch),
            voice: options.voice,
            preferences: defaults.preferences.clone(),
            on_progress: options.on_progress,
        }
    }
}

/// The attempt currently handed to the backend
struct InFlight {
    /// Strong reference for the attempt's whole duration
    utterance: Arc<Utterance>,
    keep_alive: Option<AbortHandle>,
}

impl InFlight {
    fn stop_timers(&mut self) {
        if let Some(handle) = self.keep_alive.take() {
            handle.abort();
        }
    }
}

struct EngineState {
    speaking: bool,
    paused: bool,
    current_text: Option<String>,
    destroyed: bool,
    /// Cancelled when the current speak cycle is cancelled or superseded
    cycle: CancellationToken,
    /// Bumped by every `speak`; identifies the cycle owning the state
    cycle_id: u64,
    defaults: EngineDefaults,
    in_flight: Option<InFlight>,
}

impl EngineState {
    fn snapshot(&self) -> SpeechState {
        SpeechState {
            is_speaking: self.speaking,
            is_paused: self.paused,
            current_text: self.current_text.clone(),
        }
    }

    /// Only ever cancelled under the state lock, so this holds until released
    fn owns(&self, cycle: u64) -> bool {
        self.cycle_id == cycle && !self.cycle.is_cancelled()
    }

    fn clear_timers(&mut self) {
        if let Some(mut in_flight) = self.in_flight.take() {
            in_flight.stop_timers();
        }
    }

    fn set_idle(&mut self) {
        self.speaking = false;
        self.paused = false;
        self.current_text = None;
    }
}

struct EngineInner {
    backend: Option<Arc<dyn SpeechBackend>>,
    catalog: Arc<VoiceCatalog>,
    retry: RetryPolicy,
    state: Mutex<EngineState>,
    subscribers: Mutex<Vec<(u64, StateCallback)>>,
    next_subscriber: AtomicU64,
}

/// Handle returned by [`SpeechEngine::on_state_change`]
#[derive(Debug)]
pub struct Subscription {
    engine: Weak<EngineInner>,
    id: u64,
}

impl Subscription {
    /// Stop receiving state changes
    pub fn unsubscribe(self) {
        if let Some(inner) = self.engine.upgrade() {
            inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// What woke an attempt up
enum Step {
    Cancelled,
    Event(Option<UtteranceEvent>),
    TimedOut,
}

/// Sleep unless the cycle is cancelled first
async fn wait_or_cancel(token: &CancellationToken, duration: Duration) -> SpeechResult<()> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SpeechError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn spawn_keep_alive(backend: Arc<dyn SpeechBackend>) -> AbortHandle {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(Instant::now() + KEEP_ALIVE_INTERVAL, KEEP_ALIVE_INTERVAL);
        loop {
            interval.tick().await;
            match quirks::keep_alive_tick(backend.is_speaking(), backend.is_paused()) {
                KeepAliveTick::Ping => {
                    debug!("Keep-alive ping");
                    backend.pause();
                    backend.resume();
                }
                KeepAliveTick::Skip => {}
                KeepAliveTick::Stop => break,
            }
        }
    })
    .abort_handle()
}

/// One independent speech consumer. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SpeechEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SpeechEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechEngine")
            .field("backend", &self.inner.backend.as_ref().map(|b| b.name().to_string()))
            .field("status", &self.status())
            .finish()
    }
}

impl SpeechEngine {
    /// Create an engine. `None` for the backend gives an engine whose
    /// `speak` always fails with [`SpeechError::Unsupported`].
    pub fn new(
        backend: Option<Arc<dyn SpeechBackend>>,
        catalog: Arc<VoiceCatalog>,
        defaults: EngineDefaults,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backend,
                catalog,
                retry: RetryPolicy::default(),
                state: Mutex::new(EngineState {
                    speaking: false,
                    paused: false,
                    current_text: None,
                    destroyed: false,
                    cycle: CancellationToken::new(),
                    cycle_id: 0,
                    defaults,
                    in_flight: None,
                }),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a state change and notify subscribers outside the lock
    fn transition(&self, change: impl FnOnce(&mut EngineState)) {
        self.transition_if(|st| {
            change(st);
            true
        });
    }

    /// Like [`Self::transition`], but `change` may decline under the lock,
    /// in which case nobody is notified
    fn transition_if(&self, change: impl FnOnce(&mut EngineState) -> bool) -> bool {
        let snapshot = {
            let mut st = self.state();
            if !change(&mut st) {
                return false;
            }
            st.snapshot()
        };
        let subscribers: Vec<StateCallback> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in subscribers {
            callback(&snapshot);
        }
        true
    }

    /// Supersede whatever cycle is running and start a new one
    fn begin_cycle(
        &self,
        options: SpeakOptions,
    ) -> SpeechResult<(u64, CancellationToken, Snapshot)> {
        let mut st = self.state();
        if st.destroyed {
            return Err(SpeechError::Unsupported(
                "engine has been destroyed".to_string(),
            ));
        }
        st.cycle.cancel();
        st.cycle = CancellationToken::new();
        st.cycle_id += 1;
        st.clear_timers();
        Ok((
            st.cycle_id,
            st.cycle.clone(),
            Snapshot::resolve(&st.defaults, options),
        ))
    }

    /// Move to speaking, unless `cycle` was cancelled or superseded meanwhile
    fn enter_speaking(&self, cycle: u64, text: &str) -> bool {
        self.transition_if(|st| {
            if !st.owns(cycle) {
                return false;
            }
            st.speaking = true;
            st.paused = false;
            st.current_text = Some(text.to_string());
            true
        })
    }

    /// Back to idle, unless `cycle` no longer owns the engine state
    fn finish_cycle(&self, cycle: u64) {
        self.transition_if(|st| {
            if !st.owns(cycle) {
                return false;
            }
            st.clear_timers();
            st.set_idle();
            true
        });
    }

    pub fn state_snapshot(&self) -> SpeechState {
        self.state().snapshot()
    }

    pub fn status(&self) -> EngineStatus {
        let st = self.state();
        if st.destroyed {
            EngineStatus::Destroyed
        } else if st.speaking && st.paused {
            EngineStatus::Paused
        } else if st.speaking {
            EngineStatus::Speaking
        } else {
            EngineStatus::Idle
        }
    }

    pub fn is_supported(&self) -> bool {
        self.inner.backend.as_ref().is_some_and(|b| b.is_available())
    }

    /// Speak `text`, superseding anything in flight.
    ///
    /// Resolves when every chunk has been spoken (or timed out, which counts
    /// as spoken). Fails with `Cancelled` when cancelled or superseded,
    /// `Unsupported` without a backend or after `destroy`, and `Synthesis`
    /// when a chunk fails twice.
    pub async fn speak(&self, text: &str, options: SpeakOptions) -> SpeechResult<()> {
        let backend = match &self.inner.backend {
            Some(backend) if backend.is_available() => backend.clone(),
            _ => {
                return Err(SpeechError::Unsupported(
                    "no speech backend available".to_string(),
                ))
            }
        };

        let (cycle, token, snapshot) = self.begin_cycle(options)?;

        if quirks::needs_cancel_settle(backend.is_speaking(), backend.is_pending()) {
            debug!("Backend busy; cancelling before new speech");
            backend.cancel();
            wait_or_cancel(&token, CANCEL_SETTLE_DELAY).await?;
        }

        let chunks = chunk_for_speech(text, MAX_WORDS_PER_CHUNK);
        if !self.enter_speaking(cycle, text) {
            return Err(SpeechError::Cancelled);
        }
        info!(
            "🗣️ Speaking {} words in {} chunk(s) via {}",
            crate::text::word_count(text),
            chunks.len(),
            backend.name()
        );

        let result = self.play_chunks(&backend, &chunks, &snapshot, &token).await;
        self.finish_cycle(cycle);

        match &result {
            Ok(()) => debug!("✅ Speech completed"),
            Err(SpeechError::Cancelled) => debug!("Speech cancelled"),
            Err(e) => warn!("⚠️ Speech failed: {}", e),
        }
        result
    }

    async fn play_chunks(
        &self,
        backend: &Arc<dyn SpeechBackend>,
        chunks: &[String],
        snapshot: &Snapshot,
        token: &CancellationToken,
    ) -> SpeechResult<()> {
        for (index, chunk) in chunks.iter().enumerate() {
            if token.is_cancelled() {
                return Err(SpeechError::Cancelled);
            }
            debug!("Chunk {}/{}", index + 1, chunks.len());
            self.speak_chunk(backend, chunk, snapshot, token).await?;
        }
        Ok(())
    }

    /// Speak one chunk, retrying once on a non-cancellation failure
    async fn speak_chunk(
        &self,
        backend: &Arc<dyn SpeechBackend>,
        chunk: &str,
        snapshot: &Snapshot,
        token: &CancellationToken,
    ) -> SpeechResult<()> {
        let policy = self.inner.retry;
        let mut attempt = 0u32;

        let action = move || {
            attempt += 1;
            self.attempt(backend, chunk, snapshot, token, attempt)
        };
        let condition = |err: &SpeechError| {
            let retry = policy.should_retry(err.is_cancelled(), token.is_cancelled());
            if retry {
                warn!("🔁 Chunk failed ({}); retrying in {:?}", err, policy.backoff);
            }
            retry
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SpeechError::Cancelled),
            result = RetryIf::start(policy.strategy(), action, condition) => result,
        }
    }

    /// One utterance attempt with its three forward-progress guards:
    /// completion, error and timeout.
    async fn attempt(
        &self,
        backend: &Arc<dyn SpeechBackend>,
        text: &str,
        snapshot: &Snapshot,
        token: &CancellationToken,
        attempt: u32,
    ) -> SpeechResult<()> {
        if token.is_cancelled() {
            return Err(SpeechError::Cancelled);
        }

        let voice = snapshot.voice.clone().or_else(|| {
            find_voice(
                &self.inner.catalog.cached(),
                &snapshot.lang,
                Some(&snapshot.preferences),
            )
            .cloned()
        });
        let (utterance, mut events) = Utterance::new(
            text,
            voice,
            snapshot.lang.clone(),
            snapshot.rate,
            snapshot.pitch,
        );
        let timeout = estimate_duration(text, snapshot.rate);

        debug!(
            "Attempt {} for utterance {} (timeout {:?}, voice {:?})",
            attempt,
            utterance.id(),
            timeout,
            utterance.voice().map(|v| v.name.as_str())
        );

        {
            let mut st = self.state();
            if token.is_cancelled() {
                return Err(SpeechError::Cancelled);
            }
            st.clear_timers();
            let keep_alive = quirks::keep_alive_enabled(backend.host_family())
                .then(|| spawn_keep_alive(backend.clone()));
            st.in_flight = Some(InFlight {
                utterance: utterance.clone(),
                keep_alive,
            });
        }

        // Every guard is armed before the backend sees the utterance
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut events_open = true;

        let outcome = match backend.speak(utterance.clone()) {
            Err(e) => Err(SpeechError::Synthesis(e.to_string())),
            Ok(()) => loop {
                let step = tokio::select! {
                    biased;
                    _ = token.cancelled() => Step::Cancelled,
                    event = events.recv(), if events_open => Step::Event(event),
                    _ = &mut deadline => Step::TimedOut,
                };

                match step {
                    Step::Cancelled => break Err(SpeechError::Cancelled),
                    Step::TimedOut => {
                        warn!(
                            "⏱️ No completion from {} after {:?}; treating as spoken",
                            backend.name(),
                            timeout
                        );
                        break Ok(());
                    }
                    Step::Event(Some(UtteranceEvent::End)) => break Ok(()),
                    Step::Event(Some(UtteranceEvent::Error(err))) => {
                        if quirks::is_cancellation(&err.code) {
                            break Err(SpeechError::Cancelled);
                        }
                        break Err(SpeechError::Synthesis(err.code));
                    }
                    Step::Event(Some(UtteranceEvent::Boundary(boundary))) => {
                        if let Some(callback) = &snapshot.on_progress {
                            callback(boundary);
                        }
                    }
                    Step::Event(None) => events_open = false,
                }
            },
        };

        utterance.settle();
        self.release(&utterance);
        outcome
    }

    /// Drop the in-flight record if it still belongs to `utterance`
    fn release(&self, utterance: &Utterance) {
        let mut st = self.state();
        if st
            .in_flight
            .as_ref()
            .is_some_and(|f| f.utterance.id() == utterance.id())
        {
            st.clear_timers();
        }
    }

    /// Cancel whatever is being spoken. Fire-and-forget: the engine is idle
    /// when this returns; the pending `speak` fails with `Cancelled` shortly
    /// after. No-op once destroyed.
    pub fn cancel(&self) {
        {
            let mut st = self.state();
            if st.destroyed {
                return;
            }
            st.cycle.cancel();
            st.clear_timers();
        }
        self.halt();
    }

    fn halt(&self) {
        if let Some(backend) = &self.inner.backend {
            backend.cancel();
        }
        self.transition(EngineState::set_idle);
    }

    /// Best-effort pause; not every backend supports it
    pub fn pause(&self) {
        if self.state().destroyed {
            return;
        }
        let Some(backend) = &self.inner.backend else {
            return;
        };
        backend.pause();
        self.transition(|st| {
            if st.speaking {
                st.paused = true;
            }
        });
    }

    /// Best-effort resume; not every backend supports it
    pub fn resume(&self) {
        if self.state().destroyed {
            return;
        }
        let Some(backend) = &self.inner.backend else {
            return;
        };
        backend.resume();
        self.transition(|st| st.paused = false);
    }

    /// Merge new defaults; they apply from the next `speak` call on
    pub fn set_defaults(&self, patch: DefaultsPatch) {
        self.state().defaults.merge(patch);
    }

    pub fn defaults(&self) -> EngineDefaults {
        self.state().defaults.clone()
    }

    /// Cached voices from the shared catalog
    pub fn get_voices(&self) -> Arc<Vec<Voice>> {
        self.inner.catalog.cached()
    }

    /// Reload voices from the backend into the shared catalog
    pub async fn refresh_voices(&self) -> Arc<Vec<Voice>> {
        match &self.inner.backend {
            Some(backend) => self.inner.catalog.refresh(backend.as_ref()).await,
            None => Arc::new(Vec::new()),
        }
    }

    /// Load voices into the shared catalog if it is still empty
    pub async fn load_voices(&self) -> Arc<Vec<Voice>> {
        match &self.inner.backend {
            Some(backend) => self.inner.catalog.load(backend.as_ref()).await,
            None => Arc::new(Vec::new()),
        }
    }

    /// Register a subscriber called synchronously on every state transition.
    ///
    /// Panics inside the callback propagate to whoever triggered the transition.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SpeechState) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            engine: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Tear the engine down. Idempotent; afterwards `speak` fails with
    /// `Unsupported` and the other controls do nothing.
    pub fn destroy(&self) {
        {
            let mut st = self.state();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
            st.cycle.cancel();
            st.clear_timers();
        }
        info!("🔇 Speech engine destroyed");
        self.halt();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

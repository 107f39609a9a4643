//! Voice catalog and selection
//!
//! Voice quality varies wildly between vendors and between on-device and
//! network voices, and no single signal predicts it. Selection is therefore
//! a strict priority cascade over curated vendor names and name hints.

use crate::tts::SpeechBackend;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Number of polls before giving up on voice loading
pub const VOICE_LOAD_RETRIES: u32 = 8;

/// Delay between voice polls
pub const VOICE_LOAD_INTERVAL: Duration = Duration::from_millis(250);

/// Language used when nothing matches the requested one
pub const FALLBACK_LANG: &str = "en";

// Curated names, lowercase for case-insensitive matching
pub const APPLE_US_VOICES: &[&str] = &[
    "samantha", "siri", "ava", "allison", "alex", "victoria", "karen",
];

pub const ANDROID_US_VOICES: &[&str] = &[
    "google us english",
    "google en-us",
    "english united states",
];

pub const EDGE_VOICES: &[&str] = &[
    "microsoft zira",
    "microsoft david",
    "microsoft mark",
    "microsoft jenny",
];

pub const ENHANCED_HINTS: &[&str] = &["enhanced", "premium"];

/// A voice as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    /// Display name
    pub name: String,
    /// Language tag, e.g. `en-US` (some hosts report `en_US`)
    pub lang: String,
    /// Resident on-device rather than fetched over the network
    pub local_service: bool,
    /// Backend-specific identifier
    pub voice_uri: String,
}

impl Voice {
    pub fn new(
        name: impl Into<String>,
        lang: impl Into<String>,
        local_service: bool,
        voice_uri: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            local_service,
            voice_uri: voice_uri.into(),
        }
    }

    fn matches_hint(&self, hint: &str) -> bool {
        self.name.to_lowercase().contains(hint) || self.voice_uri.to_lowercase().contains(hint)
    }

    fn lang_starts_with(&self, prefix: &str) -> bool {
        normalize_lang(&self.lang).starts_with(prefix)
    }
}

/// Caller preferences for voice selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoicePreferences {
    pub preferred_voice_name: Option<String>,
    pub prefer_local: bool,
}

/// Lowercase a language tag and turn `_` separators into `-`
pub fn normalize_lang(lang: &str) -> String {
    lang.to_lowercase().replace('_', "-")
}

/// Pick the best voice for `lang`.
///
/// Returns `None` only when `voices` is empty.
pub fn find_voice<'a>(
    voices: &'a [Voice],
    lang: &str,
    preferences: Option<&VoicePreferences>,
) -> Option<&'a Voice> {
    if voices.is_empty() {
        return None;
    }

    let lang = normalize_lang(lang);
    let matches: Vec<&Voice> = voices.iter().filter(|v| v.lang_starts_with(&lang)).collect();

    let first_hint = |hint: &str| matches.iter().copied().find(|v| v.matches_hint(hint));

    if let Some(name) = preferences.and_then(|p| p.preferred_voice_name.as_deref()) {
        if let Some(voice) = first_hint(&name.to_lowercase()) {
            return Some(voice);
        }
    }

    for list in [APPLE_US_VOICES, ANDROID_US_VOICES, EDGE_VOICES] {
        for &name in list {
            if let Some(voice) = first_hint(name) {
                return Some(voice);
            }
        }
    }

    if let Some(voice) = matches
        .iter()
        .copied()
        .find(|v| ENHANCED_HINTS.iter().any(|hint| v.matches_hint(hint)))
    {
        return Some(voice);
    }

    if preferences.is_some_and(|p| p.prefer_local) {
        if let Some(voice) = matches.iter().copied().find(|v| v.local_service) {
            return Some(voice);
        }
    }

    if let Some(voice) = matches.first().copied() {
        return Some(voice);
    }

    voices
        .iter()
        .find(|v| v.lang_starts_with(FALLBACK_LANG))
        .or_else(|| voices.first())
}

/// Process-wide voice cache, shared by every engine that is handed it.
///
/// The list is replaced wholesale, never mutated in place, so readers always
/// see either the old list or the new one.
#[derive(Debug, Default)]
pub struct VoiceCatalog {
    voices: RwLock<Arc<Vec<Voice>>>,
}

enum Wake {
    Timer,
    Changed(bool),
}

/// Wait for the next "voices changed" signal. Pending forever without a receiver.
async fn next_change(rx: &mut Option<broadcast::Receiver<()>>) -> bool {
    match rx {
        Some(rx) => !matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)),
        None => std::future::pending().await,
    }
}

impl VoiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cached voices (possibly empty)
    pub fn cached(&self) -> Arc<Vec<Voice>> {
        self.voices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, voices: Vec<Voice>) -> Arc<Vec<Voice>> {
        let voices = Arc::new(voices);
        *self.voices.write().unwrap_or_else(PoisonError::into_inner) = voices.clone();
        voices
    }

    /// Return cached voices, loading them from the backend when the cache is empty.
    ///
    /// Never fails: when the backend reports nothing after all polls, resolves
    /// with an empty list.
    pub async fn load(&self, backend: &dyn SpeechBackend) -> Arc<Vec<Voice>> {
        let cached = self.cached();
        if !cached.is_empty() {
            return cached;
        }
        let voices = self.fetch(backend).await;
        self.store(voices)
    }

    /// Reload voices from the backend and replace the cache with the result.
    pub async fn refresh(&self, backend: &dyn SpeechBackend) -> Arc<Vec<Voice>> {
        info!("🔄 Refreshing voices from {}", backend.name());
        let voices = self.fetch(backend).await;
        self.store(voices)
    }

    /// Load voices, then pick the best one for `lang`.
    pub async fn preferred_voice(
        &self,
        backend: &dyn SpeechBackend,
        lang: &str,
        preferences: Option<&VoicePreferences>,
    ) -> Option<Voice> {
        let voices = self.load(backend).await;
        find_voice(&voices, lang, preferences).cloned()
    }

    /// Poll the backend until it reports voices, racing its change notification.
    async fn fetch(&self, backend: &dyn SpeechBackend) -> Vec<Voice> {
        let immediate = backend.voices();
        if !immediate.is_empty() {
            debug!("Loaded {} voices immediately", immediate.len());
            return immediate;
        }

        let mut changed = backend.voices_changed();
        let mut attempts = 0;

        loop {
            let voices = backend.voices();
            if !voices.is_empty() {
                debug!("Loaded {} voices after {} polls", voices.len(), attempts);
                return voices;
            }

            attempts += 1;
            if attempts >= VOICE_LOAD_RETRIES {
                warn!("⚠️ No voices reported by {} after {} polls", backend.name(), attempts);
                return Vec::new();
            }

            let sleep = tokio::time::sleep(VOICE_LOAD_INTERVAL);
            tokio::pin!(sleep);

            loop {
                let wake = tokio::select! {
                    _ = &mut sleep => Wake::Timer,
                    open = next_change(&mut changed) => Wake::Changed(open),
                };

                match wake {
                    Wake::Timer => break,
                    Wake::Changed(true) => {
                        let voices = backend.voices();
                        if !voices.is_empty() {
                            debug!("Loaded {} voices on change notification", voices.len());
                            return voices;
                        }
                    }
                    Wake::Changed(false) => changed = None,
                }
            }
        }
    }
}

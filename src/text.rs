//! Text preparation for speech
//!
//! Sentence-aware chunking and a rough speaking-time estimate. Some backends
//! silently stop speaking after a fixed wall-clock duration, so long text is
//! split at sentence boundaries and spoken piece by piece.

use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

/// Default chunk size in words
pub const MAX_WORDS_PER_CHUNK: usize = 30;

/// Spoken words per second at rate 1.0
const WORDS_PER_SECOND: f64 = 2.5;

/// Fixed slack added to every estimate
const DURATION_BUFFER_MS: f64 = 3000.0;

/// Slowest and fastest rate a backend accepts
pub const MIN_RATE: f32 = 0.1;
pub const MAX_RATE: f32 = 10.0;

lazy_static! {
    /// Sentence-ending punctuation followed by whitespace
    static ref SENTENCE_BOUNDARY: Regex = Regex::new(r"[.!?]\s+").expect("valid regex");
}

/// Count whitespace-separated words
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Clamp a speaking rate into the range every backend accepts.
///
/// Non-finite rates fall back to 1.0.
pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_RATE, MAX_RATE)
    } else {
        1.0
    }
}

/// Split text into sentences, keeping the terminating punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in SENTENCE_BOUNDARY.find_iter(text) {
        // Punctuation is a single ASCII byte, so +1 stays on a char boundary
        let sentence = &text[start..m.start() + 1];
        if !sentence.trim().is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }

    let tail = &text[start..];
    if !tail.trim().is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Split long text into sentence-bounded chunks of at most `max_words` words.
///
/// Text at or under the limit comes back unchanged as a single chunk, and so
/// does text without any detectable sentence boundary. A single sentence is
/// never split, even when it alone exceeds the limit.
pub fn chunk_for_speech(text: &str, max_words: usize) -> Vec<String> {
    if word_count(text) <= max_words {
        return vec![text.to_string()];
    }

    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        let combined = if current.is_empty() {
            sentence.to_string()
        } else {
            format!("{} {}", current, sentence)
        };

        if word_count(&combined) > max_words && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current = sentence.to_string();
        } else {
            current = combined;
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    if chunks.is_empty() {
        vec![text.to_string()]
    } else {
        chunks
    }
}

/// Estimate how long `text` takes to speak at `rate`.
///
/// Assumes ~2.5 words per second at rate 1.0, scaled inversely by rate, plus
/// a 3 second buffer. This is a ceiling for the forward-progress timeout, not
/// a precise clock.
pub fn estimate_duration(text: &str, rate: f32) -> Duration {
    let words = word_count(text) as f64;
    let rate = f64::from(clamp_rate(rate));
    let millis = (words / WORDS_PER_SECOND / rate) * 1000.0 + DURATION_BUFFER_MS;
    Duration::from_secs_f64(millis / 1000.0)
}

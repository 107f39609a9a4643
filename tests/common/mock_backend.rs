//! Mock Speech Backend for Testing
//!
//! Scripted backend that records every utterance it is handed and misbehaves
//! on request, the way real platform backends do.

use civic_speech::quirks::HostFamily;
use civic_speech::tts::{Boundary, SpeechBackend, Utterance, UtteranceEvent};
use civic_speech::{SpeechResult, Voice};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// How the mock reacts to `speak`
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Fire `end` after the delay
    AutoEnd(Duration),
    /// Fire `end` twice after the delay
    DoubleEnd(Duration),
    /// Never report completion
    Silent,
    /// Fail the first `n` utterances with `synthesis-failed`, then end normally
    FailFirst(usize),
    /// Fail every utterance with the given code
    AlwaysFail(String),
}

/// Recorded view of one utterance handed to the backend
#[derive(Debug, Clone)]
pub struct Spoken {
    pub id: u64,
    pub text: String,
    pub rate: f32,
    pub voice: Option<String>,
}

#[derive(Debug)]
pub struct MockBackend {
    pub behavior: Mutex<Behavior>,
    pub host: HostFamily,
    pub available: bool,
    /// Report own cancellation as an `interrupted` error
    pub cancel_as_error: bool,
    /// Emit one boundary event before finishing
    pub boundaries: bool,
    pub spoken: Mutex<Vec<Spoken>>,
    pub voices: Mutex<Vec<Voice>>,
    pub paused: AtomicBool,
    pub cancel_calls: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    current: Mutex<Option<Arc<Utterance>>>,
    voices_tx: broadcast::Sender<()>,
}

impl MockBackend {
    pub fn new(behavior: Behavior) -> Self {
        let (voices_tx, _) = broadcast::channel(4);
        Self {
            behavior: Mutex::new(behavior),
            host: HostFamily::Desktop,
            available: true,
            cancel_as_error: false,
            boundaries: false,
            spoken: Mutex::new(Vec::new()),
            voices: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            cancel_calls: AtomicUsize::new(0),
            pause_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            current: Mutex::new(None),
            voices_tx,
        }
    }

    pub fn mobile(mut self) -> Self {
        self.host = HostFamily::Mobile;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn cancel_as_error(mut self) -> Self {
        self.cancel_as_error = true;
        self
    }

    pub fn with_boundaries(mut self) -> Self {
        self.boundaries = true;
        self
    }

    pub fn with_voices(self, voices: Vec<Voice>) -> Self {
        *self.voices.lock().unwrap() = voices;
        self
    }

    /// Replace the voice list, optionally firing the change notification
    pub fn set_voices(&self, voices: Vec<Voice>, notify: bool) {
        *self.voices.lock().unwrap() = voices;
        if notify {
            let _ = self.voices_tx.send(());
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn spoken(&self) -> Vec<Spoken> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken().into_iter().map(|s| s.text).collect()
    }

    /// Number of utterances handed over so far
    pub fn spoken_count(&self) -> usize {
        self.spoken.lock().unwrap().len()
    }
}

impl SpeechBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn host_family(&self) -> HostFamily {
        self.host
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.lock().unwrap().clone()
    }

    fn voices_changed(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.voices_tx.subscribe())
    }

    fn speak(&self, utterance: Arc<Utterance>) -> SpeechResult<()> {
        let index = {
            let mut spoken = self.spoken.lock().unwrap();
            spoken.push(Spoken {
                id: utterance.id(),
                text: utterance.text().to_string(),
                rate: utterance.rate(),
                voice: utterance.voice().map(|v| v.name.clone()),
            });
            spoken.len()
        };
        *self.current.lock().unwrap() = Some(utterance.clone());

        let behavior = self.behavior.lock().unwrap().clone();
        let twice = matches!(behavior, Behavior::DoubleEnd(_));
        if self.boundaries {
            utterance.emit(UtteranceEvent::Boundary(Boundary {
                char_index: 0,
                char_length: utterance.text().len(),
            }));
        }

        match behavior {
            Behavior::Silent => {}
            Behavior::AutoEnd(delay) | Behavior::DoubleEnd(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    utterance.end();
                    if twice {
                        utterance.end();
                    }
                });
            }
            Behavior::FailFirst(n) => {
                if index <= n {
                    utterance.fail("synthesis-failed");
                } else {
                    utterance.end();
                }
            }
            Behavior::AlwaysFail(code) => {
                utterance.fail(code);
            }
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.current.lock().unwrap().take();
        self.paused.store(false, Ordering::SeqCst);
        if let Some(utterance) = current {
            if self.cancel_as_error {
                utterance.fail("interrupted");
            }
        }
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Speaking until the current utterance settles, however it settles
    fn is_speaking(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|u| !u.is_settled())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Records calls made on the pre-rendered clip player
#[derive(Debug, Default)]
pub struct MockPlayer {
    pub cancel_all_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl civic_speech::AudioPlayback for MockPlayer {
    async fn play(&self, _url: &str, _rate: f32) -> SpeechResult<()> {
        Ok(())
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn cancel(&self) {}

    fn cancel_all(&self) {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
    }
}

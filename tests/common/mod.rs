#![allow(dead_code)]

pub mod mock_backend;

use civic_speech::{EngineDefaults, SpeechBackend, SpeechEngine, VoiceCatalog};
use mock_backend::{Behavior, MockBackend};
use std::sync::Arc;

/// Engine wired to a mock backend, plus handles for inspecting both
pub struct TestContext {
    pub backend: Arc<MockBackend>,
    pub catalog: Arc<VoiceCatalog>,
    pub engine: SpeechEngine,
}

impl TestContext {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_backend(MockBackend::new(behavior))
    }

    pub fn with_backend(backend: MockBackend) -> Self {
        let backend = Arc::new(backend);
        let catalog = Arc::new(VoiceCatalog::new());
        let speech: Arc<dyn SpeechBackend> = backend.clone();
        let engine = SpeechEngine::new(Some(speech), catalog.clone(), EngineDefaults::default());
        Self {
            backend,
            catalog,
            engine,
        }
    }
}

/// `count` sentences of `words_each` distinct words
pub fn sentences(count: usize, words_each: usize) -> String {
    (0..count)
        .map(|s| {
            let words: Vec<String> = (0..words_each).map(|w| format!("w{}s{}", w, s)).collect();
            format!("{}.", words.join(" "))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//! espeak-ng backend driving the local binary

use super::{SpeechBackend, Utterance};
use crate::error::SpeechResult;
use crate::voices::Voice;
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// espeak-ng words per minute at rate 1.0
const BASE_WPM: f32 = 175.0;
const MIN_WPM: f32 = 80.0;
const MAX_WPM: f32 = 450.0;

/// The child process speaking the current utterance
#[derive(Debug)]
struct ActiveSpeech {
    utterance_id: u64,
    kill: oneshot::Sender<()>,
}

#[derive(Debug)]
pub struct EspeakBackend {
    binary: String,
    voices: OnceLock<Vec<Voice>>,
    available: OnceLock<bool>,
    active: Arc<Mutex<Option<ActiveSpeech>>>,
}

impl EspeakBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            voices: OnceLock::new(),
            available: OnceLock::new(),
            active: Arc::new(Mutex::new(None)),
        }
    }

    fn list_voices(&self) -> Vec<Voice> {
        match std::process::Command::new(&self.binary).arg("--voices").output() {
            Ok(output) if output.status.success() => {
                let voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
                info!("🔊 espeak-ng reports {} voices", voices.len());
                voices
            }
            Ok(output) => {
                warn!("⚠️ {} --voices exited with {}", self.binary, output.status);
                Vec::new()
            }
            Err(e) => {
                warn!("⚠️ Could not list espeak-ng voices: {}", e);
                Vec::new()
            }
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSpeech>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse the table printed by `espeak-ng --voices`.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 10)
/// ```
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            let lang = cols[1];
            let name = cols[3].replace('_', " ");
            Some(Voice::new(name, lang, true, lang))
        })
        .collect()
}

/// Map an engine rate (1.0 = normal) to espeak-ng words per minute
pub fn rate_to_wpm(rate: f32) -> u32 {
    (BASE_WPM * rate).round().clamp(MIN_WPM, MAX_WPM) as u32
}

/// Map an engine pitch (1.0 = normal) to espeak-ng's 0-99 scale
pub fn pitch_to_espeak(pitch: f32) -> u32 {
    (pitch * 50.0).round().clamp(0.0, 99.0) as u32
}

impl SpeechBackend for EspeakBackend {
    fn name(&self) -> &str {
        "espeak-ng"
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            std::process::Command::new(&self.binary)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.get_or_init(|| self.list_voices()).clone()
    }

    fn speak(&self, utterance: Arc<Utterance>) -> SpeechResult<()> {
        let voice = utterance
            .voice()
            .map(|v| v.voice_uri.clone())
            .unwrap_or_else(|| utterance.lang().to_lowercase());

        debug!(
            "espeak-ng speaking [{}] voice={} rate={} pitch={}",
            utterance.id(),
            voice,
            utterance.rate(),
            utterance.pitch()
        );

        let spawned = Command::new(&self.binary)
            .arg("-v")
            .arg(&voice)
            .arg("-s")
            .arg(rate_to_wpm(utterance.rate()).to_string())
            .arg("-p")
            .arg(pitch_to_espeak(utterance.pitch()).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!("❌ Failed to spawn {}: {}", self.binary, e);
                utterance.fail("audio-busy");
                return Ok(());
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        let id = utterance.id();
        if let Some(previous) = self.active().replace(ActiveSpeech {
            utterance_id: id,
            kill: kill_tx,
        }) {
            let _ = previous.kill.send(());
        }

        let active = self.active.clone();
        let stdin = child.stdin.take();
        tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(utterance.text().as_bytes()).await {
                    warn!("⚠️ Failed to feed text to espeak-ng: {}", e);
                }
                // Dropping stdin closes it so espeak-ng starts speaking
            }

            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => {
                        utterance.end();
                    }
                    Ok(status) => {
                        warn!("⚠️ espeak-ng exited with {}", status);
                        utterance.fail("synthesis-failed");
                    }
                    Err(e) => {
                        warn!("⚠️ espeak-ng wait failed: {}", e);
                        utterance.fail("synthesis-failed");
                    }
                },
                _ = kill_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    utterance.fail("interrupted");
                }
            }

            let mut guard = active.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.as_ref().is_some_and(|a| a.utterance_id == id) {
                *guard = None;
            }
        });

        Ok(())
    }

    fn cancel(&self) {
        if let Some(active) = self.active().take() {
            debug!("🛑 Killing espeak-ng for utterance {}", active.utterance_id);
            let _ = active.kill.send(());
        }
    }

    fn pause(&self) {
        debug!("espeak-ng cannot pause; ignoring");
    }

    fn resume(&self) {
        debug!("espeak-ng cannot resume; ignoring");
    }

    fn is_speaking(&self) -> bool {
        self.active().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::{UtteranceError, UtteranceEvent};

    const SAMPLE: &str = "Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 5  en-us           --/M      English_(America)  gmw/en-US            (en 10)
 5  my              --/M      Myanmar_(Burmese)  sit/my
";

    #[test]
    fn test_parse_voice_list() {
        let voices = parse_voice_list(SAMPLE);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[1].name, "English (America)");
        assert_eq!(voices[1].lang, "en-us");
        assert_eq!(voices[1].voice_uri, "en-us");
        assert!(voices.iter().all(|v| v.local_service));
    }

    #[test]
    fn test_parse_ignores_garbage() {
        assert!(parse_voice_list("").is_empty());
        assert!(parse_voice_list("header only\n\n  x y\n").is_empty());
    }

    #[test]
    fn test_rate_and_pitch_mapping() {
        assert_eq!(rate_to_wpm(1.0), 175);
        assert_eq!(rate_to_wpm(0.1), 80);
        assert_eq!(rate_to_wpm(10.0), 450);
        assert_eq!(pitch_to_espeak(1.0), 50);
        assert_eq!(pitch_to_espeak(1.02), 51);
        assert_eq!(pitch_to_espeak(5.0), 99);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let backend = EspeakBackend::new("/nonexistent/espeak-ng-for-tests");
        assert!(!backend.is_available());
        assert!(backend.voices().is_empty());
        assert!(!backend.is_speaking());
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_audio_busy() {
        let backend = EspeakBackend::new("/nonexistent/espeak-ng-for-tests");
        let (utterance, mut rx) = Utterance::new("hello", None, "en-US", 1.0, 1.0);
        assert!(backend.speak(utterance.clone()).is_ok());

        assert_eq!(
            rx.try_recv().ok(),
            Some(UtteranceEvent::Error(UtteranceError::new("audio-busy")))
        );
        assert!(utterance.is_settled());
        assert!(!backend.is_speaking());
    }
}

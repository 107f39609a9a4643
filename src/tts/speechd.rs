//! Speechd-ng backend using D-Bus
//!
//! The daemon queues text and returns; it never reports completion and does
//! not expose voices. Every utterance therefore finishes through the
//! engine's forward-progress timeout.

use super::{SpeechBackend, Utterance};
use crate::error::{SpeechError, SpeechResult};
use crate::voices::Voice;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.speech.Service",
    default_service = "org.speech.Service",
    default_path = "/org/speech/Service"
)]
trait SpeechService {
    /// Speak text using default voice
    fn speak(&self, text: &str) -> zbus::Result<()>;

    /// Speak text using specific voice
    fn speak_voice(&self, text: &str, voice: &str) -> zbus::Result<()>;

    /// Ping the service
    fn ping(&self) -> zbus::Result<String>;
}

pub struct SpeechdBackend {
    proxy: SpeechServiceProxy<'static>,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl std::fmt::Debug for SpeechdBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechdBackend").finish()
    }
}

impl SpeechdBackend {
    pub async fn connect() -> SpeechResult<Self> {
        let connection = Connection::session().await?;
        let proxy = SpeechServiceProxy::new(&connection).await?;

        match proxy.ping().await {
            Ok(response) => {
                info!("🔊 Connected to speechd-ng: {}", response);
            }
            Err(e) => {
                warn!("⚠️ speechd-ng not responding: {}", e);
                return Err(SpeechError::Backend(format!(
                    "speechd-ng not responding: {}",
                    e
                )));
            }
        }

        Ok(Self {
            proxy,
            in_flight: Mutex::new(None),
        })
    }

    fn abort_in_flight(&self) {
        if let Some(handle) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl SpeechBackend for SpeechdBackend {
    fn name(&self) -> &str {
        "speechd_ng"
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn speak(&self, utterance: Arc<Utterance>) -> SpeechResult<()> {
        self.abort_in_flight();

        let proxy = self.proxy.clone();
        let task = tokio::spawn(async move {
            let result = match utterance.voice() {
                Some(voice) => proxy.speak_voice(utterance.text(), &voice.voice_uri).await,
                None => proxy.speak(utterance.text()).await,
            };
            if let Err(e) = result {
                warn!("⚠️ speechd-ng speak failed: {}", e);
                utterance.fail("synthesis-failed");
            }
        });

        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());
        Ok(())
    }

    fn cancel(&self) {
        debug!("speechd-ng has no stop call; dropping pending request");
        self.abort_in_flight();
    }

    fn pause(&self) {
        debug!("speechd-ng cannot pause; ignoring");
    }

    fn resume(&self) {
        debug!("speechd-ng cannot resume; ignoring");
    }

    fn is_speaking(&self) -> bool {
        false
    }
}

//! Backend quirk workarounds
//!
//! Each workaround for a misbehaving speech backend lives here as a small,
//! separately testable decision, and the engine composes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;

/// Delay after cancelling before new speech may start.
///
/// One backend family corrupts its queue when speech starts right after a cancel.
pub const CANCEL_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Period of the pause/resume keep-alive ping.
///
/// Just under the ~15s after which some backends silently stop speaking.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(14);

/// Backoff before retrying a failed chunk
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Error codes backends use when an utterance was cancelled rather than failed
const CANCELLATION_CODES: &[&str] = &["canceled", "interrupted"];

/// Broad host platform class, as far as speech quirks go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostFamily {
    #[default]
    Desktop,
    /// Mobile hosts, where a pause/resume cycle breaks playback
    Mobile,
}

/// Whether the keep-alive ping may run on this host at all
pub fn keep_alive_enabled(family: HostFamily) -> bool {
    family != HostFamily::Mobile
}

/// What the keep-alive timer should do on a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveTick {
    /// Issue pause immediately followed by resume
    Ping,
    /// Leave user-paused speech alone this tick
    Skip,
    /// Backend went quiet; the interval cancels itself
    Stop,
}

pub fn keep_alive_tick(backend_speaking: bool, backend_paused: bool) -> KeepAliveTick {
    if !backend_speaking {
        KeepAliveTick::Stop
    } else if backend_paused {
        KeepAliveTick::Skip
    } else {
        KeepAliveTick::Ping
    }
}

/// Whether a cancel plus settle delay is needed before speaking
pub fn needs_cancel_settle(backend_speaking: bool, backend_pending: bool) -> bool {
    backend_speaking || backend_pending
}

/// Some backends report their own cancellation as a generic error
pub fn is_cancellation(code: &str) -> bool {
    CANCELLATION_CODES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(code.trim()))
}

/// One-shot flag; only the first `settle()` wins.
///
/// Guards against backends that fire completion twice.
#[derive(Debug, Default)]
pub struct SettleFlag(AtomicBool);

impl SettleFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark settled. Returns true only for the first caller.
    pub fn settle(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_settled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Chunk-level retry policy: a fixed backoff, a fixed number of retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Backoff delays, one per permitted retry
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        FixedInterval::new(self.backoff).take(self.max_retries)
    }

    /// Cancellation always wins over retry.
    pub fn should_retry(&self, cancelled_error: bool, aborted: bool) -> bool {
        self.max_retries > 0 && !cancelled_error && !aborted
    }
}

//! Process-wide stop signalling

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tracing::info;

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Escape key or window close
    Operator,
    /// The video feed reported a terminal condition
    FeedTerminated,
    /// Ctrl-C / SIGINT
    Interrupt,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Operator => "operator request",
            StopReason::FeedTerminated => "video feed terminated",
            StopReason::Interrupt => "interrupt",
        })
    }
}

/// Shared stop flag. Created by the supervisor, checked once per iteration by
/// every loop. The first reason recorded is kept.
#[derive(Debug, Default)]
pub struct SessionState {
    stop: AtomicBool,
    reason: OnceLock<StopReason>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self, reason: StopReason) {
        if self.reason.set(reason).is_ok() {
            info!("Stop requested: {}", reason);
        }
        self.stop.store(true, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }
}

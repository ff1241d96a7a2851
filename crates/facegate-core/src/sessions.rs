use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::liveness::{
    EyeObservation, LivenessParams, LivenessReport, LivenessSession, LivenessState,
};

/// Clock a frame timestamp was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// Supplied by the caller with the frame.
    Caller,
    /// The service's own monotonic clock.
    Service,
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => f.write_str("caller"),
            Self::Service => f.write_str("service"),
        }
    }
}

/// Capture time of one frame, tagged with its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTime {
    pub clock: Clock,
    pub ms: u64,
}

impl FrameTime {
    pub fn caller(ms: u64) -> Self {
        Self {
            clock: Clock::Caller,
            ms,
        }
    }

    pub fn service(ms: u64) -> Self {
        Self {
            clock: Clock::Service,
            ms,
        }
    }
}

/// A frame rejected before it reached the session's state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is timed by the {bound} clock, frame carries a {got} timestamp")]
    ClockMismatch { bound: Clock, got: Clock },
    #[error("timestamp {now_ms} ms is earlier than the previous frame at {last_ms} ms")]
    TimestampRegressed { now_ms: u64, last_ms: u64 },
}

/// One table entry: the state machine plus the clock its frames are read from.
///
/// The first timed frame binds the clock. Later frames must use the same
/// clock and must not go backwards, otherwise the cooldown would compare
/// timestamps from unrelated epochs.
#[derive(Debug, Default)]
struct SessionSlot {
    clock: Option<Clock>,
    last_frame_ms: Option<u64>,
    machine: LivenessSession,
}

impl SessionSlot {
    fn check_time(&self, time: FrameTime) -> Result<(), SessionError> {
        if let Some(bound) = self.clock {
            if bound != time.clock {
                return Err(SessionError::ClockMismatch {
                    bound,
                    got: time.clock,
                });
            }
        }
        match self.last_frame_ms {
            Some(last_ms) if time.ms < last_ms => Err(SessionError::TimestampRegressed {
                now_ms: time.ms,
                last_ms,
            }),
            _ => Ok(()),
        }
    }
}

/// Session-keyed table of blink state machines.
///
/// Each key owns an independent [`LivenessSession`], created lazily on first
/// use. Frames for different keys never share state; frames for the same key
/// are serialized through that session's own lock, so the closed-frame
/// counter and cooldown see one update at a time. The table lock is held only
/// long enough to look up or insert a session.
pub struct LivenessSessions {
    params: LivenessParams,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionSlot>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every combination of session fields is a valid machine state.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LivenessSessions {
    pub fn new(params: LivenessParams) -> Self {
        Self {
            params,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &LivenessParams {
        &self.params
    }

    /// Feed one frame to the session identified by `key`.
    ///
    /// A frame whose timestamp uses a different clock than the session's
    /// earlier frames, or goes backwards, is rejected and leaves the session
    /// untouched.
    pub fn observe<F>(
        &self,
        key: &str,
        observation: EyeObservation,
        time: FrameTime,
        frame: Option<F>,
    ) -> Result<LivenessReport<F>, SessionError> {
        let slot = self.slot(key);
        let mut slot = lock(&slot);
        if let Err(e) = slot.check_time(time) {
            tracing::warn!(session = key, error = %e, "liveness frame rejected");
            return Err(e);
        }
        slot.clock = Some(time.clock);
        slot.last_frame_ms = Some(time.ms);
        Ok(slot.machine.observe(&self.params, observation, time.ms, frame))
    }

    /// Create the session for `key` if it does not exist yet.
    pub fn open(&self, key: &str) {
        self.slot(key);
        tracing::debug!(session = key, "liveness session opened");
    }

    /// Force the session back to `WaitingForOpen`.
    ///
    /// The bound clock and cooldown survive the reset. Returns `false` if no
    /// such session exists.
    pub fn reset(&self, key: &str) -> bool {
        let Some(slot) = lock(&self.sessions).get(key).cloned() else {
            return false;
        };
        lock(&slot).machine.reset();
        tracing::debug!(session = key, "liveness session reset");
        true
    }

    pub fn state(&self, key: &str) -> Option<LivenessState> {
        self.snapshot(key).map(|s| s.state())
    }

    /// Copy of the session's current state, if it exists.
    pub fn snapshot(&self, key: &str) -> Option<LivenessSession> {
        let slot = lock(&self.sessions).get(key).cloned()?;
        let snapshot = lock(&slot).machine.clone();
        Some(snapshot)
    }

    /// Clock the session is bound to, once it has seen a frame.
    pub fn clock(&self, key: &str) -> Option<Clock> {
        let slot = lock(&self.sessions).get(key).cloned()?;
        let clock = lock(&slot).clock;
        clock
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Arc<Mutex<SessionSlot>> {
        lock(&self.sessions)
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

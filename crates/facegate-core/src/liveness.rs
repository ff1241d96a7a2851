//! Active liveness detection via a debounced blink state machine.
//!
//! A printed photograph cannot close its eyes. This module watches the eye
//! aspect ratio (EAR) frame by frame and confirms a blink only when the eyes
//! were clearly open, then closed for several consecutive frames, then open
//! again. A cooldown between accepted blinks stops one long closure or camera
//! jitter from being counted twice.
//!
//! The machine consumes EAR values already produced by the landmark
//! extractor. It runs no inference and never fails: a frame without a usable
//! face is a valid input that resets the session.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs and static images held to the camera.
//! - **Does not block:** Video replay of a blinking subject, masks with eye
//!   cut-outs, or adversarial displays.

use serde::{Deserialize, Serialize};

use crate::geometry::{eye_aspect_ratio, Landmarks};

/// EAR below which an eye is considered closed.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.22;
/// Extra margin above the threshold before the eyes count as open. Keeps
/// borderline EAR noise from arming the blink window.
pub const DEFAULT_OPEN_MARGIN: f32 = 0.04;
/// Consecutive closed frames needed for a blink. Filters single-frame noise
/// while still accepting fast blinks at 10+ fps.
pub const DEFAULT_CLOSED_FRAMES_REQUIRED: u32 = 2;
/// Minimum gap between two accepted blinks.
pub const DEFAULT_BLINK_COOLDOWN_MS: u64 = 700;

/// Tunable constants of the blink state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessParams {
    pub ear_threshold: f32,
    pub open_margin: f32,
    pub closed_frames_required: u32,
    pub blink_cooldown_ms: u64,
}

impl Default for LivenessParams {
    fn default() -> Self {
        Self {
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            open_margin: DEFAULT_OPEN_MARGIN,
            closed_frames_required: DEFAULT_CLOSED_FRAMES_REQUIRED,
            blink_cooldown_ms: DEFAULT_BLINK_COOLDOWN_MS,
        }
    }
}

impl LivenessParams {
    fn open_threshold(&self) -> f32 {
        self.ear_threshold + self.open_margin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessState {
    #[default]
    WaitingForOpen,
    WaitingForBlink,
}

/// Status label reported to the caller for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessStatus {
    WaitingForOpen,
    /// The eyes were just seen open; the subject should blink now.
    BlinkNow,
    WaitingForBlink,
}

impl LivenessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForOpen => "WAITING_FOR_OPEN",
            Self::BlinkNow => "BLINK_NOW",
            Self::WaitingForBlink => "WAITING_FOR_BLINK",
        }
    }
}

impl From<LivenessState> for LivenessStatus {
    fn from(state: LivenessState) -> Self {
        match state {
            LivenessState::WaitingForOpen => Self::WaitingForOpen,
            LivenessState::WaitingForBlink => Self::WaitingForBlink,
        }
    }
}

/// What one frame showed about the subject's eyes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EyeObservation {
    NoFace,
    /// Per-eye EAR; `None` for an eye whose contour was unusable.
    Eyes {
        left: Option<f32>,
        right: Option<f32>,
    },
}

impl EyeObservation {
    pub fn from_landmarks(landmarks: &Landmarks) -> Self {
        Self::Eyes {
            left: eye_aspect_ratio(&landmarks.left_eye()),
            right: eye_aspect_ratio(&landmarks.right_eye()),
        }
    }

    /// Mean EAR over the usable eyes, or `None` if neither eye is usable.
    pub fn average_ear(&self) -> Option<f32> {
        let Self::Eyes { left, right } = *self else {
            return None;
        };
        let usable = |ear: Option<f32>| ear.filter(|v| v.is_finite() && *v >= 0.0);
        match (usable(left), usable(right)) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            (Some(ear), None) | (None, Some(ear)) => Some(ear),
            (None, None) => None,
        }
    }
}

/// Outcome of feeding one frame to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessReport<F> {
    pub status: LivenessStatus,
    pub blink_confirmed: bool,
    /// The caller's frame, handed back only on a confirmed blink.
    pub frame: Option<F>,
}

/// Blink-detection state for one logical session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivenessSession {
    state: LivenessState,
    consecutive_closed_frames: u32,
    last_accepted_blink_ms: Option<u64>,
}

impl LivenessSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn consecutive_closed_frames(&self) -> u32 {
        self.consecutive_closed_frames
    }

    pub fn last_accepted_blink_ms(&self) -> Option<u64> {
        self.last_accepted_blink_ms
    }

    /// Return to `WaitingForOpen`. The cooldown clock is kept.
    pub fn reset(&mut self) {
        self.state = LivenessState::WaitingForOpen;
        self.consecutive_closed_frames = 0;
    }

    /// Advance the state machine by one frame taken at `now_ms`.
    ///
    /// `frame` is opaque to the machine and is returned in the report only
    /// when this frame confirms a blink. The reported status is the state the
    /// frame found; a frame without usable eyes therefore reports the state it
    /// interrupted and leaves the session in `WaitingForOpen`.
    pub fn observe<F>(
        &mut self,
        params: &LivenessParams,
        observation: EyeObservation,
        now_ms: u64,
        frame: Option<F>,
    ) -> LivenessReport<F> {
        let mut status = LivenessStatus::from(self.state);
        let Some(ear) = observation.average_ear() else {
            self.reset();
            return LivenessReport {
                status,
                blink_confirmed: false,
                frame: None,
            };
        };

        let mut blink_confirmed = false;

        match self.state {
            LivenessState::WaitingForOpen => {
                if ear > params.open_threshold() {
                    self.state = LivenessState::WaitingForBlink;
                    status = LivenessStatus::BlinkNow;
                    tracing::debug!(ear, "liveness: eyes open, waiting for blink");
                }
            }
            LivenessState::WaitingForBlink => {
                if ear < params.ear_threshold {
                    self.consecutive_closed_frames =
                        self.consecutive_closed_frames.saturating_add(1);
                } else {
                    if self.consecutive_closed_frames >= params.closed_frames_required {
                        if self.cooldown_elapsed(now_ms, params.blink_cooldown_ms) {
                            blink_confirmed = true;
                            self.last_accepted_blink_ms = Some(now_ms);
                            tracing::info!(
                                closed_frames = self.consecutive_closed_frames,
                                now_ms,
                                "liveness: blink confirmed"
                            );
                        } else {
                            tracing::debug!(
                                now_ms,
                                last_blink_ms = ?self.last_accepted_blink_ms,
                                "liveness: blink inside cooldown ignored"
                            );
                        }
                    }
                    self.reset();
                }
            }
        }

        LivenessReport {
            status,
            blink_confirmed,
            frame: if blink_confirmed { frame } else { None },
        }
    }

    fn cooldown_elapsed(&self, now_ms: u64, cooldown_ms: u64) -> bool {
        match self.last_accepted_blink_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > cooldown_ms,
        }
    }
}

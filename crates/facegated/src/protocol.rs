//! JSON request/response bodies carried by the D-Bus methods, and the
//! handlers that run them through the core engines.
//!
//! Field names also accept the names used by existing enrollment backends
//! (`known_students`, `_id`, `new_embedding`, `image`).

use facegate_core::{
    Embedding, EmbeddingMatcher, EyeObservation, FrameTime, GalleryEntry, Landmarks,
    LivenessSessions, LivenessStatus, MatchError, SessionError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("malformed request: {0}")]
    Input(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<ServiceError> for zbus::fdo::Error {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Input(_)
            | ServiceError::Session(_)
            | ServiceError::Match(MatchError::InvalidProbe(_))
            | ServiceError::Match(MatchError::InvalidThreshold(_)) => {
                zbus::fdo::Error::InvalidArgs(e.to_string())
            }
            ServiceError::Match(MatchError::EmptyValidGallery { .. }) | ServiceError::Encode(_) => {
                zbus::fdo::Error::Failed(e.to_string())
            }
        }
    }
}

fn decode<'a, T: Deserialize<'a>>(request: &'a str) -> Result<T, ServiceError> {
    serde_json::from_str(request).map_err(|e| ServiceError::Input(e.to_string()))
}

fn encode<T: Serialize>(response: &T) -> Result<String, ServiceError> {
    serde_json::to_string(response).map_err(ServiceError::Encode)
}

// ── Liveness ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObserveFrameRequest {
    pub session: String,
    /// 68 `[x, y]` points, or `null` when no face was found.
    #[serde(default)]
    pub landmarks: Option<Vec<[f32; 2]>>,
    /// Frame capture time; the daemon's monotonic clock when omitted. A
    /// session keeps whichever clock its first frame used.
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    /// Opaque frame (typically base64 JPEG) echoed back on a confirmed blink.
    #[serde(default, alias = "image")]
    pub frame: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ObserveFrameResponse {
    pub status: LivenessStatus,
    pub blink_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_image: Option<String>,
}

pub fn observe_frame(
    sessions: &LivenessSessions,
    request: &str,
    now_ms: u64,
) -> Result<String, ServiceError> {
    let req: ObserveFrameRequest = decode(request)?;
    if req.session.is_empty() {
        return Err(ServiceError::Input("session must not be empty".to_string()));
    }

    // Validate everything before touching session state
    let observation = match req.landmarks {
        None => EyeObservation::NoFace,
        Some(points) => {
            let points = points.into_iter().map(|[x, y]| (x, y)).collect();
            let landmarks =
                Landmarks::new(points).map_err(|e| ServiceError::Input(e.to_string()))?;
            EyeObservation::from_landmarks(&landmarks)
        }
    };

    let time = match req.timestamp_ms {
        Some(ms) => FrameTime::caller(ms),
        None => FrameTime::service(now_ms),
    };
    let report = sessions.observe(&req.session, observation, time, req.frame)?;

    encode(&ObserveFrameResponse {
        status: report.status,
        blink_detected: report.blink_confirmed,
        live_image: report.frame,
    })
}

// ── Recognition ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecognizeRequest {
    /// One embedding per face found in the probe image.
    pub probes: Vec<Vec<f32>>,
    #[serde(alias = "known_students")]
    pub gallery: Vec<GalleryEntry>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RecognizeResponse {
    pub recognized_ids: Vec<String>,
    pub skipped_entries: usize,
}

pub fn recognize(matcher: &EmbeddingMatcher, request: &str) -> Result<String, ServiceError> {
    let req: RecognizeRequest = decode(request)?;
    let probes: Vec<Embedding> = req.probes.into_iter().map(Embedding::new).collect();

    let recognition = matcher.recognize(&probes, &req.gallery, req.threshold)?;
    tracing::info!(
        probes = probes.len(),
        gallery = req.gallery.len(),
        recognized = recognition.matched_ids.len(),
        skipped = recognition.skipped_entries,
        "recognize complete"
    );

    encode(&RecognizeResponse {
        recognized_ids: recognition.matched_ids,
        skipped_entries: recognition.skipped_entries,
    })
}

// ── Duplicate check ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckDuplicateRequest {
    #[serde(alias = "new_embedding")]
    pub probe: Vec<f32>,
    #[serde(alias = "known_students")]
    pub gallery: Vec<GalleryEntry>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DuplicateStudent {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckDuplicateResponse {
    pub is_duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_student: Option<DuplicateStudent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub skipped_entries: usize,
}

pub fn check_duplicate(matcher: &EmbeddingMatcher, request: &str) -> Result<String, ServiceError> {
    let req: CheckDuplicateRequest = decode(request)?;
    let probe = Embedding::new(req.probe);

    let check = matcher.check_duplicate(&probe, &req.gallery, req.threshold)?;
    tracing::info!(
        gallery = req.gallery.len(),
        is_duplicate = check.is_duplicate,
        score = ?check.best_score,
        skipped = check.skipped_entries,
        "check_duplicate complete"
    );

    encode(&CheckDuplicateResponse {
        is_duplicate: check.is_duplicate,
        duplicate_student: check.matched.map(|m| DuplicateStudent {
            id: m.id,
            name: m.name,
        }),
        score: check.best_score,
        skipped_entries: check.skipped_entries,
    })
}

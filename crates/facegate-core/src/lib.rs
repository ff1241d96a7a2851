//! FaceGate decision engines.
//!
//! Two independent engines sit at the core of the service:
//!
//! - [`liveness`]: a per-session blink state machine fed with eye aspect
//!   ratios, kept in a session-keyed table by [`sessions`];
//! - [`matcher`]: cosine matching of probe embeddings against a gallery
//!   supplied with every call, for recognition and duplicate detection.
//!
//! Image decoding, face detection, landmark extraction and embedding
//! inference are external; [`pipeline`] defines the traits they implement.

pub mod embedding;
pub mod geometry;
pub mod liveness;
pub mod matcher;
pub mod pipeline;
pub mod sessions;

pub use embedding::{Embedding, EmbeddingBlob, EmbeddingError, GalleryEntry, DEFAULT_EMBEDDING_DIM};
pub use geometry::{eye_aspect_ratio, EyePoints, GeometryError, Landmarks};
pub use liveness::{
    EyeObservation, LivenessParams, LivenessReport, LivenessSession, LivenessState, LivenessStatus,
};
pub use matcher::{
    cosine_similarity, CosineMatcher, DuplicateCheck, EmbeddingMatcher, MatchError, MatchPolicy,
    MatchedEntry, Matcher, Recognition,
};
pub use sessions::{Clock, FrameTime, LivenessSessions, SessionError};

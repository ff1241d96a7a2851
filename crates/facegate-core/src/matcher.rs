//! Gallery matching: validity filtering, cosine similarity, and the two
//! threshold decisions built on them (recognition and duplicate detection).

use thiserror::Error;

use crate::embedding::{Embedding, EmbeddingError, GalleryEntry, DEFAULT_EMBEDDING_DIM};

/// Default score a probe must exceed to be recognized.
pub const DEFAULT_RECOGNIZE_THRESHOLD: f32 = 0.5;
/// Default score a new enrollment must exceed to be flagged as a duplicate.
/// Stricter than recognition so legitimate re-enrollment is not rejected.
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("no valid enrolled faces to compare against ({skipped} skipped)")]
    EmptyValidGallery { skipped: usize },
    #[error("invalid probe embedding: {0}")]
    InvalidProbe(#[source] EmbeddingError),
    #[error("invalid similarity threshold: {0} (must be finite and within [-1, 1])")]
    InvalidThreshold(f32),
}

/// Cosine similarity `(a·b) / (‖a‖·‖b‖)`.
///
/// Accumulates in `f64` and clamps to `[-1, 1]`. Returns 0.0 when either
/// vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !similarity.is_finite() {
        return 0.0;
    }
    similarity.clamp(-1.0, 1.0) as f32
}

/// Pairwise similarity between two embeddings.
pub trait Matcher {
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32;

    /// Highest-scoring gallery entry for `probe`. Ties go to the earliest entry.
    fn best_match<'g>(
        &self,
        probe: &Embedding,
        gallery: &ValidGallery<'g>,
    ) -> Option<BestMatch<'g>> {
        let mut best: Option<BestMatch<'g>> = None;
        for (index, (entry, embedding)) in gallery.entries.iter().enumerate() {
            let score = self.similarity(&probe.values, &embedding.values);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(BestMatch {
                    index,
                    entry: *entry,
                    score,
                });
            }
        }
        best
    }
}

/// Cosine-similarity matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

/// Winning gallery entry for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch<'g> {
    /// Position among the valid entries.
    pub index: usize,
    pub entry: &'g GalleryEntry,
    pub score: f32,
}

/// The decodable subset of a gallery.
///
/// Entries whose embedding is not a byte sequence of the expected length,
/// or that decode to a NaN/Inf component, are dropped here and counted.
#[derive(Debug)]
pub struct ValidGallery<'g> {
    entries: Vec<(&'g GalleryEntry, Embedding)>,
    skipped: usize,
}

impl<'g> ValidGallery<'g> {
    pub fn filter(gallery: &'g [GalleryEntry], embedding_dim: usize) -> Self {
        let mut entries = Vec::with_capacity(gallery.len());
        let mut skipped = 0;

        for entry in gallery {
            match entry.embedding.decode(embedding_dim) {
                Ok(embedding) => entries.push((entry, embedding)),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(id = %entry.id, error = %e, "skipping invalid gallery entry");
                }
            }
        }

        if skipped > 0 {
            tracing::info!(
                valid = entries.len(),
                skipped,
                "gallery filtered"
            );
        }

        Self { entries, skipped }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Dimension and thresholds the matcher works with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub embedding_dim: usize,
    pub recognize_threshold: f32,
    pub duplicate_threshold: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            recognize_threshold: DEFAULT_RECOGNIZE_THRESHOLD,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }
}

/// Result of [`EmbeddingMatcher::recognize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    /// Matched ids in first-match order, each at most once.
    pub matched_ids: Vec<String>,
    pub skipped_entries: usize,
}

/// Identity an enrollment collided with.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedEntry {
    pub id: String,
    pub name: Option<String>,
}

/// Result of [`EmbeddingMatcher::check_duplicate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub matched: Option<MatchedEntry>,
    /// Best score seen, whether or not it crossed the threshold.
    pub best_score: Option<f32>,
    pub skipped_entries: usize,
}

/// Recognition and duplicate decisions over a caller-supplied gallery.
///
/// Holds no mutable state; one instance can serve concurrent calls.
#[derive(Debug, Clone)]
pub struct EmbeddingMatcher<M = CosineMatcher> {
    matcher: M,
    policy: MatchPolicy,
}

impl EmbeddingMatcher<CosineMatcher> {
    pub fn new(policy: MatchPolicy) -> Self {
        Self::with_matcher(CosineMatcher, policy)
    }
}

impl<M: Matcher> EmbeddingMatcher<M> {
    pub fn with_matcher(matcher: M, policy: MatchPolicy) -> Self {
        Self { matcher, policy }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Match every probe independently against the gallery.
    ///
    /// A probe is recognized when its best score is strictly greater than
    /// `threshold` (default: the policy's recognition threshold). Probes that
    /// are themselves malformed are logged and skipped.
    pub fn recognize(
        &self,
        probes: &[Embedding],
        gallery: &[GalleryEntry],
        threshold: Option<f32>,
    ) -> Result<Recognition, MatchError> {
        let threshold = check_threshold(threshold.unwrap_or(self.policy.recognize_threshold))?;

        if gallery.is_empty() {
            return Ok(Recognition::default());
        }

        let valid = self.valid_gallery(gallery)?;
        let mut matched_ids: Vec<String> = Vec::new();

        for (i, probe) in probes.iter().enumerate() {
            if let Err(e) = probe.validate(self.policy.embedding_dim) {
                tracing::warn!(probe = i, error = %e, "skipping invalid probe embedding");
                continue;
            }
            let Some(best) = self.matcher.best_match(probe, &valid) else {
                continue;
            };
            tracing::debug!(probe = i, id = %best.entry.id, score = best.score, "best match");
            if best.score > threshold && !matched_ids.contains(&best.entry.id) {
                matched_ids.push(best.entry.id.clone());
            }
        }

        Ok(Recognition {
            matched_ids,
            skipped_entries: valid.skipped(),
        })
    }

    /// Decide whether `probe` is already enrolled under another identity.
    ///
    /// The probe must be well-formed; a malformed probe is an input error,
    /// not a "no duplicate" answer.
    pub fn check_duplicate(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        threshold: Option<f32>,
    ) -> Result<DuplicateCheck, MatchError> {
        let threshold = check_threshold(threshold.unwrap_or(self.policy.duplicate_threshold))?;
        probe
            .validate(self.policy.embedding_dim)
            .map_err(MatchError::InvalidProbe)?;

        if gallery.is_empty() {
            return Ok(DuplicateCheck::default());
        }

        let valid = self.valid_gallery(gallery)?;
        let best = self.matcher.best_match(probe, &valid);
        let mut check = DuplicateCheck {
            best_score: best.as_ref().map(|b| b.score),
            skipped_entries: valid.skipped(),
            ..DuplicateCheck::default()
        };

        if let Some(best) = best.filter(|b| b.score > threshold) {
            tracing::info!(
                id = %best.entry.id,
                score = best.score,
                threshold,
                "duplicate enrollment detected"
            );
            check.is_duplicate = true;
            check.matched = Some(MatchedEntry {
                id: best.entry.id.clone(),
                name: best.entry.name.clone(),
            });
        }

        Ok(check)
    }

    fn valid_gallery<'g>(
        &self,
        gallery: &'g [GalleryEntry],
    ) -> Result<ValidGallery<'g>, MatchError> {
        let valid = ValidGallery::filter(gallery, self.policy.embedding_dim);
        if valid.is_empty() {
            return Err(MatchError::EmptyValidGallery {
                skipped: valid.skipped(),
            });
        }
        Ok(valid)
    }
}

fn check_threshold(threshold: f32) -> Result<f32, MatchError> {
    if threshold.is_finite() && (-1.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(MatchError::InvalidThreshold(threshold))
    }
}

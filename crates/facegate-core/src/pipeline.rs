//! Collaborator interfaces and the per-frame pipeline in front of the engines.
//!
//! Face detection, landmark extraction and embedding inference are provided
//! by external implementations of [`FaceDetector`], [`LandmarkExtractor`] and
//! [`EmbeddingModel`]. The functions here only decide which face to use and
//! how collaborator failures surface:
//!
//! - the liveness path never fails; any failure degrades to "no face";
//! - the embedding paths return a typed [`PipelineError`].

use thiserror::Error;

use crate::embedding::Embedding;
use crate::geometry::{GeometryError, Landmarks};
use crate::liveness::EyeObservation;

/// A decoded image handed to the collaborators. Pixel layout is whatever the
/// collaborators agree on; the pipeline never reads `data`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Axis-aligned face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersect with the frame so crops never start at negative offsets or
    /// run past the image edge.
    pub fn clamp_to(&self, width: u32, height: u32) -> FaceBox {
        let (w, h) = (width as f32, height as f32);
        let x0 = self.x.clamp(0.0, w);
        let y0 = self.y.clamp(0.0, h);
        let x1 = (self.x + self.width).clamp(0.0, w);
        let y1 = (self.y + self.height).clamp(0.0, h);
        FaceBox {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
            confidence: self.confidence,
        }
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detector failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark extractor failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("embedding model failed: {0}")]
    Failed(String),
    #[error("embedding model produced non-finite values")]
    NonFinite,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("multiple faces detected ({0})")]
    MultipleFaces(usize),
    #[error("could not process face image: {0}")]
    Inference(#[from] InferenceError),
}

pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, DetectorError>;
}

pub trait LandmarkExtractor {
    fn extract(&mut self, frame: &Frame, face: &FaceBox) -> Result<Landmarks, LandmarkError>;
}

pub trait EmbeddingModel {
    fn embed(&mut self, frame: &Frame, face: &FaceBox) -> Result<Embedding, InferenceError>;
}

/// Detector that falls back to a second implementation.
///
/// The secondary runs when the primary fails or finds nothing, e.g. an
/// accurate but strict HOG detector backed by a lenient cascade.
pub struct FallbackDetector<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackDetector<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: FaceDetector, S: FaceDetector> FaceDetector for FallbackDetector<P, S> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, DetectorError> {
        match self.primary.detect(frame) {
            Ok(faces) if !faces.is_empty() => return Ok(faces),
            Ok(_) => tracing::debug!("primary detector found no face, trying secondary"),
            Err(e) => tracing::warn!(error = %e, "primary detector failed, trying secondary"),
        }
        self.secondary.detect(frame)
    }
}

/// Largest face by area; ties go to the first detection.
pub fn largest_face(faces: &[FaceBox]) -> Option<&FaceBox> {
    let mut best: Option<&FaceBox> = None;
    for face in faces {
        if best.map_or(true, |b| face.area() > b.area()) {
            best = Some(face);
        }
    }
    best
}

/// Turn a frame into an eye observation for the liveness machine.
pub fn liveness_observation<D, L>(
    detector: &mut D,
    extractor: &mut L,
    frame: &Frame,
) -> EyeObservation
where
    D: FaceDetector + ?Sized,
    L: LandmarkExtractor + ?Sized,
{
    let faces = match detector.detect(frame) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "liveness: detection failed, treating as no face");
            return EyeObservation::NoFace;
        }
    };
    let Some(face) = largest_face(&faces) else {
        return EyeObservation::NoFace;
    };

    match extractor.extract(frame, face) {
        Ok(landmarks) => EyeObservation::from_landmarks(&landmarks),
        Err(e) => {
            tracing::warn!(error = %e, "liveness: landmarks unavailable, treating as no face");
            EyeObservation::NoFace
        }
    }
}

/// Embedding of the largest face in the frame.
pub fn extract_embedding<D, M>(
    detector: &mut D,
    model: &mut M,
    frame: &Frame,
) -> Result<Embedding, PipelineError>
where
    D: FaceDetector + ?Sized,
    M: EmbeddingModel + ?Sized,
{
    let faces = detector.detect(frame)?;
    let face = largest_face(&faces).ok_or(PipelineError::NoFaceDetected)?;
    embed_face(model, frame, face)
}

/// Embedding for enrollment, which requires exactly one face in view.
pub fn enrollment_embedding<D, M>(
    detector: &mut D,
    model: &mut M,
    frame: &Frame,
) -> Result<Embedding, PipelineError>
where
    D: FaceDetector + ?Sized,
    M: EmbeddingModel + ?Sized,
{
    let faces = detector.detect(frame)?;
    match faces.as_slice() {
        [] => Err(PipelineError::NoFaceDetected),
        [face] => embed_face(model, frame, face),
        many => Err(PipelineError::MultipleFaces(many.len())),
    }
}

/// One embedding per detected face, for recognition.
///
/// A face the model cannot process is logged and skipped. A frame with no
/// faces yields an empty list.
pub fn probe_embeddings<D, M>(
    detector: &mut D,
    model: &mut M,
    frame: &Frame,
) -> Result<Vec<Embedding>, PipelineError>
where
    D: FaceDetector + ?Sized,
    M: EmbeddingModel + ?Sized,
{
    let faces = detector.detect(frame)?;
    let mut probes = Vec::with_capacity(faces.len());
    for (i, face) in faces.iter().enumerate() {
        match embed_face(model, frame, face) {
            Ok(embedding) => probes.push(embedding),
            Err(e) => tracing::warn!(face = i, error = %e, "could not process a face"),
        }
    }
    tracing::debug!(faces = faces.len(), probes = probes.len(), "probe embeddings extracted");
    Ok(probes)
}

fn embed_face<M>(model: &mut M, frame: &Frame, face: &FaceBox) -> Result<Embedding, PipelineError>
where
    M: EmbeddingModel + ?Sized,
{
    let face = face.clamp_to(frame.width, frame.height);
    let embedding = model.embed(frame, &face)?;
    if embedding.values.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::NonFinite.into());
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LANDMARK_COUNT;

    fn frame() -> Frame {
        Frame {
            data: vec![0; 16],
            width: 640,
            height: 480,
        }
    }

    fn face(x: f32, size: f32) -> FaceBox {
        FaceBox {
            x,
            y: 10.0,
            width: size,
            height: size,
            confidence: 0.9,
        }
    }

    fn single_face() -> FixedDetector {
        FixedDetector::new(vec![face(10.0, 30.0)])
    }

    struct FixedDetector {
        faces: Vec<FaceBox>,
        calls: usize,
    }

    impl FixedDetector {
        fn new(faces: Vec<FaceBox>) -> Self {
            Self { faces, calls: 0 }
        }
    }

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _: &Frame) -> Result<Vec<FaceBox>, DetectorError> {
            self.calls += 1;
            Ok(self.faces.clone())
        }
    }

    struct BrokenDetector;

    impl FaceDetector for BrokenDetector {
        fn detect(&mut self, _: &Frame) -> Result<Vec<FaceBox>, DetectorError> {
            Err(DetectorError::Failed("model not loaded".to_string()))
        }
    }

    /// Landmarks whose eyes have the given vertical lid gap (corners 4 px apart).
    struct EyeLandmarks {
        lid_gap: f32,
        seen: Vec<FaceBox>,
    }

    impl LandmarkExtractor for EyeLandmarks {
        fn extract(&mut self, _: &Frame, face: &FaceBox) -> Result<Landmarks, LandmarkError> {
            self.seen.push(*face);
            let half = self.lid_gap / 2.0;
            let eye = [
                (0.0, 0.0),
                (1.0, -half),
                (3.0, -half),
                (4.0, 0.0),
                (3.0, half),
                (1.0, half),
            ];
            let mut points = vec![(0.0, 0.0); LANDMARK_COUNT];
            points[36..42].copy_from_slice(&eye);
            points[42..48].copy_from_slice(&eye);
            Ok(Landmarks::new(points)?)
        }
    }

    struct BrokenLandmarks;

    impl LandmarkExtractor for BrokenLandmarks {
        fn extract(&mut self, _: &Frame, _: &FaceBox) -> Result<Landmarks, LandmarkError> {
            Ok(Landmarks::new(vec![(0.0, 0.0); 5])?)
        }
    }

    /// Encodes the crop's x offset in the first component.
    struct BoxModel {
        fail_at_x: Option<f32>,
    }

    impl EmbeddingModel for BoxModel {
        fn embed(&mut self, _: &Frame, face: &FaceBox) -> Result<Embedding, InferenceError> {
            if self.fail_at_x == Some(face.x) {
                return Err(InferenceError::Failed("CUDA out of memory".to_string()));
            }
            Ok(Embedding::new(vec![face.x, face.width, 1.0]))
        }
    }

    struct NanModel;

    impl EmbeddingModel for NanModel {
        fn embed(&mut self, _: &Frame, _: &FaceBox) -> Result<Embedding, InferenceError> {
            Ok(Embedding::new(vec![f32::NAN; 3]))
        }
    }

    #[test]
    fn test_largest_face() {
        let faces = vec![face(0.0, 50.0), face(100.0, 120.0), face(300.0, 120.0)];
        assert_eq!(largest_face(&faces), Some(&faces[1]));
        assert_eq!(largest_face(&[]), None);
    }

    #[test]
    fn test_clamp_to_frame() {
        let clamped = face(-20.0, 100.0).clamp_to(640, 480);
        assert_eq!(clamped.x, 0.0);
        assert_eq!(clamped.width, 80.0);

        let edge = face(600.0, 100.0).clamp_to(640, 480);
        assert_eq!(edge.width, 40.0);
    }

    #[test]
    fn test_fallback_used_when_primary_empty() {
        let mut detector = FallbackDetector::new(
            FixedDetector::new(vec![]),
            FixedDetector::new(vec![face(5.0, 40.0)]),
        );
        let faces = detector.detect(&frame()).unwrap();
        assert_eq!(faces, vec![face(5.0, 40.0)]);
        assert_eq!(detector.secondary.calls, 1);
    }

    #[test]
    fn test_fallback_used_when_primary_fails() {
        let mut detector =
            FallbackDetector::new(BrokenDetector, FixedDetector::new(vec![face(5.0, 40.0)]));
        assert_eq!(detector.detect(&frame()).unwrap().len(), 1);
    }

    #[test]
    fn test_fallback_skipped_when_primary_finds_face() {
        let mut detector = FallbackDetector::new(
            FixedDetector::new(vec![face(1.0, 40.0)]),
            FixedDetector::new(vec![face(5.0, 40.0)]),
        );
        assert_eq!(detector.detect(&frame()).unwrap(), vec![face(1.0, 40.0)]);
        assert_eq!(detector.secondary.calls, 0);
    }

    #[test]
    fn test_liveness_observation_uses_largest_face() {
        let mut detector = FixedDetector::new(vec![face(0.0, 30.0), face(200.0, 90.0)]);
        let mut extractor = EyeLandmarks {
            lid_gap: 2.0,
            seen: vec![],
        };
        let obs = liveness_observation(&mut detector, &mut extractor, &frame());
        assert_eq!(extractor.seen, vec![face(200.0, 90.0)]);
        assert!((obs.average_ear().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_liveness_observation_degrades_to_no_face() {
        let mut extractor = EyeLandmarks {
            lid_gap: 2.0,
            seen: vec![],
        };
        assert_eq!(
            liveness_observation(&mut BrokenDetector, &mut extractor, &frame()),
            EyeObservation::NoFace
        );
        assert_eq!(
            liveness_observation(&mut FixedDetector::new(vec![]), &mut extractor, &frame()),
            EyeObservation::NoFace
        );
        assert_eq!(
            liveness_observation(
                &mut FixedDetector::new(vec![face(0.0, 50.0)]),
                &mut BrokenLandmarks,
                &frame()
            ),
            EyeObservation::NoFace
        );
    }

    #[test]
    fn test_extract_embedding_largest_face() {
        let mut detector = FixedDetector::new(vec![face(10.0, 30.0), face(100.0, 80.0)]);
        let mut model = BoxModel { fail_at_x: None };
        let emb = extract_embedding(&mut detector, &mut model, &frame()).unwrap();
        assert_eq!(emb.values, vec![100.0, 80.0, 1.0]);
    }

    #[test]
    fn test_extract_embedding_errors() {
        let mut model = BoxModel { fail_at_x: Some(10.0) };
        assert!(matches!(
            extract_embedding(&mut FixedDetector::new(vec![]), &mut model, &frame()),
            Err(PipelineError::NoFaceDetected)
        ));
        assert!(matches!(
            extract_embedding(&mut BrokenDetector, &mut model, &frame()),
            Err(PipelineError::Detector(_))
        ));
        assert!(matches!(
            extract_embedding(&mut single_face(), &mut model, &frame()),
            Err(PipelineError::Inference(InferenceError::Failed(_)))
        ));
        assert!(matches!(
            extract_embedding(&mut single_face(), &mut NanModel, &frame()),
            Err(PipelineError::Inference(InferenceError::NonFinite))
        ));
    }

    #[test]
    fn test_enrollment_requires_single_face() {
        let mut model = BoxModel { fail_at_x: None };
        assert!(matches!(
            enrollment_embedding(&mut FixedDetector::new(vec![]), &mut model, &frame()),
            Err(PipelineError::NoFaceDetected)
        ));
        assert!(matches!(
            enrollment_embedding(
                &mut FixedDetector::new(vec![face(0.0, 10.0), face(50.0, 10.0)]),
                &mut model,
                &frame()
            ),
            Err(PipelineError::MultipleFaces(2))
        ));
        let mut detector = FixedDetector::new(vec![face(7.0, 10.0)]);
        let emb = enrollment_embedding(&mut detector, &mut model, &frame()).unwrap();
        assert_eq!(emb.values[0], 7.0);
    }

    #[test]
    fn test_probe_embeddings_skip_failed_faces() {
        let mut detector =
            FixedDetector::new(vec![face(10.0, 30.0), face(100.0, 30.0), face(200.0, 30.0)]);
        let mut model = BoxModel { fail_at_x: Some(100.0) };
        let probes = probe_embeddings(&mut detector, &mut model, &frame()).unwrap();
        let xs: Vec<f32> = probes.iter().map(|p| p.values[0]).collect();
        assert_eq!(xs, vec![10.0, 200.0]);

        let none = probe_embeddings(&mut FixedDetector::new(vec![]), &mut model, &frame()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_dyn_collaborators() {
        let mut detector: Box<dyn FaceDetector> =
            Box::new(FixedDetector::new(vec![face(3.0, 30.0)]));
        let mut model: Box<dyn EmbeddingModel> = Box::new(BoxModel { fail_at_x: None });
        let emb = extract_embedding(detector.as_mut(), model.as_mut(), &frame()).unwrap();
        assert_eq!(emb.values[0], 3.0);
    }
}

//! Eye-openness geometry over 68-point facial landmarks.
//!
//! Landmarks follow the iBUG 300-W / dlib layout: points 36..42 outline the
//! subject's right eye and 42..48 the left eye, each starting at the outer
//! corner and running clockwise (corner, two upper-lid points, corner, two
//! lower-lid points).

use std::ops::Range;
use thiserror::Error;

/// A 2-D image coordinate `(x, y)`.
pub type Point = (f32, f32);

/// Six ordered eye-contour points.
pub type EyePoints = [Point; 6];

/// Number of points in a full facial landmark set.
pub const LANDMARK_COUNT: usize = 68;

const RIGHT_EYE: Range<usize> = 36..42;
const LEFT_EYE: Range<usize> = 42..48;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("expected 68 facial landmarks, got {0}")]
    LandmarkCount(usize),
}

/// A validated 68-point landmark set for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    points: Vec<Point>,
}

impl Landmarks {
    pub fn new(points: Vec<Point>) -> Result<Self, GeometryError> {
        if points.len() != LANDMARK_COUNT {
            return Err(GeometryError::LandmarkCount(points.len()));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Contour of the subject's left eye (points 42..48).
    pub fn left_eye(&self) -> EyePoints {
        self.eye(LEFT_EYE)
    }

    /// Contour of the subject's right eye (points 36..42).
    pub fn right_eye(&self) -> EyePoints {
        self.eye(RIGHT_EYE)
    }

    fn eye(&self, range: Range<usize>) -> EyePoints {
        let mut eye = [(0.0, 0.0); 6];
        eye.copy_from_slice(&self.points[range]);
        eye
    }
}

fn distance(a: Point, b: Point) -> f32 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Eye aspect ratio (Soukupová & Čech, 2016):
///
/// `EAR = (‖p1−p5‖ + ‖p2−p4‖) / (2·‖p0−p3‖)`
///
/// Returns `None` for a degenerate eye (coincident corners) or any non-finite
/// input, so callers never see a division by zero.
pub fn eye_aspect_ratio(eye: &EyePoints) -> Option<f32> {
    let horizontal = distance(eye[0], eye[3]);
    if !horizontal.is_finite() || horizontal <= f32::EPSILON {
        return None;
    }

    let vertical = distance(eye[1], eye[5]) + distance(eye[2], eye[4]);
    let ear = vertical / (2.0 * horizontal);
    ear.is_finite().then_some(ear)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Corners 4 px apart, lids 2 px apart on both verticals: EAR = 0.5.
    fn open_eye() -> EyePoints {
        [
            (0.0, 0.0),
            (1.0, -1.0),
            (3.0, -1.0),
            (4.0, 0.0),
            (3.0, 1.0),
            (1.0, 1.0),
        ]
    }

    fn transform(eye: &EyePoints, scale: f32, dx: f32, dy: f32) -> EyePoints {
        eye.map(|(x, y)| (x * scale + dx, y * scale + dy))
    }

    #[test]
    fn test_known_ratio() {
        let ear = eye_aspect_ratio(&open_eye()).unwrap();
        assert!((ear - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_translation_invariant() {
        let base = eye_aspect_ratio(&open_eye()).unwrap();
        let moved = eye_aspect_ratio(&transform(&open_eye(), 1.0, 312.5, -87.25)).unwrap();
        assert!((base - moved).abs() < 1e-5);
    }

    #[test]
    fn test_scale_invariant() {
        let base = eye_aspect_ratio(&open_eye()).unwrap();
        for scale in [0.25, 3.0, 40.0] {
            let scaled = eye_aspect_ratio(&transform(&open_eye(), scale, 10.0, 20.0)).unwrap();
            assert!((base - scaled).abs() < 1e-5, "scale {scale}: {base} vs {scaled}");
        }
    }

    #[test]
    fn test_closed_eye_is_small() {
        let mut eye = open_eye();
        for p in [1, 2] {
            eye[p].1 = -0.1;
        }
        for p in [4, 5] {
            eye[p].1 = 0.1;
        }
        let ear = eye_aspect_ratio(&eye).unwrap();
        assert!((ear - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_corners_rejected() {
        let mut eye = open_eye();
        eye[3] = eye[0];
        assert_eq!(eye_aspect_ratio(&eye), None);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut eye = open_eye();
        eye[1] = (f32::NAN, 0.0);
        assert_eq!(eye_aspect_ratio(&eye), None);
    }

    #[test]
    fn test_landmark_count_enforced() {
        let err = Landmarks::new(vec![(0.0, 0.0); 5]).unwrap_err();
        assert_eq!(err, GeometryError::LandmarkCount(5));
        assert!(Landmarks::new(vec![(0.0, 0.0); LANDMARK_COUNT]).is_ok());
    }

    #[test]
    fn test_eye_slices() {
        let points: Vec<Point> = (0..LANDMARK_COUNT).map(|i| (i as f32, 0.0)).collect();
        let landmarks = Landmarks::new(points).unwrap();
        assert_eq!(landmarks.right_eye()[0].0, 36.0);
        assert_eq!(landmarks.right_eye()[5].0, 41.0);
        assert_eq!(landmarks.left_eye()[0].0, 42.0);
        assert_eq!(landmarks.left_eye()[5].0, 47.0);
    }
}

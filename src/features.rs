use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::types::{Landmarks, Point3D};

/// Number of entries in a flattened feature row.
pub const FEATURE_DIM: usize = 21;

/// Widths below this are treated as a collapsed eye or face.
const MIN_WIDTH: f64 = 1e-6;

/// Landmark indices describing one eye.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyeLayout {
    /// Reference corner: used for the iris offset features and EAR width
    pub corner: usize,
    pub opposite_corner: usize,
    /// Upper/lower lid points measured against each other for EAR
    pub lid_pairs: [(usize, usize); 3],
    pub iris: [usize; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkLayout {
    pub left_eye: EyeLayout,
    pub right_eye: EyeLayout,
    pub nose_tip: usize,
    pub chin: usize,
    pub head_left_ref: usize,
    pub head_right_ref: usize,
}

impl LandmarkLayout {
    /// MediaPipe Face Mesh with refined irises (478 points).
    pub fn face_mesh() -> Self {
        Self {
            left_eye: EyeLayout {
                corner: 362,
                opposite_corner: 263,
                lid_pairs: [(382, 373), (381, 374), (380, 249)],
                iris: [474, 475, 476, 477],
            },
            right_eye: EyeLayout {
                corner: 33,
                opposite_corner: 133,
                lid_pairs: [(7, 153), (163, 145), (144, 155)],
                iris: [469, 470, 471, 472],
            },
            nose_tip: 1,
            chin: 199,
            head_left_ref: 362,
            head_right_ref: 133,
        }
    }

    /// Highest index referenced, so callers can size synthetic frames.
    pub fn max_index(&self) -> usize {
        let eye_max = |e: &EyeLayout| {
            let lids = e.lid_pairs.iter().map(|&(a, b)| a.max(b)).max().unwrap_or(0);
            let iris = e.iris.iter().copied().max().unwrap_or(0);
            e.corner.max(e.opposite_corner).max(lids).max(iris)
        };
        [
            eye_max(&self.left_eye),
            eye_max(&self.right_eye),
            self.nose_tip,
            self.chin,
            self.head_left_ref,
            self.head_right_ref,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

impl Default for LandmarkLayout {
    fn default() -> Self {
        Self::face_mesh()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyeFeatures {
    pub center: (f64, f64),
    pub iris: (f64, f64),
    pub ear: f64,
    pub iris_to_corner: f64,
    /// Horizontal iris offset from the reference corner, in face widths
    pub rel_offset: f64,
}

/// Per-frame geometric description of the face used as regression input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub left: EyeFeatures,
    pub right: EyeFeatures,
    pub nose: (f64, f64),
    pub chin: (f64, f64),
    pub pitch: f64,
    pub yaw: f64,
    pub face_width: f64,
}

impl FeatureVector {
    pub fn avg_ear(&self) -> f64 {
        (self.left.ear + self.right.ear) / 2.0
    }

    pub fn to_array(&self) -> [f64; FEATURE_DIM] {
        [
            self.left.center.0,
            self.left.center.1,
            self.right.center.0,
            self.right.center.1,
            self.left.iris.0,
            self.left.iris.1,
            self.right.iris.0,
            self.right.iris.1,
            self.left.ear,
            self.right.ear,
            self.left.iris_to_corner,
            self.right.iris_to_corner,
            self.nose.0,
            self.nose.1,
            self.chin.0,
            self.chin.1,
            self.pitch,
            self.yaw,
            self.left.rel_offset,
            self.right.rel_offset,
            self.face_width,
        ]
    }

    pub fn from_array(a: &[f64; FEATURE_DIM]) -> Self {
        Self {
            left: EyeFeatures {
                center: (a[0], a[1]),
                iris: (a[4], a[5]),
                ear: a[8],
                iris_to_corner: a[10],
                rel_offset: a[18],
            },
            right: EyeFeatures {
                center: (a[2], a[3]),
                iris: (a[6], a[7]),
                ear: a[9],
                iris_to_corner: a[11],
                rel_offset: a[19],
            },
            nose: (a[12], a[13]),
            chin: (a[14], a[15]),
            pitch: a[16],
            yaw: a[17],
            face_width: a[20],
        }
    }
}

pub struct FeatureExtractor {
    layout: LandmarkLayout,
}

impl FeatureExtractor {
    pub fn new(layout: LandmarkLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LandmarkLayout {
        &self.layout
    }

    pub fn extract(&self, landmarks: &Landmarks) -> Result<FeatureVector> {
        let l = &self.layout;
        // Short frames fail on the highest index before any geometry check
        let highest = l.max_index();
        if landmarks.len() <= highest {
            return Err(TrackerError::MissingLandmark { index: highest, available: landmarks.len() });
        }
        let head_left = point(landmarks, l.head_left_ref)?;
        let head_right = point(landmarks, l.head_right_ref)?;
        let face_width = dist3(head_left, head_right);
        if face_width < MIN_WIDTH {
            return Err(TrackerError::DegenerateGeometry { what: "face width", value: face_width });
        }

        let left = eye_features(landmarks, &l.left_eye, face_width)?;
        let right = eye_features(landmarks, &l.right_eye, face_width)?;

        let nose = point(landmarks, l.nose_tip)?;
        let chin = point(landmarks, l.chin)?;
        let pitch = ((chin.y - nose.y) as f64).atan2((chin.z - nose.z) as f64);
        let yaw = ((head_right.x - head_left.x) as f64).atan2((head_right.z - head_left.z) as f64);

        Ok(FeatureVector {
            left,
            right,
            nose: (nose.x as f64, nose.y as f64),
            chin: (chin.x as f64, chin.y as f64),
            pitch,
            yaw,
            face_width,
        })
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(LandmarkLayout::default())
    }
}

fn point(landmarks: &Landmarks, index: usize) -> Result<Point3D> {
    landmarks
        .points
        .get(index)
        .copied()
        .ok_or(TrackerError::MissingLandmark { index, available: landmarks.len() })
}

fn dist2(a: Point3D, b: Point3D) -> f64 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    (dx * dx + dy * dy).sqrt()
}

fn dist3(a: Point3D, b: Point3D) -> f64 {
    let dz = (a.z - b.z) as f64;
    (dist2(a, b).powi(2) + dz * dz).sqrt()
}

fn eye_features(landmarks: &Landmarks, eye: &EyeLayout, face_width: f64) -> Result<EyeFeatures> {
    let corner = point(landmarks, eye.corner)?;
    let opposite = point(landmarks, eye.opposite_corner)?;
    let width = dist2(corner, opposite);
    if width < MIN_WIDTH {
        return Err(TrackerError::DegenerateGeometry { what: "eye width", value: width });
    }

    let mut contour = vec![corner, opposite];
    let mut lid_sum = 0.0;
    for &(upper, lower) in &eye.lid_pairs {
        let u = point(landmarks, upper)?;
        let d = point(landmarks, lower)?;
        lid_sum += dist2(u, d);
        contour.push(u);
        contour.push(d);
    }
    let ear = lid_sum / (eye.lid_pairs.len() as f64 * width);

    let mut iris = (0.0, 0.0);
    for &i in &eye.iris {
        let p = point(landmarks, i)?;
        iris.0 += p.x as f64;
        iris.1 += p.y as f64;
    }
    let n = eye.iris.len() as f64;
    let iris = (iris.0 / n, iris.1 / n);

    let n = contour.len() as f64;
    let center = (
        contour.iter().map(|p| p.x as f64).sum::<f64>() / n,
        contour.iter().map(|p| p.y as f64).sum::<f64>() / n,
    );

    let cx = corner.x as f64;
    let cy = corner.y as f64;
    let iris_to_corner = ((iris.0 - cx).powi(2) + (iris.1 - cy).powi(2)).sqrt();

    Ok(EyeFeatures {
        center,
        iris,
        ear,
        iris_to_corner,
        rel_offset: (iris.0 - cx) / face_width,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame with both eyes laid out flat, lids `gap` apart, eye width `w`.
    fn synthetic(gap: f32, w: f32) -> Landmarks {
        let layout = LandmarkLayout::face_mesh();
        let mut points = vec![Point3D::default(); layout.max_index() + 1];
        for (eye, cx) in [(&layout.left_eye, 0.6f32), (&layout.right_eye, 0.4f32)] {
            points[eye.corner] = Point3D::new(cx - w / 2.0, 0.45, 0.0);
            points[eye.opposite_corner] = Point3D::new(cx + w / 2.0, 0.45, 0.0);
            for (i, &(u, d)) in eye.lid_pairs.iter().enumerate() {
                let x = cx + (i as f32 - 1.0) * w / 4.0;
                points[u] = Point3D::new(x, 0.45 - gap / 2.0, 0.0);
                points[d] = Point3D::new(x, 0.45 + gap / 2.0, 0.0);
            }
            for (i, &p) in eye.iris.iter().enumerate() {
                let a = i as f32 * std::f32::consts::FRAC_PI_2;
                points[p] = Point3D::new(cx + 0.005 * a.cos(), 0.45 + 0.005 * a.sin(), 0.0);
            }
        }
        points[layout.nose_tip] = Point3D::new(0.5, 0.55, -0.05);
        points[layout.chin] = Point3D::new(0.5, 0.75, -0.02);
        Landmarks::new(points)
    }

    #[test]
    fn test_ear_matches_geometry() {
        let fe = FeatureExtractor::default();
        let f = fe.extract(&synthetic(0.015, 0.06)).unwrap();
        // three lid gaps of 0.015 over a width of 0.06
        assert!((f.left.ear - 0.25).abs() < 1e-5, "left ear {}", f.left.ear);
        assert!((f.right.ear - 0.25).abs() < 1e-5);
        assert!((f.avg_ear() - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_extraction_is_pure() {
        let fe = FeatureExtractor::default();
        let lm = synthetic(0.01, 0.05);
        let a = fe.extract(&lm).unwrap();
        let b = fe.extract(&lm).unwrap();
        assert_eq!(a.to_array(), b.to_array());
    }

    #[test]
    fn test_array_layout_names_ear() {
        let fe = FeatureExtractor::default();
        let f = fe.extract(&synthetic(0.012, 0.06)).unwrap();
        let row = f.to_array();
        assert_eq!(row[8], f.left.ear);
        assert_eq!(row[9], f.right.ear);
        assert_eq!(row[20], f.face_width);
        assert_eq!(FeatureVector::from_array(&row), f);
    }

    #[test]
    fn test_iris_centered_between_corners() {
        let fe = FeatureExtractor::default();
        let f = fe.extract(&synthetic(0.015, 0.06)).unwrap();
        assert!((f.left.iris.0 - 0.6).abs() < 1e-5);
        assert!((f.left.iris_to_corner - 0.03).abs() < 1e-5);
        assert!(f.left.rel_offset > 0.0);
    }

    #[test]
    fn test_collapsed_eye_is_degenerate() {
        let fe = FeatureExtractor::default();
        let err = fe.extract(&synthetic(0.01, 0.0)).unwrap_err();
        assert!(matches!(err, TrackerError::DegenerateGeometry { what: "eye width", .. }));
        assert!(err.is_frame_local());
    }

    #[test]
    fn test_short_frame_reports_missing_landmark() {
        let fe = FeatureExtractor::default();
        let lm = Landmarks::new(vec![Point3D::default(); 468]);
        let err = fe.extract(&lm).unwrap_err();
        let highest = fe.layout().max_index();
        assert!(matches!(
            err,
            TrackerError::MissingLandmark { index, available: 468 } if index == highest
        ));
        assert!(err.is_frame_local());
    }
}

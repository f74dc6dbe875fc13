use serde::{Deserialize, Serialize};

/// Represents a single 3D landmark point (normalized image coordinates, z is relative depth)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Represents the result of a face mesh inference
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Landmarks {
    pub points: Vec<Point3D>,
}

impl Landmarks {
    pub fn new(points: Vec<Point3D>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One acquired camera frame after landmark detection.
/// `landmarks` is `None` when the detector found no face.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Seconds on a monotonic clock
    pub timestamp: f64,
    pub landmarks: Option<Landmarks>,
}

impl Observation {
    pub fn face(timestamp: f64, landmarks: Landmarks) -> Self {
        Self { timestamp, landmarks: Some(landmarks) }
    }

    pub fn miss(timestamp: f64) -> Self {
        Self { timestamp, landmarks: None }
    }
}

/// Screen position in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: f64,
    pub height: f64,
}

impl ScreenGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint::new(self.width / 2.0, self.height / 2.0)
    }

    /// Clamp onto the addressable pixel area [0, w-1] x [0, h-1].
    pub fn clamp(&self, p: ScreenPoint) -> ScreenPoint {
        ScreenPoint::new(
            p.x.clamp(0.0, (self.width - 1.0).max(0.0)),
            p.y.clamp(0.0, (self.height - 1.0).max(0.0)),
        )
    }
}

impl Default for ScreenGeometry {
    fn default() -> Self {
        Self { width: 1920.0, height: 1080.0 }
    }
}

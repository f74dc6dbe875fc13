use crate::types::{ScreenGeometry, ScreenPoint};

/// Edge-aware exponential smoothing of cursor predictions.
///
/// Smoothing is strongest at screen center and fades towards the edges so
/// the cursor can still reach the borders.
pub struct MotionSmoother {
    factor: f64,
    screen: ScreenGeometry,
    prev: Option<(f64, f64)>,
}

impl MotionSmoother {
    pub fn new(factor: f64, screen: ScreenGeometry) -> Self {
        Self { factor, screen, prev: None }
    }

    pub fn filter(&mut self, raw: ScreenPoint) -> ScreenPoint {
        let Some((px, py)) = self.prev else {
            self.prev = Some((raw.x, raw.y));
            return raw;
        };

        let w = self.screen.width;
        let h = self.screen.height;
        let edge_x = raw.x.min(w - raw.x) / (w / 2.0);
        let edge_y = raw.y.min(h - raw.y) / (h / 2.0);
        let edge = edge_x.min(edge_y).clamp(0.0, 1.0);
        let effective = self.factor * edge;

        let x = px * effective + raw.x * (1.0 - effective);
        let y = py * effective + raw.y * (1.0 - effective);
        self.prev = Some((x, y));
        ScreenPoint::new(x, y)
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    pub fn is_primed(&self) -> bool {
        self.prev.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_factor_is_identity() {
        let mut s = MotionSmoother::new(0.0, ScreenGeometry::default());
        for (x, y) in [(10.0, 20.0), (960.0, 540.0), (1500.0, 90.0)] {
            let out = s.filter(ScreenPoint::new(x, y));
            assert_eq!(out, ScreenPoint::new(x, y));
        }
    }

    #[test]
    fn test_first_call_returns_raw() {
        let mut s = MotionSmoother::new(0.8, ScreenGeometry::default());
        let p = ScreenPoint::new(300.0, 200.0);
        assert_eq!(s.filter(p), p);
        assert!(s.is_primed());
    }

    #[test]
    fn test_center_heavy_smoothing_moves_little() {
        let screen = ScreenGeometry::default();
        let mut s = MotionSmoother::new(0.99, screen);
        let c = screen.center();
        s.filter(c);
        let delta = 10.0;
        let out = s.filter(ScreenPoint::new(c.x + delta, c.y));
        let moved = out.x - c.x;
        assert!(moved > 0.0 && moved < delta, "moved {}", moved);
    }

    #[test]
    fn test_edges_are_not_smoothed() {
        let mut s = MotionSmoother::new(0.8, ScreenGeometry::default());
        s.filter(ScreenPoint::new(960.0, 540.0));
        let out = s.filter(ScreenPoint::new(0.0, 540.0));
        assert_eq!(out.x, 0.0);
    }

    #[test]
    fn test_reset_reseeds() {
        let mut s = MotionSmoother::new(0.8, ScreenGeometry::default());
        s.filter(ScreenPoint::new(960.0, 540.0));
        s.reset();
        let p = ScreenPoint::new(100.0, 100.0);
        assert_eq!(s.filter(p), p);
    }
}

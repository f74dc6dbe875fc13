use crate::config::ScrollConfig;
use crate::modes::InteractionMode;
use crate::types::ScreenGeometry;

/// Turns vertical gaze position into scroll steps while in scroll mode.
pub struct ScrollController {
    cfg: ScrollConfig,
    screen: ScreenGeometry,
}

impl ScrollController {
    pub fn new(cfg: ScrollConfig, screen: ScreenGeometry) -> Self {
        Self { cfg, screen }
    }

    /// Signed scroll amount; positive scrolls up. Zero outside scroll mode
    /// and inside the deadzone.
    pub fn amount(&self, mode: InteractionMode, y: f64) -> f64 {
        if mode != InteractionMode::Scroll {
            return 0.0;
        }
        let n = y / self.screen.height;
        let upper = 0.5 - self.cfg.deadzone_fraction / 2.0;
        let lower = 0.5 + self.cfg.deadzone_fraction / 2.0;

        if n < upper {
            self.cfg.scale * (upper - n) * self.cfg.speed_factor
        } else if n > lower {
            -self.cfg.scale * (n - lower) * self.cfg.speed_factor
        } else {
            0.0
        }
    }

    /// Whole scroll steps to actuate, `None` when rounding leaves nothing.
    pub fn steps(&self, mode: InteractionMode, y: f64) -> Option<i32> {
        let steps = self.amount(mode, y).round() as i32;
        (steps != 0).then_some(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ScrollController {
        ScrollController::new(ScrollConfig::default(), ScreenGeometry::default())
    }

    #[test]
    fn test_center_is_zero() {
        let sc = controller();
        assert_eq!(sc.amount(InteractionMode::Scroll, 540.0), 0.0);
        assert_eq!(sc.steps(InteractionMode::Scroll, 540.0), None);
    }

    #[test]
    fn test_near_edges_scroll() {
        let sc = controller();
        let up = sc.amount(InteractionMode::Scroll, 0.05 * 1080.0);
        let down = sc.amount(InteractionMode::Scroll, 0.95 * 1080.0);
        assert!(up > 0.0);
        assert!(down < 0.0);
        // 20 * (0.35 - 0.05) * 0.5 = 3
        assert_eq!(sc.steps(InteractionMode::Scroll, 0.05 * 1080.0), Some(3));
    }

    #[test]
    fn test_magnitude_strictly_monotonic() {
        let sc = controller();
        let mut last = 0.0;
        for i in 1..=30 {
            let n = 0.35 - i as f64 * 0.01;
            let a = sc.amount(InteractionMode::Scroll, n * 1080.0);
            assert!(a > last, "not increasing at n={}", n);
            last = a;
        }
    }

    #[test]
    fn test_inactive_outside_scroll_mode() {
        let sc = controller();
        assert_eq!(sc.amount(InteractionMode::Cursor, 0.0), 0.0);
    }
}

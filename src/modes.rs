use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::ModeSpeeds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    Cursor,
    Scroll,
    Click,
    Drag,
}

impl InteractionMode {
    pub const CYCLE: [InteractionMode; 4] = [
        InteractionMode::Cursor,
        InteractionMode::Scroll,
        InteractionMode::Click,
        InteractionMode::Drag,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InteractionMode::Cursor => "cursor",
            InteractionMode::Scroll => "scroll",
            InteractionMode::Click => "click",
            InteractionMode::Drag => "drag",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            InteractionMode::Cursor => InteractionMode::Scroll,
            InteractionMode::Scroll => InteractionMode::Click,
            InteractionMode::Click => InteractionMode::Drag,
            InteractionMode::Drag => InteractionMode::Cursor,
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct ModeController {
    mode: InteractionMode,
    speeds: ModeSpeeds,
    speed: f64,
}

impl ModeController {
    pub fn new(speeds: ModeSpeeds) -> Self {
        let speed = speeds.cursor;
        Self { mode: InteractionMode::Cursor, speeds, speed }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    /// Cursor move duration for the current mode, in seconds.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn speed_of(&self, mode: InteractionMode) -> f64 {
        match mode {
            InteractionMode::Cursor => self.speeds.cursor,
            InteractionMode::Scroll => self.speeds.scroll,
            InteractionMode::Click => self.speeds.click,
            InteractionMode::Drag => self.speeds.drag,
        }
    }

    pub fn switch(&mut self) -> InteractionMode {
        self.mode = self.mode.next();
        self.speed = self.speed_of(self.mode);
        info!("Switched to {} mode (speed {:.2}s)", self.mode, self.speed);
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_switches_cycle_back() {
        let mut mc = ModeController::new(ModeSpeeds::default());
        let expected = [
            (InteractionMode::Scroll, 0.02),
            (InteractionMode::Click, 0.04),
            (InteractionMode::Drag, 0.03),
            (InteractionMode::Cursor, 0.05),
        ];
        for (mode, speed) in expected {
            assert_eq!(mc.switch(), mode);
            assert_eq!(mc.mode(), mode);
            assert!((mc.speed() - speed).abs() < 1e-12);
        }
    }

    #[test]
    fn test_starts_in_cursor() {
        let mc = ModeController::new(ModeSpeeds::default());
        assert_eq!(mc.mode(), InteractionMode::Cursor);
        assert!((mc.speed() - 0.05).abs() < 1e-12);
    }
}

use log::{debug, info};

/// OS cursor and button actuation.
pub trait Actuator {
    /// Move to `(x, y)` over `duration` seconds.
    fn move_cursor(&mut self, x: f64, y: f64, duration: f64);
    fn click(&mut self);
    fn right_click(&mut self);
    fn mouse_down(&mut self);
    fn mouse_up(&mut self);
    /// Positive scrolls up.
    fn scroll(&mut self, amount: i32);
}

/// Logs every action; stands in for a platform backend.
#[derive(Debug, Default)]
pub struct LogActuator {
    moves: u64,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn moves(&self) -> u64 {
        self.moves
    }
}

impl Actuator for LogActuator {
    fn move_cursor(&mut self, x: f64, y: f64, duration: f64) {
        self.moves += 1;
        debug!("move ({:.0}, {:.0}) over {:.2}s", x, y, duration);
    }

    fn click(&mut self) {
        info!("click");
    }

    fn right_click(&mut self) {
        info!("right click");
    }

    fn mouse_down(&mut self) {
        info!("mouse down");
    }

    fn mouse_up(&mut self) {
        info!("mouse up");
    }

    fn scroll(&mut self, amount: i32) {
        info!("scroll {}", amount);
    }
}

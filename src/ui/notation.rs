const SMOOTHING: f64 = 0.2;
const SNAP_MS: f64 = 0.5;

/// Eases the notation view toward the playback position, one render frame at
/// a time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollCursor {
    position_ms: f64,
    target_ms: f64,
}

impl ScrollCursor {
    pub fn position_ms(&self) -> f64 {
        self.position_ms
    }

    pub fn target_ms(&self) -> f64 {
        self.target_ms
    }

    pub fn set_target(&mut self, timestamp_ms: u64) {
        self.target_ms = timestamp_ms as f64;
    }

    /// Jumps straight to `timestamp_ms`, for resets and seeks.
    pub fn jump_to(&mut self, timestamp_ms: u64) {
        self.target_ms = timestamp_ms as f64;
        self.position_ms = self.target_ms;
    }

    /// Advances one frame and returns the new position.
    ///
    /// Moving backwards snaps immediately.
    pub fn step(&mut self) -> f64 {
        let remaining = self.target_ms - self.position_ms;
        if remaining < SNAP_MS {
            self.position_ms = self.target_ms;
        } else {
            self.position_ms += remaining * SMOOTHING;
        }
        self.position_ms
    }

    pub fn is_settled(&self) -> bool {
        self.position_ms == self.target_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eases_toward_target() {
        let mut cursor = ScrollCursor::default();
        cursor.set_target(1000);

        assert_eq!(cursor.step(), 200.0);
        assert_eq!(cursor.step(), 360.0);
        assert!(!cursor.is_settled());

        let mut frames = 2;
        while !cursor.is_settled() {
            cursor.step();
            frames += 1;
            assert!(cursor.position_ms() <= 1000.0);
            assert!(frames < 100);
        }
        assert_eq!(cursor.position_ms(), 1000.0);
    }

    #[test]
    fn snaps_backwards() {
        let mut cursor = ScrollCursor::default();
        cursor.jump_to(3000);
        cursor.set_target(500);
        assert_eq!(cursor.step(), 500.0);
        assert!(cursor.is_settled());
    }
}

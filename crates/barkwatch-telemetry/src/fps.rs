use std::time::Instant;

/// Windowed rate tracker. `tick` once per frame; yields the measured rate
/// roughly once per second.
pub struct FpsTracker {
    window_start: Instant,
    ticks_in_window: u64,
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            ticks_in_window: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.ticks_in_window += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed.as_secs_f64() >= 1.0 {
            let fps = self.ticks_in_window as f64 / elapsed.as_secs_f64();
            self.window_start = Instant::now();
            self.ticks_in_window = 0;
            Some(fps)
        } else {
            None
        }
    }
}

use std::time::{Duration, Instant};

/// Timing snapshot handed to the application each frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous tick, clamped.
    pub dt: f32,

    /// Seconds since the clock started, advanced by the clamped deltas.
    pub elapsed: f32,

    /// Tree counter for this frame. Starts at 1 and strictly increases, so it
    /// can be passed straight to `TreeBuilder::new`.
    pub frame: u64,
}

/// Per-window clock producing [`FrameTime`] snapshots.
///
/// Deltas are clamped so a stall (debugger, minimized window) does not turn
/// into one huge animation step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    elapsed: Duration,
    frame: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: Instant::now(),
            elapsed: Duration::ZERO,
            frame: 0,
            dt_min,
            dt_max,
        }
    }

    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        let dt = now
            .saturating_duration_since(self.last)
            .clamp(self.dt_min, self.dt_max);
        self.last = now;
        self.advance(dt)
    }

    fn advance(&mut self, dt: Duration) -> FrameTime {
        self.elapsed += dt;
        self.frame += 1;
        FrameTime {
            dt: dt.as_secs_f32(),
            elapsed: self.elapsed.as_secs_f32(),
            frame: self.frame,
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_counter_starts_at_one_and_increases() {
        let mut c = FrameClock::new();
        let a = c.tick();
        let b = c.tick();
        assert_eq!(a.frame, 1);
        assert_eq!(b.frame, 2);
        assert!(b.elapsed >= a.elapsed);
    }

    #[test]
    fn deltas_are_clamped() {
        let mut c = FrameClock::with_clamps(Duration::from_millis(1), Duration::from_millis(10));
        let t = c.tick();
        assert!(t.dt >= 0.001 && t.dt <= 0.010);

        let t = c.advance(Duration::from_millis(5));
        assert!((t.dt - 0.005).abs() < 1e-6);
    }
}

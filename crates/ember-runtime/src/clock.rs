//! Frame clock

use std::time::Instant;

/// Tracks total game time and the delta of the last frame
pub struct GameClock {
    /// Total elapsed game time in seconds
    pub total_time: f64,
    /// Time since last frame in seconds
    pub delta_time: f64,
    /// Number of completed ticks
    pub frame_index: u64,
    /// Upper bound on a single frame's delta
    pub max_delta: f64,
    last_instant: Instant,
    first_tick: bool,
}

impl Default for GameClock {
    fn default() -> Self {
        Self {
            total_time: 0.0,
            delta_time: 0.0,
            frame_index: 0,
            max_delta: 0.25,
            last_instant: Instant::now(),
            first_tick: true,
        }
    }
}

impl GameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by wall-clock time. Call once per frame.
    pub fn tick(&mut self) {
        let now = Instant::now();

        if self.first_tick {
            self.first_tick = false;
            self.last_instant = now;
            self.delta_time = 0.0;
            self.frame_index += 1;
            return;
        }

        let elapsed = now.duration_since(self.last_instant).as_secs_f64();
        self.last_instant = now;
        self.advance(elapsed);
    }

    /// Advance by an explicit delta (fixed-step replays, tests)
    pub fn advance(&mut self, dt: f64) {
        // Clamp so a debugger pause doesn't produce one enormous step
        self.delta_time = dt.clamp(0.0, self.max_delta);
        self.total_time += self.delta_time;
        self.frame_index += 1;
    }
}

//! Frame pacing: turns accumulated wall time into a turn budget per frame.

/// Number of frames kept for the fps / throughput display.
pub const HISTORY_LEN: usize = 8;

/// What one frame is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameBudget {
    /// Turns requested for this frame.
    pub turns: u32,
    /// Wall-clock budget handed to `Engine::advance`.
    pub max_wall_seconds: f64,
}

/// Short ring of per-frame numbers, averaged for display.
#[derive(Debug, Clone, Default)]
pub struct FrameHistory {
    fps: [f64; HISTORY_LEN],
    max_turns_per_second: [f64; HISTORY_LEN],
    next: usize,
    filled: usize,
}

impl FrameHistory {
    /// Record one frame.
    pub fn record(&mut self, frame_seconds: f64, max_turns_per_second: f64) {
        let fps = if frame_seconds > 0.0 { 1.0 / frame_seconds } else { 0.0 };
        self.fps[self.next] = fps;
        self.max_turns_per_second[self.next] = max_turns_per_second;
        self.next = (self.next + 1) % HISTORY_LEN;
        self.filled = (self.filled + 1).min(HISTORY_LEN);
    }

    /// Mean fps over the recorded frames.
    pub fn fps(&self) -> f64 {
        mean(&self.fps[..self.filled])
    }

    /// Mean estimated turns/second over the recorded frames.
    pub fn max_turns_per_second(&self) -> f64 {
        mean(&self.max_turns_per_second[..self.filled])
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Converts frame durations into physics turns at a fixed nominal rate.
///
/// Wall time that does not add up to a whole turn carries over to the
/// next frame. Time spent paused or aiming is dropped instead.
#[derive(Debug, Clone)]
pub struct FrameDriver {
    turns_per_second: f64,
    min_fps: f64,
    slop: f64,
    last_skipped: u32,
    total_skipped: u64,
    history: FrameHistory,
}

impl FrameDriver {
    /// Driver for a nominal physics rate and a minimum frame rate.
    pub fn new(turns_per_second: f64, min_fps: f64) -> Self {
        Self {
            turns_per_second,
            min_fps,
            slop: 0.0,
            last_skipped: 0,
            total_skipped: 0,
            history: FrameHistory::default(),
        }
    }

    /// Add a frame's duration and return the turns to run, or `None` when
    /// physics is not running (the accumulated time is dropped).
    pub fn begin_frame(&mut self, frame_seconds: f64, running: bool) -> Option<FrameBudget> {
        self.slop += frame_seconds.max(0.0);
        if !running {
            self.slop = 0.0;
            return None;
        }

        // Small epsilon so 1/60 s at 300 turns/s is exactly 5 turns.
        let turns = (self.slop * self.turns_per_second + 1e-6).floor().max(0.0);
        self.slop = (self.slop - turns / self.turns_per_second).max(0.0);
        Some(FrameBudget { turns: turns as u32, max_wall_seconds: 1.0 / self.min_fps })
    }

    /// Take the accumulated time for something other than physics (the
    /// putt-phase animation) and reset it.
    pub fn take_slop(&mut self, frame_seconds: f64) -> f64 {
        let taken = self.slop + frame_seconds.max(0.0);
        self.slop = 0.0;
        taken
    }

    /// Close the frame with what `advance` reported.
    pub fn end_frame(&mut self, frame_seconds: f64, skipped: u32, max_turns_per_second: f64) {
        self.last_skipped = skipped;
        self.total_skipped += skipped as u64;
        self.history.record(frame_seconds, max_turns_per_second);
        if skipped > 0 {
            tracing::debug!("Frame skipped {} turns ({} total)", skipped, self.total_skipped);
        }
    }

    /// Drop carried time.
    pub fn reset(&mut self) {
        self.slop = 0.0;
    }

    /// Time carried to the next frame.
    pub fn slop(&self) -> f64 {
        self.slop
    }

    /// Turns skipped by the last frame.
    pub fn last_skipped(&self) -> u32 {
        self.last_skipped
    }

    /// Turns skipped since creation.
    pub fn total_skipped(&self) -> u64 {
        self.total_skipped
    }

    /// Display history.
    pub fn history(&self) -> &FrameHistory {
        &self.history
    }
}

//! The putting game played on top of the engine.
//!
//! A `Course` owns the engine and applies the game rules: where the ball
//! starts, the hole's goal state, aiming and releasing putts, measurements,
//! scoring and the win check. `frame` is called once per displayed frame with
//! the wall time that passed since the previous one.

use crate::anomaly::AnomalyLog;
use crate::config::GameConfig;
use crate::frame::FrameDriver;
use kernel::{Engine, EngineError, Measurement, Stats};
use serde::Serialize;
use std::f32::consts::{PI, TAU};

/// Samples drawn by [`Course::show_measurements`].
pub const SHOWN_MEASUREMENTS: usize = 100;

/// Score added by a putt.
pub const PUTT_STROKES: u32 = 2;

/// Score added by a measurement.
pub const MEASURE_STROKES: u32 = 1;

/// A putt being aimed. Positions are physical.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Aim {
    origin: [f32; 2],
    pointer: [f32; 2],
    phase: f32,
}

/// Last measurement, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementReport {
    /// Sampled cell.
    pub cell: [u32; 2],
    /// Momentum kept by the collapsed packet.
    pub momentum: [f32; 2],
}

impl From<Measurement> for MeasurementReport {
    fn from(m: Measurement) -> Self {
        Self { cell: [m.cell.0, m.cell.1], momentum: m.momentum }
    }
}

/// Snapshot of the game for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseStatus {
    /// Course name.
    pub name: String,
    /// Compute backend in use.
    pub backend: String,
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Ball start, physical units.
    pub start: [f32; 2],
    /// Hole centre, physical units.
    pub hole: [f32; 2],
    /// Strokes so far.
    pub score: u32,
    /// Par for the course.
    pub par: u32,
    /// Total probability (should stay near 1).
    pub total_probability: f32,
    /// Probability of being in the hole. NaN (null in JSON) for a degenerate field.
    pub win_probability: f32,
    /// The hole has been sunk.
    pub won: bool,
    /// Physics is paused.
    pub paused: bool,
    /// A putt is being aimed.
    pub aiming: bool,
    /// Club size in [0, 1].
    pub club_size: f32,
    /// Club radius in physical units.
    pub club_radius: f32,
    /// Animated putt phase while aiming.
    pub putt_phase: f32,
    /// Turns run since the engine was created.
    pub turns_run: u64,
    /// Turns skipped by the last frame.
    pub skipped_turns: u32,
    /// Turns skipped since the game was created.
    pub total_skipped_turns: u64,
    /// Smoothed frames per second.
    pub fps: f64,
    /// Smoothed throughput estimate.
    pub max_turns_per_second: f64,
    /// Frames played.
    pub frames: u64,
    /// Cells shown by the multi-measurement view.
    pub measurements: Vec<[u32; 2]>,
    /// Last collapse.
    pub last_measurement: Option<MeasurementReport>,
    /// Anomalies seen since creation.
    pub anomalies: u64,
}

/// Box-averaged copy of the probability density.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major density.
    pub data: Vec<f32>,
}

/// Goal-state width for a hole of radius `r` and depth `depth`.
pub fn hole_sigma(radius: f32, depth: f32, mass: f32) -> f32 {
    (radius / PI).sqrt() * (2.0 / mass / depth).powf(0.25)
}

/// Club radius for a club size in [0, 1], interpolating between a tenth of
/// the short side and four tenths of the long side.
pub fn club_radius(club_size: f32, physical_size: (f32, f32)) -> f32 {
    let s = club_size.clamp(0.0, 1.0);
    let (w, h) = physical_size;
    (1.0 - s) * 0.1 * w.min(h) + s * 0.4 * w.max(h)
}

/// Average `factor x factor` blocks of a `width x height` field. Partial
/// blocks at the edges average what they cover.
pub fn downsample(data: &[f32], width: u32, height: u32, factor: u32) -> ProbabilityImage {
    let factor = factor.max(1);
    let (out_w, out_h) = (width.div_ceil(factor), height.div_ceil(factor));
    let mut out = vec![0.0f32; (out_w * out_h) as usize];
    for (oi, value) in out.iter_mut().enumerate() {
        let (ox, oy) = (oi as u32 % out_w, oi as u32 / out_w);
        let (x0, y0) = (ox * factor, oy * factor);
        let (x1, y1) = ((x0 + factor).min(width), (y0 + factor).min(height));
        let mut sum = 0.0f32;
        for y in y0..y1 {
            let row = (y * width) as usize;
            sum += data[row + x0 as usize..row + x1 as usize].iter().sum::<f32>();
        }
        *value = sum / ((x1 - x0) * (y1 - y0)) as f32;
    }
    ProbabilityImage { width: out_w, height: out_h, data: out }
}

/// A game of quantum golf.
pub struct Course {
    engine: Engine,
    config: GameConfig,
    driver: FrameDriver,
    anomalies: AnomalyLog,
    start: [f32; 2],
    hole: [f32; 2],
    initial_sigma: f32,
    hole_sigma: f32,
    club_size: f32,
    aim: Option<Aim>,
    paused: bool,
    won: bool,
    score: u32,
    frames: u64,
    measurements: Vec<(u32, u32)>,
    last_measurement: Option<Measurement>,
}

impl Course {
    /// Lay out the course on an engine and reset it to the opening position.
    pub fn new(mut engine: Engine, config: GameConfig) -> Result<Self, EngineError> {
        let grid = *engine.grid();
        let (potential, mask) = config.fields(&grid);
        engine.set_potential(&potential)?;
        engine.set_mask(&mask)?;

        let (w, h) = grid.physical_size();
        let rules = config.course;
        let start = [rules.start[0] * w, rules.start[1] * h];
        let hole = [w - rules.hole_inset_frac * h, 0.5 * h];
        let hole_sigma = hole_sigma(rules.hole_radius_frac * h, rules.hole_depth, grid.mass);
        let driver = FrameDriver::new(config.physics.turns_per_second as f64, config.physics.min_fps as f64);

        tracing::info!(
            "Course '{}': start ({:.1}, {:.1}), hole ({:.1}, {:.1}) sigma {:.2}, par {}",
            config.name,
            start[0],
            start[1],
            hole[0],
            hole[1],
            hole_sigma,
            rules.par
        );

        let mut course = Self {
            engine,
            driver,
            anomalies: AnomalyLog::default(),
            start,
            hole,
            initial_sigma: rules.initial_sigma_frac * h,
            hole_sigma,
            club_size: rules.club_size.clamp(0.0, 1.0),
            aim: None,
            paused: false,
            won: false,
            score: 0,
            frames: 0,
            measurements: Vec::new(),
            last_measurement: None,
            config,
        };
        course.reset();
        Ok(course)
    }

    /// Back to the opening position with a zero score.
    pub fn reset(&mut self) {
        self.won = false;
        self.aim = None;
        self.paused = false;
        self.score = 0;
        self.measurements.clear();
        self.last_measurement = None;
        self.driver.reset();

        self.engine.initialize(self.start, self.initial_sigma);
        self.engine.set_goal(self.hole, self.hole_sigma);
        self.engine.begin_stats();
        tracing::info!("Course '{}' reset", self.config.name);
    }

    /// Advance one displayed frame that took `frame_seconds` of wall time.
    pub fn frame(&mut self, frame_seconds: f64) {
        let mut skipped = 0;
        if let Some(aim) = self.aim {
            let elapsed = self.driver.take_slop(frame_seconds);
            self.animate_aim(aim, elapsed as f32);
        } else if let Some(budget) = self.driver.begin_frame(frame_seconds, !self.paused) {
            skipped = self.engine.advance(budget.turns, budget.max_wall_seconds);
            self.engine.begin_stats();
        }

        self.engine.submit();
        self.engine.update_stats();
        self.anomalies.record(self.engine.poll_errors());

        let stats = self.engine.stats();
        // NaN never wins.
        if stats.win_probability >= self.config.course.win_threshold {
            if !self.won {
                self.paused = true;
                tracing::info!(
                    "Hole sunk with P(win) = {:.3} in {} strokes (par {})",
                    stats.win_probability,
                    self.score,
                    self.config.course.par
                );
            }
            self.won = true;
            self.aim = None;
        }

        self.driver.end_frame(frame_seconds, skipped, self.engine.max_turns_per_second());
        self.frames += 1;
        if self.frames % 100 == 0 {
            tracing::debug!(
                "Frame {}: P(total)={:.4}, P(win)={:.4}, fps={:.1}, est. {:.0} turns/s",
                self.frames,
                stats.total_probability,
                stats.win_probability,
                self.driver.history().fps(),
                self.driver.history().max_turns_per_second()
            );
        }
    }

    fn animate_aim(&mut self, mut aim: Aim, elapsed: f32) {
        let momentum = self.aim_momentum(&aim);
        let speed = momentum[0].hypot(momentum[1]);
        let physics = self.config.physics;
        let mass = self.engine.grid().mass;
        aim.phase = (aim.phase + speed * 0.5 * physics.turns_per_second * physics.dt * elapsed / mass) % TAU;
        self.engine.set_kick(aim.origin, self.club_radius(), momentum, aim.phase);
        self.aim = Some(aim);
    }

    fn aim_momentum(&self, aim: &Aim) -> [f32; 2] {
        let scale = self.config.course.aim_scale / self.engine.grid().dx;
        [scale * (aim.pointer[0] - aim.origin[0]), scale * (aim.pointer[1] - aim.origin[1])]
    }

    // -----------------------------------------------------------------------
    // Player actions
    // -----------------------------------------------------------------------

    /// Start aiming a putt from `origin`. Ignored once the hole is sunk.
    pub fn begin_aim(&mut self, origin: [f32; 2]) -> bool {
        if self.won {
            return false;
        }
        self.aim = Some(Aim { origin, pointer: origin, phase: 0.0 });
        true
    }

    /// Move the aim pointer.
    pub fn aim_at(&mut self, pointer: [f32; 2]) {
        if let Some(aim) = self.aim.as_mut() {
            aim.pointer = pointer;
        }
    }

    /// Drop the current aim without putting.
    pub fn cancel_aim(&mut self) {
        self.aim = None;
    }

    /// Release the aimed putt. Returns the momentum applied, if a putt was aimed.
    pub fn release(&mut self) -> Option<[f32; 2]> {
        let aim = self.aim.take()?;
        let momentum = self.aim_momentum(&aim);
        self.engine.set_kick(aim.origin, self.club_radius(), momentum, aim.phase);
        self.engine.apply_kick();
        // Stats refresh even while paused.
        self.engine.begin_stats();
        self.score += PUTT_STROKES;
        tracing::info!(
            "Putt from ({:.1}, {:.1}) with momentum ({:.4}, {:.4}), score {}",
            aim.origin[0],
            aim.origin[1],
            momentum[0],
            momentum[1],
            self.score
        );
        Some(momentum)
    }

    /// Aim from `origin` towards `pointer` and release at once.
    pub fn putt(&mut self, origin: [f32; 2], pointer: [f32; 2]) -> Option<[f32; 2]> {
        if !self.begin_aim(origin) {
            return None;
        }
        self.aim_at(pointer);
        self.release()
    }

    /// Collapse the wavefunction at a sampled position. `None` once the hole is sunk.
    pub fn measure(&mut self) -> Result<Option<Measurement>, EngineError> {
        if self.won {
            return Ok(None);
        }
        let measurement = self.engine.measure(self.initial_sigma)?;
        self.engine.begin_stats();
        self.aim = None;
        self.score += MEASURE_STROKES;
        self.last_measurement = Some(measurement);
        Ok(Some(measurement))
    }

    /// Draw many positions without collapsing, and pause to show them.
    pub fn show_measurements(&mut self) -> Result<&[(u32, u32)], EngineError> {
        self.measurements = self.engine.sample_many(SHOWN_MEASUREMENTS)?;
        self.paused = true;
        Ok(&self.measurements)
    }

    /// Flip the pause state. Clears shown measurements.
    pub fn toggle_pause(&mut self) {
        self.set_paused(!self.paused);
    }

    /// Pause or resume physics. Clears shown measurements.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.measurements.clear();
    }

    /// Set the club size, clamped to [0, 1].
    pub fn set_club_size(&mut self, size: f32) {
        self.club_size = size.clamp(0.0, 1.0);
    }

    /// Grow or shrink the club.
    pub fn adjust_club_size(&mut self, delta: f32) {
        self.set_club_size(self.club_size + delta);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Club radius in physical units.
    pub fn club_radius(&self) -> f32 {
        club_radius(self.club_size, self.engine.grid().physical_size())
    }

    /// Ball start position.
    pub fn start(&self) -> [f32; 2] {
        self.start
    }

    /// Hole centre.
    pub fn hole(&self) -> [f32; 2] {
        self.hole
    }

    /// Goal-state width.
    pub fn hole_sigma(&self) -> f32 {
        self.hole_sigma
    }

    /// Width of the packet after a reset or measurement.
    pub fn initial_sigma(&self) -> f32 {
        self.initial_sigma
    }

    /// Strokes so far.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Hole sunk.
    pub fn is_won(&self) -> bool {
        self.won
    }

    /// Physics paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// A putt is being aimed.
    pub fn is_aiming(&self) -> bool {
        self.aim.is_some()
    }

    /// Frames played.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Latest statistics.
    pub fn stats(&self) -> Stats {
        self.engine.stats()
    }

    /// The configuration this course was built from.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Anomaly counts.
    pub fn anomalies(&self) -> &AnomalyLog {
        &self.anomalies
    }

    /// Underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Underlying engine, mutable.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Probability density reduced so the width is at most `max_width` pixels.
    pub fn probability_image(&mut self, max_width: u32) -> Result<ProbabilityImage, EngineError> {
        let id = self.engine.probability_field();
        let field = self.engine.read_grid_region(id)?;
        let factor = field.width.div_ceil(max_width.max(1));
        Ok(downsample(&field.data, field.width, field.height, factor))
    }

    /// Serialisable snapshot.
    pub fn status(&self) -> CourseStatus {
        let stats = self.engine.stats();
        let grid = self.engine.grid();
        CourseStatus {
            name: self.config.name.clone(),
            backend: self.engine.backend_name().to_string(),
            width: grid.width,
            height: grid.height,
            start: self.start,
            hole: self.hole,
            score: self.score,
            par: self.config.course.par,
            total_probability: stats.total_probability,
            win_probability: stats.win_probability,
            won: self.won,
            paused: self.paused,
            aiming: self.aim.is_some(),
            club_size: self.club_size,
            club_radius: self.club_radius(),
            putt_phase: self.aim.map_or(0.0, |a| a.phase),
            turns_run: self.engine.turns_run(),
            skipped_turns: self.driver.last_skipped(),
            total_skipped_turns: self.driver.total_skipped(),
            fps: self.driver.history().fps(),
            max_turns_per_second: self.driver.history().max_turns_per_second(),
            frames: self.frames,
            measurements: self.measurements.iter().map(|&(x, y)| [x, y]).collect(),
            last_measurement: self.last_measurement.map(MeasurementReport::from),
            anomalies: self.anomalies.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hole_sigma_defaults() {
        // r = 0.2 * 512, depth 0.05, m = 1
        let sigma = hole_sigma(102.4, 0.05, 1.0);
        let expected = (102.4f32 / PI).sqrt() * 40.0f32.powf(0.25);
        assert!((sigma - expected).abs() < 1e-4);
        assert!(sigma > 14.0 && sigma < 15.0, "sigma {}", sigma);
    }

    #[test]
    fn test_club_radius_interpolates() {
        let size = (800.0, 500.0);
        assert!((club_radius(0.0, size) - 50.0).abs() < 1e-4);
        assert!((club_radius(1.0, size) - 320.0).abs() < 1e-3);
        assert!((club_radius(0.25, size) - (0.75 * 50.0 + 0.25 * 320.0)).abs() < 1e-3);
        assert_eq!(club_radius(2.0, size), club_radius(1.0, size));
    }

    #[test]
    fn test_downsample_edges() {
        // 5x3 field, factor 2 -> 3x2 image
        let data: Vec<f32> = (0..15).map(|i| i as f32).collect();
        let image = downsample(&data, 5, 3, 2);
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.data[0], (0.0 + 1.0 + 5.0 + 6.0) / 4.0);
        assert_eq!(image.data[2], (4.0 + 9.0) / 2.0);
        assert_eq!(image.data[5], 14.0);
    }
}

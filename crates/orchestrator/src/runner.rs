//! Game runner with lifecycle management
//!
//! The `GameRunner` owns a [`Course`] on a background thread and plays it in
//! real time. Player actions arrive over a channel and are applied between
//! frames; status and a downsampled probability image are published through
//! shared state.

use crate::course::{Course, CourseStatus, MeasurementReport, ProbabilityImage};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Runner state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunnerState {
    /// Game created but not yet started
    Created,
    /// Frames are being played
    Running,
    /// Frame loop suspended; commands are still applied
    Paused,
    /// Game finished (frame limit reached or runner dropped)
    Finished,
    /// The frame thread died
    Error,
}

/// Player action.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Aim from `origin` towards `pointer` and release.
    Putt {
        /// Club centre, physical units.
        origin: [f32; 2],
        /// Release point, physical units.
        pointer: [f32; 2],
    },
    /// Collapse the wavefunction.
    Measure,
    /// Draw many samples and pause.
    ShowMeasurements,
    /// Pause or resume physics.
    SetPaused(bool),
    /// Flip the physics pause.
    TogglePause,
    /// Back to the opening position.
    Reset,
    /// Change the club size.
    SetClubSize(f32),
}

/// Outcome of a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandReply {
    /// Applied, nothing to report.
    Done,
    /// Momentum applied by a putt; `None` if the hole was already sunk.
    Putt(Option<[f32; 2]>),
    /// Collapse result; `None` if the hole was already sunk.
    Measured(Option<MeasurementReport>),
    /// Sampled cells.
    Measurements(Vec<[u32; 2]>),
}

/// Frame loop tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerOptions {
    /// Target wall time per frame.
    pub frame_interval: Duration,
    /// Maximum width of the published probability image.
    pub image_width: u32,
    /// Publish the probability image every this many frames.
    pub image_every: u64,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_micros(16_667),
            image_width: 128,
            image_every: 2,
            max_frames: None,
        }
    }
}

struct Envelope {
    command: Command,
    reply: Sender<Result<CommandReply, String>>,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    status: CourseStatus,
    image: Option<Arc<ProbabilityImage>>,
    image_seq: u64,
    error_message: Option<String>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running game
pub struct GameRunner {
    shared: Arc<Mutex<SharedState>>,
    commands: Sender<Envelope>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl GameRunner {
    /// Move a course onto its own thread. It waits in `Created` until started.
    pub fn new(course: Course, options: RunnerOptions) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            status: course.status(),
            image: None,
            image_seq: 0,
            error_message: None,
        }));
        let (commands, inbox) = mpsc::channel();

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || {
            let mut course = course;
            let loop_shared = Arc::clone(&shared_clone);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_game_loop(&mut course, &loop_shared, &inbox, options)
            }));
            if outcome.is_err() {
                let mut guard = lock(&shared_clone);
                guard.state = RunnerState::Error;
                guard.error_message = Some("Game thread panicked".to_string());
                tracing::error!("Game thread panicked");
            }
        });

        Self { shared, commands, thread_handle: Some(thread_handle) }
    }

    /// Current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Latest published status
    pub fn status(&self) -> CourseStatus {
        lock(&self.shared).status.clone()
    }

    /// Latest probability image and its sequence number
    pub fn image(&self) -> Option<(u64, Arc<ProbabilityImage>)> {
        let guard = lock(&self.shared);
        guard.image.as_ref().map(|image| (guard.image_seq, Arc::clone(image)))
    }

    /// Error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Start playing (Created -> Running)
    pub fn start(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Created {
            guard.state = RunnerState::Running;
        }
    }

    /// Suspend the frame loop
    pub fn pause(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Running {
            guard.state = RunnerState::Paused;
        }
    }

    /// Resume the frame loop
    pub fn resume(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Paused {
            guard.state = RunnerState::Running;
        }
    }

    /// Apply a player action and wait for its outcome.
    pub fn send(&self, command: Command) -> Result<CommandReply, String> {
        let (reply, outcome) = mpsc::channel();
        self.commands
            .send(Envelope { command, reply })
            .map_err(|_| "Game thread has exited".to_string())?;
        match outcome.recv_timeout(Duration::from_secs(10)) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err("Timed out waiting for the game thread".to_string()),
            Err(RecvTimeoutError::Disconnected) => Err("Game thread has exited".to_string()),
        }
    }

    /// Ask the thread to finish after the current frame
    pub fn stop(&self) {
        let mut guard = lock(&self.shared);
        if matches!(guard.state, RunnerState::Created | RunnerState::Running | RunnerState::Paused) {
            guard.state = RunnerState::Finished;
        }
    }

    /// Wait for the game thread to complete
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| "Thread panicked".to_string())?;
        }
        Ok(())
    }
}

impl Drop for GameRunner {
    fn drop(&mut self) {
        // Signal the thread to exit
        self.stop();
    }
}

fn apply(course: &mut Course, command: Command) -> Result<CommandReply, String> {
    tracing::debug!("Applying {:?}", command);
    match command {
        Command::Putt { origin, pointer } => Ok(CommandReply::Putt(course.putt(origin, pointer))),
        Command::Measure => course
            .measure()
            .map(|m| CommandReply::Measured(m.map(MeasurementReport::from)))
            .map_err(|e| e.to_string()),
        Command::ShowMeasurements => course
            .show_measurements()
            .map(|cells| CommandReply::Measurements(cells.iter().map(|&(x, y)| [x, y]).collect()))
            .map_err(|e| e.to_string()),
        Command::SetPaused(paused) => {
            course.set_paused(paused);
            Ok(CommandReply::Done)
        }
        Command::TogglePause => {
            course.toggle_pause();
            Ok(CommandReply::Done)
        }
        Command::Reset => {
            course.reset();
            Ok(CommandReply::Done)
        }
        Command::SetClubSize(size) => {
            course.set_club_size(size);
            Ok(CommandReply::Done)
        }
    }
}

type Reply = (Sender<Result<CommandReply, String>>, Result<CommandReply, String>);

/// Apply queued commands. Returns whether a handle is still connected, and
/// the replies to send once the new state is published.
fn drain_commands(course: &mut Course, inbox: &Receiver<Envelope>) -> (bool, Vec<Reply>) {
    let mut replies = Vec::new();
    loop {
        match inbox.try_recv() {
            Ok(envelope) => {
                let result = apply(course, envelope.command);
                if let Err(e) = &result {
                    tracing::warn!("Command failed: {}", e);
                }
                replies.push((envelope.reply, result));
            }
            Err(mpsc::TryRecvError::Empty) => return (true, replies),
            Err(mpsc::TryRecvError::Disconnected) => return (false, replies),
        }
    }
}

fn deliver(replies: Vec<Reply>) {
    for (reply, result) in replies {
        // The caller may have given up waiting.
        let _ = reply.send(result);
    }
}

fn publish(course: &mut Course, shared: &Mutex<SharedState>, options: &RunnerOptions, with_image: bool) {
    let image = if with_image {
        match course.probability_image(options.image_width) {
            Ok(image) => Some(Arc::new(image)),
            Err(e) => {
                tracing::warn!("Probability readback failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    let status = course.status();
    let mut guard = lock(shared);
    guard.status = status;
    if let Some(image) = image {
        guard.image = Some(image);
        guard.image_seq += 1;
    }
}

/// Main game loop executed in background thread
fn run_game_loop(
    course: &mut Course,
    shared: &Mutex<SharedState>,
    inbox: &Receiver<Envelope>,
    options: RunnerOptions,
) {
    let started = Instant::now();
    let mut last_frame = Instant::now();
    let mut frame_count = 0u64;

    loop {
        let state = lock(shared).state;
        if matches!(state, RunnerState::Finished | RunnerState::Error) {
            break;
        }
        let (connected, replies) = drain_commands(course, inbox);
        let applied = !replies.is_empty();
        let mut finished = !connected;

        if state == RunnerState::Running {
            let now = Instant::now();
            let frame_seconds = now.duration_since(last_frame).as_secs_f64();
            last_frame = now;

            course.frame(frame_seconds);
            frame_count += 1;
            let with_image = applied || frame_count % options.image_every.max(1) == 0;
            publish(course, shared, &options, with_image);

            if let Some(max_frames) = options.max_frames {
                if frame_count >= max_frames {
                    tracing::info!("Game finished: reached max_frames = {}", max_frames);
                    finished = true;
                }
            }
        } else {
            if applied {
                publish(course, shared, &options, true);
            }
            // Wall time spent outside Running is not simulated.
            last_frame = Instant::now();
        }
        deliver(replies);

        if finished {
            lock(shared).state = RunnerState::Finished;
            break;
        }

        if state == RunnerState::Running {
            let spent = last_frame.elapsed();
            if spent < options.frame_interval {
                thread::sleep(options.frame_interval - spent);
            }
        } else {
            thread::sleep(Duration::from_millis(10));
        }
    }

    course.anomalies().summarize();
    tracing::info!(
        "Game thread exiting: {} frames, {} turns, score {}, won={}, {:.2}s wall",
        frame_count,
        course.engine().turns_run(),
        course.score(),
        course.is_won(),
        started.elapsed().as_secs_f64()
    );
}

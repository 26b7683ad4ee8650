//! Orchestration Layer
//!
//! This crate turns the wavefunction engine into a playable game:
//! - JSON course configuration with defaults and validation
//! - Backend selection (CPU, GPU or automatic)
//! - Frame pacing from wall time to physics turns
//! - The putting rules: aiming, measuring, scoring and the win check
//! - A game runner with lifecycle management on a background thread

#![warn(missing_docs)]

pub mod anomaly;
pub mod config;
pub mod course;
pub mod frame;
pub mod runner;

pub use config::{BackendType, GameConfig};
pub use course::{Course, CourseStatus, ProbabilityImage};
pub use runner::{Command, CommandReply, GameRunner, RunnerOptions, RunnerState};

use kernel::{CpuDevice, Engine, EngineSettings};

/// Create a complete game from a configuration file
///
/// This function performs the full setup pipeline:
/// 1. Load and validate the configuration
/// 2. Create the engine on the configured backend
/// 3. Lay out the course (potential, walls, goal state, opening packet)
/// 4. Wrap it in a GameRunner for lifecycle management
///
/// # Example
/// ```no_run
/// use orchestrator::create_game;
///
/// let runner = create_game("configs/default.json")?;
/// runner.start();
/// // ... query status, putt, measure, etc.
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_game(config_path: &str) -> Result<GameRunner, Box<dyn std::error::Error>> {
    tracing::info!("Creating game from config: {}", config_path);

    let config = GameConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    let options = RunnerOptions { max_frames: config.max_frames, ..RunnerOptions::default() };
    let course = create_course(config)?;

    tracing::info!("Game ready to start");
    Ok(GameRunner::new(course, options))
}

/// Build the engine and lay out the course, without a runner thread.
pub fn create_course(config: GameConfig) -> Result<Course, Box<dyn std::error::Error>> {
    config.validate()?;
    let settings = config.engine_settings()?;
    let engine = create_engine(config.backend, settings)?;
    Ok(Course::new(engine, config)?)
}

/// Create an engine on the requested backend.
///
/// For `Auto`, attempts GPU first and falls back to CPU if unavailable.
/// For `Gpu`, fails if the GPU cannot be initialised.
/// For `Cpu`, always uses the CPU device.
pub fn create_engine(backend: BackendType, settings: EngineSettings) -> Result<Engine, Box<dyn std::error::Error>> {
    match backend {
        BackendType::Cpu => {
            tracing::info!("Creating CPU engine...");
            Ok(Engine::new(Box::new(CpuDevice::new()), settings)?)
        }
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            tracing::info!("Creating GPU engine...");
            let device = kernel::GpuDevice::new()
                .map_err(|e| format!("GPU backend requested but initialization failed: {e}"))?;
            Ok(Engine::new(Box::new(device), settings)?)
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => {
            Err("GPU backend requested but 'gpu' feature is not enabled. Compile with --features gpu".into())
        }
        #[cfg(feature = "gpu")]
        BackendType::Auto => {
            tracing::info!("Auto-detecting backend...");
            if kernel::gpu_available() {
                tracing::info!("GPU available, creating GPU engine...");
                let gpu = kernel::GpuDevice::new()
                    .map_err(kernel::EngineError::from)
                    .and_then(|device| Engine::new(Box::new(device), settings));
                match gpu {
                    Ok(engine) => return Ok(engine),
                    Err(e) => tracing::warn!("GPU init failed ({e}), falling back to CPU"),
                }
            } else {
                tracing::info!("No GPU available, using CPU engine");
            }
            Ok(Engine::new(Box::new(CpuDevice::new()), settings)?)
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::info!("GPU feature not enabled, using CPU engine");
            Ok(Engine::new(Box::new(CpuDevice::new()), settings)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::GridSpec;

    #[test]
    fn test_cpu_backend() {
        let grid = GridSpec::new(16, 16, 1.0, 1.0).unwrap();
        let engine = create_engine(BackendType::Cpu, EngineSettings::for_grid(grid)).unwrap();
        assert_eq!(engine.backend_name(), "cpu");
    }

    #[test]
    fn test_auto_backend_always_builds() {
        let grid = GridSpec::new(16, 16, 1.0, 1.0).unwrap();
        assert!(create_engine(BackendType::Auto, EngineSettings::for_grid(grid)).is_ok());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(create_game("does/not/exist.json").is_err());
    }
}

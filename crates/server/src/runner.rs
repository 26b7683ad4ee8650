//! A game hosted by the server: the orchestrator runner plus its metadata

use orchestrator::{create_course, Command, CommandReply, GameConfig, GameRunner, RunnerOptions};
use std::path::Path;
use std::time::Instant;

/// One hosted game
pub struct GameSession {
    /// Unique game ID
    pub id: String,
    /// Name of the config it was created from
    pub config_name: String,
    /// Frame thread
    pub runner: GameRunner,
    /// Creation time
    pub created: Instant,
}

impl GameSession {
    /// Load a config file and set up its game. The runner waits in `Created`.
    pub fn launch(id: String, config_name: &str, config_path: &Path) -> Result<Self, String> {
        let path = config_path.to_str().ok_or("Invalid config path")?;
        let config = GameConfig::load(path)?;
        let options = RunnerOptions { max_frames: config.max_frames, ..RunnerOptions::default() };
        let course = create_course(config).map_err(|e| e.to_string())?;

        tracing::info!("Game {} created from config '{}'", id, config_name);
        Ok(Self {
            id,
            config_name: config_name.to_string(),
            runner: GameRunner::new(course, options),
            created: Instant::now(),
        })
    }

    /// Apply a command. Blocks until the game thread has applied it.
    pub fn send(&self, command: Command) -> Result<CommandReply, String> {
        self.runner.send(command)
    }

    /// Seconds since creation
    pub fn age_seconds(&self) -> f64 {
        self.created.elapsed().as_secs_f64()
    }
}

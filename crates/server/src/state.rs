//! Shared application state

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::runner::GameSession;

/// Shared application state
pub struct AppState {
    /// Active games (ID -> session)
    pub games: Mutex<HashMap<String, Arc<GameSession>>>,
    /// Path to configs directory
    pub configs_dir: PathBuf,
    /// Server port
    pub port: u16,
}

impl AppState {
    /// Create new application state
    pub fn new(configs_dir: PathBuf, port: u16) -> Self {
        Self {
            games: Mutex::new(HashMap::new()),
            configs_dir,
            port,
        }
    }

    /// Lock the game table. A panic in another handler does not poison it for good.
    pub fn games(&self) -> MutexGuard<'_, HashMap<String, Arc<GameSession>>> {
        self.games.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up one game.
    pub fn game(&self, id: &str) -> Option<Arc<GameSession>> {
        self.games().get(id).cloned()
    }

    /// Path of a named config, with the name stripped of path components.
    pub fn config_path(&self, name: &str) -> PathBuf {
        let safe_name = name.replace("..", "").replace(['/', '\\'], "");
        self.configs_dir.join(format!("{}.json", safe_name))
    }
}

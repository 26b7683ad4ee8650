//! REST API endpoints for game management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use orchestrator::{Command, CommandReply, CourseStatus, GameConfig, RunnerState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::runner::GameSession;
use crate::state::AppState;

type ApiError = (StatusCode, String);

// ---------------------------------------------------------------------------
// Request/Response Types
// ---------------------------------------------------------------------------

/// Request body for creating a game
#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    /// Configuration name (e.g., "default")
    pub config: String,
}

/// Response for game creation
#[derive(Debug, Serialize)]
pub struct CreateGameResponse {
    /// Unique game ID
    pub game_id: String,
    /// Runner state
    pub state: RunnerState,
    /// WebSocket URL for streaming this game
    pub ws_url: String,
    /// Grid width in cells
    pub width: u32,
    /// Grid height in cells
    pub height: u32,
}

/// Configuration file metadata
#[derive(Debug, Serialize)]
pub struct ConfigInfo {
    /// Configuration name (file stem)
    pub name: String,
    /// Course name inside the file
    pub course: String,
    /// File path
    pub path: String,
    /// Grid width in cells
    pub width: u32,
    /// Grid height in cells
    pub height: u32,
    /// Par for the course
    pub par: u32,
}

/// List of available configurations
#[derive(Debug, Serialize)]
pub struct ConfigListResponse {
    /// Available configurations
    pub configs: Vec<ConfigInfo>,
}

/// Game status response
#[derive(Debug, Serialize)]
pub struct GameStatusResponse {
    /// Game ID
    pub game_id: String,
    /// Config the game was created from
    pub config: String,
    /// Runner state
    pub state: RunnerState,
    /// Seconds since creation
    pub age_seconds: f64,
    /// Game status
    pub status: CourseStatus,
    /// Error message when the runner failed
    pub error: Option<String>,
}

/// Result of a player action
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// Game ID
    pub game_id: String,
    /// What the action did
    pub reply: CommandReply,
    /// Game status after the action
    pub status: CourseStatus,
}

/// Request body for a putt
#[derive(Debug, Deserialize)]
pub struct PuttRequest {
    /// Club centre; defaults to the ball start
    pub origin: Option<[f32; 2]>,
    /// Release point
    pub pointer: [f32; 2],
}

/// Request body for the club size
#[derive(Debug, Deserialize)]
pub struct ClubRequest {
    /// Club size in [0, 1]
    pub size: f32,
}

/// Generic status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Status string
    pub status: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn find_game(state: &AppState, id: &str) -> Result<Arc<GameSession>, ApiError> {
    state
        .game(id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Game '{}' not found", id)))
}

/// Apply a command on a blocking thread and report the new status.
async fn run_command(state: &AppState, id: String, command: Command) -> Result<Json<CommandResponse>, ApiError> {
    let session = find_game(state, &id)?;
    let worker = Arc::clone(&session);
    let reply = tokio::task::spawn_blocking(move || worker.send(command))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Command task failed: {}", e)))?
        .map_err(|e| (StatusCode::CONFLICT, e))?;

    Ok(Json(CommandResponse { game_id: id, reply, status: session.runner.status() }))
}

// ---------------------------------------------------------------------------
// API Handlers
// ---------------------------------------------------------------------------

/// GET /api/configs - List available configuration files
pub async fn list_configs(State(state): State<Arc<AppState>>) -> Result<Json<ConfigListResponse>, ApiError> {
    let entries = std::fs::read_dir(&state.configs_dir).map_err(|e| {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read configs directory: {}", e))
    })?;

    let mut configs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let path = entry.path();

        // Only process .json files
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let parsed = path
            .to_str()
            .ok_or_else(|| "Invalid config path".to_string())
            .and_then(GameConfig::load)
            .and_then(|config| config.grid_spec().map(|grid| (config, grid)));
        match parsed {
            Ok((config, grid)) => configs.push(ConfigInfo {
                name,
                course: config.name,
                path: path.to_string_lossy().to_string(),
                width: grid.width,
                height: grid.height,
                par: config.course.par,
            }),
            Err(e) => {
                tracing::warn!("Failed to parse config {:?}: {}", path, e);
            }
        }
    }
    configs.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(ConfigListResponse { configs }))
}

/// GET /api/configs/{name} - Get raw configuration JSON
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config_path = state.config_path(&name);
    if !config_path.exists() {
        return Err((StatusCode::NOT_FOUND, format!("Configuration '{}' not found", name)));
    }

    let content = std::fs::read_to_string(&config_path)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read config: {}", e)))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to parse config: {}", e)))?;

    Ok(Json(json))
}

/// POST /api/games - Create a new game
pub async fn create_game(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGameRequest>,
) -> Result<Json<CreateGameResponse>, ApiError> {
    let config_path = state.config_path(&req.config);
    if !config_path.exists() {
        return Err((StatusCode::NOT_FOUND, format!("Configuration '{}' not found", req.config)));
    }

    let game_id = uuid::Uuid::new_v4().to_string();
    let id = game_id.clone();
    let config_name = req.config.clone();
    // Engine setup allocates every field and may initialise a GPU.
    let session = tokio::task::spawn_blocking(move || GameSession::launch(id, &config_name, &config_path))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Setup task failed: {}", e)))?
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid configuration: {}", e)))?;

    let status = session.runner.status();
    let response = CreateGameResponse {
        game_id: game_id.clone(),
        state: session.runner.state(),
        ws_url: format!("ws://localhost:{}/ws/game/{}", state.port, game_id),
        width: status.width,
        height: status.height,
    };
    state.games().insert(game_id, Arc::new(session));

    Ok(Json(response))
}

/// GET /api/games/{id} - Get game status
pub async fn get_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GameStatusResponse>, ApiError> {
    let session = find_game(&state, &id)?;
    Ok(Json(GameStatusResponse {
        game_id: id,
        config: session.config_name.clone(),
        state: session.runner.state(),
        age_seconds: session.age_seconds(),
        status: session.runner.status(),
        error: session.runner.error_message(),
    }))
}

/// DELETE /api/games/{id} - Stop and remove a game
pub async fn delete_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = state
        .games()
        .remove(&id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Game '{}' not found", id)))?;
    session.runner.stop();
    tracing::info!("Game {} removed", id);
    Ok(Json(StatusResponse { status: "finished".to_string() }))
}

/// POST /api/games/{id}/start - Start the frame loop
pub async fn start_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = find_game(&state, &id)?;
    session.runner.start();
    session.runner.resume();
    Ok(Json(StatusResponse { status: "running".to_string() }))
}

/// POST /api/games/{id}/pause - Pause physics
pub async fn pause_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&state, id, Command::SetPaused(true)).await
}

/// POST /api/games/{id}/resume - Resume physics
pub async fn resume_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&state, id, Command::SetPaused(false)).await
}

/// POST /api/games/{id}/putt - Putt from `origin` towards `pointer`
pub async fn putt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PuttRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let origin = match req.origin {
        Some(origin) => origin,
        None => find_game(&state, &id)?.runner.status().start,
    };
    run_command(&state, id, Command::Putt { origin, pointer: req.pointer }).await
}

/// POST /api/games/{id}/measure - Collapse the wavefunction
pub async fn measure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&state, id, Command::Measure).await
}

/// POST /api/games/{id}/measurements - Sample many positions and pause
pub async fn show_measurements(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&state, id, Command::ShowMeasurements).await
}

/// POST /api/games/{id}/reset - Back to the opening position
pub async fn reset_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&state, id, Command::Reset).await
}

/// POST /api/games/{id}/club - Set the club size
pub async fn set_club(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ClubRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&state, id, Command::SetClubSize(req.size)).await
}

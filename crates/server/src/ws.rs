//! WebSocket endpoint for real-time game streaming

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use orchestrator::{Command, CourseStatus, ProbabilityImage, RunnerState};
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::runner::GameSession;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Binary Protocol Tags
// ---------------------------------------------------------------------------

/// Game geometry, sent once on connect
pub const TAG_GAME_INFO: u8 = 0x01;
/// Downsampled probability density
pub const TAG_FRAME: u8 = 0x02;
/// Per-tick statistics
pub const TAG_STATS: u8 = 0x03;
/// Reply to a client command
pub const TAG_GAME_STATUS: u8 = 0x04;

/// Prefix of every client command
pub const CMD_TAG: u8 = 0x80;
/// Pause physics
pub const CMD_PAUSE: u8 = 0x01;
/// Resume physics
pub const CMD_RESUME: u8 = 0x02;
/// Collapse the wavefunction
pub const CMD_MEASURE: u8 = 0x03;
/// Back to the opening position
pub const CMD_RESET: u8 = 0x04;
/// Putt: origin (f32 x2) + pointer (f32 x2)
pub const CMD_PUTT: u8 = 0x05;
/// Sample 100 positions and pause
pub const CMD_SHOW_MEASUREMENTS: u8 = 0x06;

const STATS_INTERVAL: Duration = Duration::from_millis(33);

// ---------------------------------------------------------------------------
// WebSocket Handler
// ---------------------------------------------------------------------------

/// WebSocket upgrade handler for /ws/game/{id}
pub async fn ws_game_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.game(&id) {
        Some(session) => ws.on_upgrade(move |socket| handle_websocket(socket, session)),
        None => (axum::http::StatusCode::NOT_FOUND, "Game not found").into_response(),
    }
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, session: Arc<GameSession>) {
    let (mut sender, mut receiver) = socket.split();

    let info = build_game_info(&session.runner.status());
    if let Err(e) = sender.send(Message::Binary(info)).await {
        tracing::error!("Failed to send GameInfo: {}", e);
        return;
    }

    // Start (or resume) the frame loop while a client is watching
    session.runner.start();
    session.runner.resume();

    let mut stats_timer = interval(STATS_INTERVAL);
    let mut last_image_seq = 0u64;

    loop {
        tokio::select! {
            _ = stats_timer.tick() => {
                let state = session.runner.state();
                if matches!(state, RunnerState::Finished | RunnerState::Error) {
                    let message = session.runner.error_message().unwrap_or_else(|| "Game finished".to_string());
                    let _ = sender.send(Message::Binary(build_game_status(state, &message))).await;
                    break;
                }

                let stats = build_stats(&session.runner.status());
                if let Err(e) = sender.send(Message::Binary(stats)).await {
                    tracing::debug!("Failed to send stats: {}", e);
                    break;
                }

                // Only new images go out; a slow client skips intermediate ones.
                if let Some((seq, image)) = session.runner.image() {
                    if seq != last_image_seq {
                        last_image_seq = seq;
                        if let Err(e) = sender.send(Message::Binary(build_frame(seq, &image))).await {
                            tracing::debug!("Failed to send frame: {}", e);
                            break;
                        }
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let reply = handle_client_command(&session, data).await;
                        if let Err(e) = sender.send(Message::Binary(reply)).await {
                            tracing::debug!("Failed to send command reply: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket closed for game {}", session.id);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Cleanup: stop playing when the client disconnects
    session.runner.pause();
}

// ---------------------------------------------------------------------------
// Binary Protocol Builders
// ---------------------------------------------------------------------------

/// Build GameInfo message (tag 0x01)
/// Format: tag(u8) + width(u32) + height(u32) + par(u32) + start(f32x2) + hole(f32x2)
pub fn build_game_info(status: &CourseStatus) -> Vec<u8> {
    let mut buf = Vec::with_capacity(29);
    buf.push(TAG_GAME_INFO);
    buf.extend_from_slice(&status.width.to_le_bytes());
    buf.extend_from_slice(&status.height.to_le_bytes());
    buf.extend_from_slice(&status.par.to_le_bytes());
    for &v in status.start.iter().chain(status.hole.iter()) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Build Stats message (tag 0x03)
/// Format: tag(u8) + frame(u64) + total_probability(f32) + win_probability(f32) +
///         score(u32) + flags(u8: won|paused<<1|aiming<<2) + skipped_turns(u32) +
///         fps(f32) + max_turns_per_second(f32)
pub fn build_stats(status: &CourseStatus) -> Vec<u8> {
    let mut buf = Vec::with_capacity(34);
    buf.push(TAG_STATS);
    buf.extend_from_slice(&status.frames.to_le_bytes());
    buf.extend_from_slice(&status.total_probability.to_le_bytes());
    buf.extend_from_slice(&status.win_probability.to_le_bytes());
    buf.extend_from_slice(&status.score.to_le_bytes());
    let flags = status.won as u8 | (status.paused as u8) << 1 | (status.aiming as u8) << 2;
    buf.push(flags);
    buf.extend_from_slice(&status.skipped_turns.to_le_bytes());
    buf.extend_from_slice(&(status.fps as f32).to_le_bytes());
    buf.extend_from_slice(&(status.max_turns_per_second as f32).to_le_bytes());
    buf
}

/// Build Frame message (tag 0x02)
/// Format: tag(u8) + seq(u64) + width(u32) + height(u32) + peak(f32) + [u16 density / peak * 65535]
pub fn build_frame(seq: u64, image: &ProbabilityImage) -> Vec<u8> {
    let peak = image.data.iter().cloned().filter(|v| v.is_finite()).fold(0.0f32, f32::max);
    let mut buf = Vec::with_capacity(21 + image.data.len() * 2);
    buf.push(TAG_FRAME);
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.extend_from_slice(&image.width.to_le_bytes());
    buf.extend_from_slice(&image.height.to_le_bytes());
    buf.extend_from_slice(&peak.to_le_bytes());

    let scale = if peak > 0.0 { 65535.0 / peak } else { 0.0 };
    for &v in &image.data {
        let q = if v.is_finite() { (v * scale).clamp(0.0, 65535.0) as u16 } else { 0 };
        buf.extend_from_slice(&q.to_le_bytes());
    }
    buf
}

/// Build GameStatus message (tag 0x04)
/// Format: tag(u8) + state(u8) + message_length(u16) + message(utf8)
pub fn build_game_status(state: RunnerState, message: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(TAG_GAME_STATUS);

    // 0=Running, 1=Paused, 2=Finished, 3=Error
    let state_byte = match state {
        RunnerState::Running | RunnerState::Created => 0u8,
        RunnerState::Paused => 1u8,
        RunnerState::Finished => 2u8,
        RunnerState::Error => 3u8,
    };
    buf.push(state_byte);

    let msg_bytes = message.as_bytes();
    let len = msg_bytes.len().min(u16::MAX as usize);
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&msg_bytes[..len]);
    buf
}

// ---------------------------------------------------------------------------
// Client Command Handling
// ---------------------------------------------------------------------------

/// Decode a client command
pub fn parse_command(data: &[u8]) -> Result<Command, String> {
    if data.len() < 2 {
        return Err("Command too short".to_string());
    }
    if data[0] != CMD_TAG {
        return Err(format!("Unknown command tag: 0x{:02x}", data[0]));
    }

    match data[1] {
        CMD_PAUSE => Ok(Command::SetPaused(true)),
        CMD_RESUME => Ok(Command::SetPaused(false)),
        CMD_MEASURE => Ok(Command::Measure),
        CMD_RESET => Ok(Command::Reset),
        CMD_SHOW_MEASUREMENTS => Ok(Command::ShowMeasurements),
        CMD_PUTT => {
            let payload = &data[2..];
            if payload.len() != 16 {
                return Err(format!("Putt payload must be 16 bytes, got {}", payload.len()));
            }
            let mut v = [0.0f32; 4];
            for (value, chunk) in v.iter_mut().zip(payload.chunks_exact(4)) {
                *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            Ok(Command::Putt { origin: [v[0], v[1]], pointer: [v[2], v[3]] })
        }
        other => Err(format!("Unknown command: 0x{:02x}", other)),
    }
}

/// Apply a client command and build the GameStatus reply
async fn handle_client_command(session: &Arc<GameSession>, data: Vec<u8>) -> Vec<u8> {
    let command = match parse_command(&data) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!("Bad command for game {}: {}", session.id, e);
            return build_game_status(session.runner.state(), &e);
        }
    };

    let worker = Arc::clone(session);
    let outcome = tokio::task::spawn_blocking(move || worker.send(command)).await;
    let message = match outcome {
        Ok(Ok(reply)) => format!("{:?}", reply),
        Ok(Err(e)) => e,
        Err(e) => format!("Command task failed: {}", e),
    };
    build_game_status(session.runner.state(), &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_putt() {
        let mut data = vec![CMD_TAG, CMD_PUTT];
        for v in [10.0f32, 20.0, 30.0, 25.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(
            parse_command(&data).unwrap(),
            Command::Putt { origin: [10.0, 20.0], pointer: [30.0, 25.0] }
        );
        assert!(parse_command(&data[..10]).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_command(&[CMD_TAG]).is_err());
        assert!(parse_command(&[0x01, CMD_PAUSE]).is_err());
        assert!(parse_command(&[CMD_TAG, 0x7f]).is_err());
        assert_eq!(parse_command(&[CMD_TAG, CMD_MEASURE]).unwrap(), Command::Measure);
    }

    #[test]
    fn test_frame_quantisation() {
        let image = ProbabilityImage { width: 2, height: 1, data: vec![0.5, 0.25] };
        let buf = build_frame(7, &image);
        assert_eq!(buf.len(), 21 + 4);
        assert_eq!(buf[0], TAG_FRAME);
        assert_eq!(u64::from_le_bytes(buf[1..9].try_into().unwrap()), 7);
        assert_eq!(f32::from_le_bytes(buf[17..21].try_into().unwrap()), 0.5);
        assert_eq!(u16::from_le_bytes([buf[21], buf[22]]), 65535);
        assert_eq!(u16::from_le_bytes([buf[23], buf[24]]), 32767);
    }

    #[test]
    fn test_status_message() {
        let buf = build_game_status(RunnerState::Paused, "ok");
        assert_eq!(buf, vec![TAG_GAME_STATUS, 1, 2, 0, b'o', b'k']);
    }
}

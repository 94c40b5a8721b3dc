//! Playback of recorded game sessions, either from a local log file or
//! driven by a remote replay service.

mod local;
mod player;
mod reader;
mod recorder;
mod remote;

pub use local::LocalReplay;
pub use player::{ReplayFrame, ReplayPlayer, format_time};
pub use reader::{find_nearest, list_replays, load_replay, nearest_index, parse_replay, parse_replay_with_limit};
pub use recorder::ReplayRecorder;
pub use remote::RemoteReplay;

use chrono::{DateTime, Utc};
use common::GameState;

/// One row of a replay log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEntry {
    pub time: DateTime<Utc>,
    pub state: GameState,
}

/// What presentation sees of a replay, whichever mode produces it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayView {
    pub running: bool,
    pub paused: bool,
    /// Position within the recording, between 0 and 1.
    pub progress: f64,
    /// Timestamp of the playback cursor, as displayed.
    pub time: Option<String>,
    pub speed: f64,
    pub game_state: Option<GameState>,
}

impl Default for ReplayView {
    fn default() -> Self {
        Self {
            running: false,
            paused: true,
            progress: 0.0,
            time: None,
            speed: 1.0,
            game_state: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("replay contains no entries")]
    Empty,
    #[error("line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },
    #[error("failed to read replay: {0}")]
    Io(#[from] std::io::Error),
}

use serde::{Deserialize, Serialize};

use crate::tagged::tagged;

/// Controls a client sends to the replay service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ReplayMessage {
    /// Load and start the named recording.
    Play(String),
    /// Pause/unpause the replay.
    Pause,
    /// Go to a specific position. The value is between 0 and 1.
    Goto(f64),
    /// Set the playback speed. The value is positive.
    Speed(f64),
}

tagged!(ReplayMessage => ReplayMessageTag { Play, Pause, Goto, Speed });

/// What the replay service sends back.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ReplayResponse {
    Start,
    /// `game_state` is the recorded snapshot as a JSON string, forwarded without re-parsing.
    Frame {
        time: String,
        progress: f64,
        game_state: String,
    },
    Files(Vec<String>),
    End,
}

tagged!(ReplayResponse => ReplayResponseTag { Start, Frame, Files, End });

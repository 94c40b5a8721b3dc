use serde::{Deserialize, Serialize};

use crate::tagged::tagged;
use crate::GameState;

/// Messages the game client sends to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ClientMessage {
    /// A fix from the device's location service.
    Position { lat: f64, long: f64 },
    /// Move a team to a fixed location, e.g. a stop a detective selected.
    SetTeamPosition {
        lat: f64,
        long: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team_id: Option<u32>,
    },
    JoinTeam { team_id: u32 },
    /// `train_id` is the train's line id.
    EmbarkTrain { train_id: String },
    DisembarkTrain,
    MrXGadget(MrXGadget),
    DetectiveGadget(DetectiveGadget),
    /// Free text, logged by the server.
    Message(String),
}

tagged!(ClientMessage => ClientMessageTag {
    Position,
    SetTeamPosition,
    JoinTeam,
    EmbarkTrain,
    DisembarkTrain,
    MrXGadget,
    DetectiveGadget,
    Message,
});

/// Messages the game server pushes to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerMessage {
    GameState(GameState),
}

tagged!(ServerMessage => ServerMessageTag { GameState });

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum MrXGadget {
    AlternativeFacts { stop_id: String },
    Midjourney { image: Vec<u8> },
    NotFound,
    Teleport,
    Shifter,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum DetectiveGadget {
    Stop { stop_id: String },
    OutOfOrder,
    Shackles,
}

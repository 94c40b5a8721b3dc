use serde::{Deserialize, Serialize};

/// Information about a tram station.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stop {
    pub name: String,
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Train {
    pub id: u32,
    pub long: f64,
    pub lat: f64,
    pub line_id: String,
    pub line_name: String,
    pub direction: String,
}

impl Train {
    /// The identifier teams use to refer to this train in `on_train` and `EmbarkTrain`.
    ///
    /// The server matches embarked teams against the line id, not the numeric id.
    pub fn train_id(&self) -> &str {
        &self.line_id
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamKind {
    MrX,
    Detective,
    Observer,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: u32,
    pub name: String,
    pub color: String,
    pub kind: TeamKind,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TeamState {
    pub team: Team,
    pub long: f64,
    pub lat: f64,
    /// Line id of the train the team rides, `None` while on foot.
    pub on_train: Option<String>,
}

impl TeamState {
    pub fn is_embarked(&self) -> bool {
        self.on_train.is_some()
    }
}

/// Full snapshot of the live scene. Every server frame replaces it wholesale.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct GameState {
    pub teams: Vec<TeamState>,
    pub trains: Vec<Train>,
    #[serde(default)]
    pub position_cooldown: Option<f64>,
    #[serde(default)]
    pub detective_gadget_cooldown: Option<f64>,
    #[serde(default)]
    pub mr_x_gadget_cooldown: Option<f64>,
}

impl GameState {
    pub fn team_state(&self, team_id: u32) -> Option<&TeamState> {
        self.teams.iter().find(|state| state.team.id == team_id)
    }

    pub fn train(&self, train_id: &str) -> Option<&Train> {
        self.trains.iter().find(|train| train.train_id() == train_id)
    }

    /// Whether any team currently rides `train`.
    pub fn is_embarked(&self, train: &Train) -> bool {
        self.teams
            .iter()
            .any(|state| state.on_train.as_deref() == Some(train.train_id()))
    }

    /// Trains with at least one team on board.
    pub fn embarked_trains(&self) -> impl Iterator<Item = &Train> + '_ {
        self.trains.iter().filter(|train| self.is_embarked(train))
    }

    /// The train `team_id` rides, if the team is embarked and the train is still in the snapshot.
    pub fn embarked_train_of(&self, team_id: u32) -> Option<&Train> {
        let train_id = self.team_state(team_id)?.on_train.as_deref()?;
        self.train(train_id)
    }
}

/// Body of `POST /create-team`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CreateTeam {
    pub name: String,
    pub color: String,
    pub kind: TeamKind,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CreateTeamError {
    #[error("invalid team name")]
    InvalidName,
    #[error("a team with this name already exists")]
    NameAlreadyExists,
}

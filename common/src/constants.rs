/// Port the game server listens on in development builds.
pub const DEV_PORT: u16 = 3000;

/// Period of one replay tick.
pub const MS_PER_FRAME: i64 = 50;

/// Largest replay log accepted for local playback.
pub const MAX_REPLAY_BYTES: usize = 100 * 1024 * 1024;

/// Speed a remote replay is reset to when the service announces `Start`.
pub const DEFAULT_REPLAY_SPEED: f64 = 10.0;

/// Delay before the client retries a dropped connection.
pub const RECONNECT_DELAY_MS: u64 = 1000;

pub const WS_PATH: &str = "/ws";
pub const REPLAY_PATH: &str = "/replay";
pub const TEAMS_PATH: &str = "/api/teams";
pub const CREATE_TEAM_PATH: &str = "/api/create-team";
pub const STOPS_PATH: &str = "/api/stops";
pub const PING_PATH: &str = "/api/ping";

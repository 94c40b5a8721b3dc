use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use common::{
    CREATE_TEAM_PATH, DEFAULT_REPLAY_SPEED, DEV_PORT, MAX_REPLAY_BYTES, MS_PER_FRAME, PING_PATH,
    RECONNECT_DELAY_MS, REPLAY_PATH, STOPS_PATH, TEAMS_PATH, WS_PATH,
};
use url::Url;

/// Where the game server lives and how the client behaves towards it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Hostname, optionally with a port, e.g. `mrx.example.org` or `localhost:8080`.
    pub host: String,
    /// Development mode: plain schemes and the fixed dev port.
    pub dev: bool,
    /// Whether the client runs in a secure context. Insecure contexts use
    /// plain schemes and do not forward position fixes.
    pub secure: bool,
    pub dev_port: u16,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub replay_tick: Duration,
    pub replay_speed: f64,
    pub max_replay_bytes: u64,
    pub replay_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            dev: false,
            secure: true,
            dev_port: DEV_PORT,
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_secs(10),
            replay_tick: Duration::from_millis(MS_PER_FRAME as u64),
            replay_speed: DEFAULT_REPLAY_SPEED,
            max_replay_bytes: MAX_REPLAY_BYTES as u64,
            replay_dir: PathBuf::from("replays"),
        }
    }
}

impl ClientConfig {
    /// Read `MRX_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("MRX_HOST") {
            config.host = host;
        }
        if let Some(value) = lookup("MRX_DEV") {
            config.dev = parse_flag("MRX_DEV", &value)?;
        }
        if let Some(value) = lookup("MRX_SECURE") {
            config.secure = parse_flag("MRX_SECURE", &value)?;
        }
        if let Some(value) = lookup("MRX_DEV_PORT") {
            config.dev_port = parse_var("MRX_DEV_PORT", &value)?;
        }
        if let Some(value) = lookup("MRX_RECONNECT_DELAY_MS") {
            config.reconnect_delay = Duration::from_millis(parse_var("MRX_RECONNECT_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("MRX_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(parse_var("MRX_CONNECT_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("MRX_REPLAY_TICK_MS") {
            let millis: u64 = parse_var("MRX_REPLAY_TICK_MS", &value)?;
            if millis == 0 {
                return Err(anyhow!("MRX_REPLAY_TICK_MS must be positive"));
            }
            config.replay_tick = Duration::from_millis(millis);
        }
        if let Some(value) = lookup("MRX_REPLAY_SPEED") {
            let speed: f64 = parse_var("MRX_REPLAY_SPEED", &value)?;
            if !(speed.is_finite() && speed > 0.0) {
                return Err(anyhow!("MRX_REPLAY_SPEED must be a positive number, got {value}"));
            }
            config.replay_speed = speed;
        }
        if let Some(value) = lookup("MRX_MAX_REPLAY_BYTES") {
            config.max_replay_bytes = parse_var("MRX_MAX_REPLAY_BYTES", &value)?;
        }
        if let Some(dir) = lookup("MRX_REPLAY_DIR") {
            config.replay_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Take host and security from a full base URL such as `https://mrx.example.org`.
    pub fn with_base_url(mut self, base: &Url) -> Result<Self> {
        let host = base
            .host_str()
            .ok_or_else(|| anyhow!("base URL {} has no host", base))?;
        self.host = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        self.secure = matches!(base.scheme(), "https" | "wss");
        Ok(self)
    }

    /// Plain `ws`/`http` in development or outside a secure context.
    fn plain(&self) -> bool {
        self.dev || !self.secure
    }

    fn endpoint(&self, websocket: bool, path: &str) -> Result<Url> {
        let scheme = match (websocket, self.plain()) {
            (true, true) => "ws",
            (true, false) => "wss",
            (false, true) => "http",
            (false, false) => "https",
        };
        let mut url = Url::parse(&format!("{scheme}://{}", self.host))
            .with_context(|| format!("Invalid host {:?}", self.host))?;
        if self.dev {
            url.set_port(Some(self.dev_port))
                .map_err(|_| anyhow!("Cannot set port {} on {}", self.dev_port, url))?;
        }
        url.set_path(path);
        Ok(url)
    }

    pub fn ws_url(&self) -> Result<Url> {
        self.endpoint(true, WS_PATH)
    }

    pub fn replay_url(&self) -> Result<Url> {
        self.endpoint(true, REPLAY_PATH)
    }

    pub fn teams_url(&self) -> Result<Url> {
        self.endpoint(false, TEAMS_PATH)
    }

    pub fn create_team_url(&self) -> Result<Url> {
        self.endpoint(false, CREATE_TEAM_PATH)
    }

    pub fn stops_url(&self) -> Result<Url> {
        self.endpoint(false, STOPS_PATH)
    }

    pub fn ping_url(&self) -> Result<Url> {
        self.endpoint(false, PING_PATH)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value {value:?} for {name}: {e}"))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("Invalid value {other:?} for {name}, expected a boolean")),
    }
}

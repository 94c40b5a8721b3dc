mod intent;
mod play;
mod replay;
mod serve;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use client::{ApiClient, ClientConfig};
use common::{CreateTeam, TeamKind};
use tracing::{error, info};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "mrx", about = "Play, inspect and replay Mr. X games from the command line")]
struct Args {
    /// Base URL of the game server (e.g. https://mrx.example.org). Overrides MRX_HOST
    #[arg(long, global = true)]
    url: Option<String>,

    /// Development mode: plain ws/http on the development port
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a team and follow the live game. Reads commands from stdin
    Play {
        /// Id of the team to join
        #[arg(long)]
        team: u32,

        /// Record every game state to this file (`.gz` for compression)
        #[arg(long)]
        record: Option<PathBuf>,

        /// Treat bare `<lat>,<long>` lines on stdin as position fixes
        #[arg(long)]
        stdin_positions: bool,
    },
    /// List the teams
    Teams,
    /// Create a team: mrx | detective | observer
    CreateTeam {
        name: String,

        #[arg(value_parser = parse_kind)]
        kind: TeamKind,

        #[arg(long, default_value = "#ff7f00")]
        color: String,
    },
    /// List the stops
    Stops,
    /// Check whether the server is reachable
    Ping,
    /// Play a replay log locally and log its frames
    Replay {
        file: PathBuf,

        #[arg(long, default_value_t = 1.0)]
        speed: f64,

        /// Start at this position, between 0 and 1
        #[arg(long)]
        seek: Option<f64>,
    },
    /// Play a recording hosted by a replay service
    RemoteReplay {
        file: String,

        #[arg(long)]
        speed: Option<f64>,
    },
    /// Host the replay service for the logs in a directory
    ServeReplay {
        /// Directory holding the replay logs. Defaults to MRX_REPLAY_DIR or ./replays
        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(long, default_value = "127.0.0.1:3001")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    match args.command {
        Command::Play {
            team,
            record,
            stdin_positions,
        } => play::run(config, team, record, stdin_positions).await,
        Command::Teams => {
            let teams = ApiClient::new(config).teams().await?;
            for team in teams {
                println!("{:>4}  {:<10} {:<8} {}", team.id, format!("{:?}", team.kind), team.color, team.name);
            }
            Ok(())
        }
        Command::CreateTeam { name, kind, color } => {
            let request = CreateTeam { name, color, kind };
            match ApiClient::new(config).create_team(&request).await? {
                Ok(team) => {
                    println!("Created team {} with id {}", team.name, team.id);
                    Ok(())
                }
                Err(e) => Err(anyhow!("Server refused to create team {:?}: {}", request.name, e)),
            }
        }
        Command::Stops => {
            let stops = ApiClient::new(config).stops().await?;
            for stop in stops {
                println!("{:<20} {:>9.5} {:>9.5}  {}", stop.id, stop.lat, stop.lon, stop.name);
            }
            Ok(())
        }
        Command::Ping => {
            let url = config.ping_url()?;
            if ApiClient::new(config).ping().await {
                info!("{} is up", url);
                Ok(())
            } else {
                error!("{} is not reachable", url);
                Err(anyhow!("Ping failed"))
            }
        }
        Command::Replay { file, speed, seek } => replay::run_local(config, file, speed, seek).await,
        Command::RemoteReplay { file, speed } => replay::run_remote(config, file, speed).await,
        Command::ServeReplay { dir, addr } => {
            let dir = dir.unwrap_or_else(|| config.replay_dir.clone());
            serve::run(addr, dir, config.replay_tick, config.max_replay_bytes).await
        }
    }
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env().context("Invalid MRX_* environment")?;
    if let Some(url) = &args.url {
        config = config.with_base_url(&normalize_base_url(url)?)?;
    }
    if args.dev {
        config.dev = true;
    }
    Ok(config)
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    // `localhost:3000` parses as scheme `localhost`
    let url = Url::parse(raw)
        .ok()
        .filter(|url| url.host_str().is_some())
        .map_or_else(|| Url::parse(&format!("http://{raw}")), Ok)
        .context("Invalid base URL")?;
    if url.host_str().is_none() {
        return Err(anyhow!("Base URL {} has no host", url));
    }
    Ok(url)
}

fn parse_kind(raw: &str) -> Result<TeamKind> {
    match raw.to_ascii_lowercase().as_str() {
        "mrx" | "mr-x" | "mr_x" => Ok(TeamKind::MrX),
        "detective" => Ok(TeamKind::Detective),
        "observer" => Ok(TeamKind::Observer),
        other => Err(anyhow!("Unknown team kind {other:?}, expected mrx, detective or observer")),
    }
}

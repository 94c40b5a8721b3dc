//! The replay service: streams recorded games to websocket clients, one
//! independent player per connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use client::replay::{ReplayFrame, ReplayPlayer, format_time, list_replays, load_replay};
use common::{ReplayMessage, ReplayResponse, decode, encode};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, Interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub dir: PathBuf,
    pub tick: Duration,
    pub max_bytes: u64,
}

pub async fn run(addr: SocketAddr, dir: PathBuf, tick: Duration, max_bytes: u64) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Serving replays from {} on ws://{}", dir.display(), listener.local_addr()?);
    let config = Arc::new(ServeConfig { dir, tick, max_bytes });

    tokio::select! {
        result = serve(listener, config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down replay service");
            Ok(())
        }
    }
}

pub async fn serve(listener: TcpListener, config: Arc<ServeConfig>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, config).await {
                warn!("Replay client {} failed: {:#}", peer, e);
            }
            debug!("Replay client {} left", peer);
        });
    }
}

async fn handle_client(stream: TcpStream, config: Arc<ServeConfig>) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut ws_writer, mut ws_reader) = ws.split();

    let files = list_replays(&config.dir).unwrap_or_else(|e| {
        error!("Failed to list {}: {}", config.dir.display(), e);
        Vec::new()
    });
    send_ws(&mut ws_writer, &ReplayResponse::Files(files)).await?;

    let mut player: Option<ReplayPlayer> = None;
    let mut ticker = build_interval(config.tick);

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                let Some(msg) = msg else { break };
                let text = match msg? {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let message = match decode::<ReplayMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Ignoring replay control {:?}: {}", text.as_str(), e);
                        continue;
                    }
                };
                handle_control(message, &config, &mut player, &mut ws_writer).await?;
            }
            _ = ticker.tick(), if player.as_ref().is_some_and(|p| p.is_running() && !p.is_paused()) => {
                let Some(player) = player.as_mut() else { continue };
                if let Some(frame) = player.tick() {
                    send_frame(&mut ws_writer, player, &frame).await?;
                    if player.is_finished() {
                        send_ws(&mut ws_writer, &ReplayResponse::End).await?;
                    }
                }
            }
        }
    }

    let _ = ws_writer.send(Message::Close(None)).await;
    Ok(())
}

async fn handle_control<S>(
    message: ReplayMessage,
    config: &ServeConfig,
    player: &mut Option<ReplayPlayer>,
    ws_writer: &mut S,
) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    match message {
        ReplayMessage::Play(name) => match load(config, &name).await {
            Ok(mut loaded) => {
                loaded.set_paused(true);
                send_ws(ws_writer, &ReplayResponse::Start).await?;
                send_frame(ws_writer, &loaded, &loaded.current()).await?;
                *player = Some(loaded);
            }
            Err(e) => warn!("Cannot play {}: {:#}", name, e),
        },
        ReplayMessage::Pause => {
            if let Some(player) = player.as_mut() {
                let paused = player.toggle_pause();
                debug!("Replay {}", if paused { "paused" } else { "resumed" });
            }
        }
        ReplayMessage::Goto(progress) => {
            if let Some(player) = player.as_mut() {
                let frame = player.seek(progress);
                send_frame(ws_writer, player, &frame).await?;
            }
        }
        ReplayMessage::Speed(speed) => {
            if let Some(player) = player.as_mut() {
                player.set_speed(speed);
            }
        }
    }
    Ok(())
}

/// Only names from the directory listing are served.
async fn load(config: &ServeConfig, name: &str) -> Result<ReplayPlayer> {
    let offered = list_replays(&config.dir)?;
    if !offered.iter().any(|file| file == name) {
        return Err(anyhow!("not a recording in {}", config.dir.display()));
    }
    let path = config.dir.join(name);
    let max_bytes = config.max_bytes;
    let entries = tokio::task::spawn_blocking(move || load_replay(&path, max_bytes)).await??;
    info!("Playing {} ({} entries)", name, entries.len());
    Ok(ReplayPlayer::new(entries)?.with_period(config.tick))
}

async fn send_frame<S>(ws_writer: &mut S, player: &ReplayPlayer, frame: &ReplayFrame) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let response = ReplayResponse::Frame {
        time: format_time(frame.time),
        progress: frame.progress,
        game_state: serde_json::to_string(player.state(frame))?,
    };
    send_ws(ws_writer, &response).await
}

async fn send_ws<S>(ws_writer: &mut S, msg: &ReplayResponse) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let payload = encode(msg)?;
    ws_writer.send(Message::Text(payload.into())).await?;
    Ok(())
}

fn build_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::GameState;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    const LOG: &str = "\
2024-01-01T00:00:00Z, {\"teams\":[],\"trains\":[]}
2024-01-01T00:00:01Z, {\"teams\":[],\"trains\":[{\"id\":1,\"long\":8.4,\"lat\":49.0,\"line_id\":\"L1\",\"line_name\":\"S1\",\"direction\":\"X\"}]}
";

    async fn next_response<S>(ws: &mut S) -> Result<ReplayResponse>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = timeout(Duration::from_secs(5), ws.next())
                .await?
                .ok_or_else(|| anyhow!("connection closed"))??;
            if let Message::Text(text) = msg {
                return Ok(decode(&text)?);
            }
        }
    }

    #[tokio::test]
    async fn test_serves_a_recording_to_the_end() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("game.csv"), LOG)?;
        std::fs::write(dir.path().join("notes.txt"), "not a replay")?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let config = Arc::new(ServeConfig {
            dir: dir.path().to_path_buf(),
            tick: Duration::from_millis(10),
            max_bytes: 1024 * 1024,
        });
        let server = tokio::spawn(serve(listener, config));

        let (ws, _) = connect_async(format!("ws://{addr}/replay")).await?;
        let (mut writer, mut reader) = ws.split();
        assert_eq!(
            next_response(&mut reader).await?,
            ReplayResponse::Files(vec!["game.csv".to_string()])
        );

        // unknown names are ignored
        writer.send(Message::Text(encode(&ReplayMessage::Play("notes.txt".to_string()))?.into())).await?;
        writer.send(Message::Text(encode(&ReplayMessage::Play("game.csv".to_string()))?.into())).await?;
        assert_eq!(next_response(&mut reader).await?, ReplayResponse::Start);
        let ReplayResponse::Frame { time, progress, .. } = next_response(&mut reader).await? else {
            return Err(anyhow!("expected the first frame"));
        };
        assert_eq!(time, "2024-01-01T00:00:00.000Z");
        assert_eq!(progress, 0.0);

        writer.send(Message::Text(encode(&ReplayMessage::Goto(0.5))?.into())).await?;
        let ReplayResponse::Frame { time, .. } = next_response(&mut reader).await? else {
            return Err(anyhow!("expected the frame after goto"));
        };
        assert_eq!(time, "2024-01-01T00:00:00.500Z");

        writer.send(Message::Text(encode(&ReplayMessage::Speed(5.0))?.into())).await?;
        writer.send(Message::Text(encode(&ReplayMessage::Pause)?.into())).await?;
        let mut last = None;
        loop {
            match next_response(&mut reader).await? {
                ReplayResponse::Frame {
                    progress, game_state, ..
                } => last = Some((progress, game_state)),
                ReplayResponse::End => break,
                other => return Err(anyhow!("unexpected {:?}", other)),
            }
        }
        let (progress, game_state) = last.ok_or_else(|| anyhow!("no frames before the end"))?;
        assert_eq!(progress, 1.0);
        let state: GameState = serde_json::from_str(&game_state)?;
        assert_eq!(state.trains[0].line_id, "L1");

        server.abort();
        Ok(())
    }
}

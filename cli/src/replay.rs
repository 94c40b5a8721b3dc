use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use client::{ClientConfig, LocalReplay, RemoteReplay, ReplayView, WsConnector};
use tokio::sync::watch;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

/// Wait this long for the replay service to announce its recordings.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run_local(config: ClientConfig, file: PathBuf, speed: f64, seek: Option<f64>) -> Result<()> {
    let mut replay = LocalReplay::from_config(&config);
    let mut views = replay.subscribe();
    replay.load_file(&file).await?;
    replay.set_speed(speed);
    if let Some(progress) = seek {
        replay.seek(progress);
    }

    follow(&mut views).await;
    replay.stop();
    Ok(())
}

pub async fn run_remote(config: ClientConfig, file: String, speed: Option<f64>) -> Result<()> {
    let (replay, task) = RemoteReplay::spawn(&config, Arc::new(WsConnector))?;
    let mut files = replay.subscribe_files();
    let mut views = replay.subscribe();
    replay.connect();

    let offered = timeout(ANNOUNCE_TIMEOUT, files.wait_for(|files| !files.is_empty()))
        .await
        .map_err(|_| anyhow!("The replay service did not announce any recordings"))?
        .map_err(|_| anyhow!("Replay connection closed"))?
        .clone();
    if !offered.contains(&file) {
        replay.shutdown();
        task.await?;
        return Err(anyhow!("{} is not offered, available: {}", file, offered.join(", ")));
    }

    replay.play(file.clone());
    timeout(ANNOUNCE_TIMEOUT, views.wait_for(|view| view.running))
        .await
        .map_err(|_| anyhow!("The replay service did not start {}", file))??;
    if let Some(speed) = speed {
        replay.set_speed(speed);
    }
    // the service starts paused
    replay.toggle_pause();

    follow(&mut views).await;
    replay.shutdown();
    task.await?;
    Ok(())
}

/// Log the replay until it reaches the end, stops or the user interrupts.
async fn follow(views: &mut watch::Receiver<ReplayView>) {
    let mut last_logged = -1.0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    warn!("Replay closed");
                    return;
                }
                let view = views.borrow_and_update().clone();
                if should_log(&view, last_logged) {
                    last_logged = view.progress;
                    info!("{}", describe(&view));
                }
                if !view.running {
                    warn!("Replay stopped");
                    return;
                }
                if view.paused && view.progress >= 1.0 {
                    info!("Replay finished");
                    return;
                }
            }
        }
    }
}

/// Log every whole percent, plus the end.
fn should_log(view: &ReplayView, last_logged: f64) -> bool {
    view.progress >= 1.0 || (view.progress * 100.0).floor() != (last_logged * 100.0).floor()
}

fn describe(view: &ReplayView) -> String {
    let mut line = format!(
        "{:>5.1}% {} x{}",
        view.progress * 100.0,
        view.time.as_deref().unwrap_or("-"),
        view.speed
    );
    if let Some(state) = &view.game_state {
        let embarked = state.embarked_trains().count();
        line.push_str(&format!(
            " | {} teams, {} trains, {} ridden",
            state.teams.len(),
            state.trains.len(),
            embarked
        ));
    }
    if view.paused {
        line.push_str(" (paused)");
    }
    line
}

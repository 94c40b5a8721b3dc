use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use client::{ApiClient, ClientConfig, GameSession, ReplayRecorder, SessionView, WsConnector};
use common::Stop;
use common::point::Point;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::intent::Intent;

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run(config: ClientConfig, team: u32, record: Option<PathBuf>, stdin_positions: bool) -> Result<()> {
    let api = ApiClient::new(config.clone());
    let stops = match api.stops().await {
        Ok(stops) => stops,
        Err(e) => {
            warn!("Failed to load stops, `stop` commands are unavailable: {:#}", e);
            Vec::new()
        }
    };

    let (session, task) = GameSession::spawn(&config, Arc::new(WsConnector))?;
    info!("Joining team {} via {}", team, session.endpoint());
    session.select_team(team);
    session.connect();

    let (position_tx, position_rx) = mpsc::channel::<Point>(16);
    let forwarder = if stdin_positions {
        session.forward_positions(position_rx)
    } else {
        None
    };

    let recorder = match record {
        Some(path) => Some(tokio::spawn(record_states(
            ReplayRecorder::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
            session.subscribe(),
        ))),
        None => None,
    };
    let status = tokio::spawn(log_status(session.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Intent>() {
                    Ok(Intent::Quit) => break,
                    Ok(Intent::Position(point)) if stdin_positions && forwarder.is_some() => {
                        let _ = position_tx.send(point).await;
                    }
                    Ok(Intent::Position(_)) => warn!("Position sharing is off"),
                    Ok(intent) => handle_intent(&session, &stops, intent),
                    Err(e) => warn!("{}", e),
                }
            }
        }
    }

    drop(position_tx);
    session.shutdown();
    task.await.context("Session task panicked")?;
    if let Some(forwarder) = forwarder {
        let _ = forwarder.await;
    }
    // the recorder finishes once the last view sender is gone
    drop(session);
    status.abort();
    if let Some(recorder) = recorder {
        match recorder.await? {
            Ok(path) => info!("Recording saved to {}", path.display()),
            Err(e) => error!("Recording failed: {:#}", e),
        }
    }
    Ok(())
}

fn handle_intent(session: &GameSession, stops: &[Stop], intent: Intent) {
    let sent = match intent {
        Intent::SelectTeam(team_id) => session.select_team(team_id),
        Intent::Train(train_id) => match session.click_train(&train_id) {
            Some(action) => {
                info!("{:?}", action);
                true
            }
            None => false,
        },
        Intent::Stop(stop_id) => match stops.iter().find(|stop| stop.id == stop_id) {
            Some(stop) => session.click_stop(stop),
            None => {
                warn!("Unknown stop {}", stop_id);
                return;
            }
        },
        Intent::Disembark => session.disembark(),
        Intent::MrXGadget(gadget) => session.use_mr_x_gadget(gadget),
        Intent::DetectiveGadget(gadget) => session.use_detective_gadget(gadget),
        Intent::Message(text) => session.send_message(text),
        Intent::Status => {
            info!("{}", describe(&session.view()));
            return;
        }
        Intent::Position(_) | Intent::Quit => return,
    };
    if !sent {
        warn!("Not sent, the session is {:?}", session.phase());
    }
}

/// Append every snapshot the session receives to the recording.
async fn record_states(mut recorder: ReplayRecorder, mut views: watch::Receiver<SessionView>) -> Result<PathBuf> {
    let mut last = None;
    while views.changed().await.is_ok() {
        let state = views.borrow_and_update().game_state.clone();
        if let Some(state) = state {
            if last.as_ref() != Some(&state) {
                recorder.record(&state)?;
                last = Some(state);
            }
        }
    }
    info!("Recorded {} game states", recorder.entries());
    recorder.finish()
}

async fn log_status(mut views: watch::Receiver<SessionView>) {
    let mut interval = tokio::time::interval(STATUS_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = String::new();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !last.is_empty() {
                    info!("Status: {}", last);
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                last = describe(&views.borrow_and_update());
            }
        }
    }
}

fn describe(view: &SessionView) -> String {
    let mut status = format!("{:?}", view.phase);
    if let Some(state) = &view.game_state {
        status.push_str(&format!(", {} teams, {} trains", state.teams.len(), state.trains.len()));
    }
    if let Some(train) = &view.embarked_train {
        status.push_str(&format!(", riding {}", train));
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::SessionPhase;
    use common::GameState;

    #[test]
    fn test_describe() {
        let mut view = SessionView::default();
        assert_eq!(describe(&view), "Disconnected");

        view.phase = SessionPhase::Joined { team_id: 2 };
        view.game_state = Some(GameState::default());
        view.embarked_train = Some("L1".to_string());
        assert_eq!(describe(&view), "Joined { team_id: 2 }, 0 teams, 0 trains, riding L1");
    }
}

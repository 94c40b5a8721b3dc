use std::sync::Arc;

use common::{GameState, ReplayMessage, ReplayResponse, ReplayResponseTag};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::ReplayView;
use crate::ClientConfig;
use crate::connection::{Connection, ConnectionHandle, Connector, EventKind, MetaEvent};

/// A replay whose clock runs on the replay service. This side only forwards
/// controls and republishes the frames it receives.
pub struct RemoteReplay {
    connection: ConnectionHandle<ReplayMessage>,
    endpoint: Url,
    view: Arc<watch::Sender<ReplayView>>,
    files: watch::Receiver<Vec<String>>,
}

impl RemoteReplay {
    /// Spawn the replay connection. Call [`RemoteReplay::connect`] to open it.
    pub fn spawn(config: &ClientConfig, connector: Arc<dyn Connector>) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let endpoint = config.replay_url()?;
        let (view, _) = watch::channel(ReplayView::default());
        let view = Arc::new(view);
        let (files_tx, files) = watch::channel(Vec::new());

        let mut connection = Connection::new(connector).with_connect_timeout(config.connect_timeout);
        install_handlers(&mut connection, Arc::clone(&view), files_tx, config.replay_speed);
        let (connection, task) = connection.spawn();

        let replay = Self {
            connection,
            endpoint,
            view,
            files,
        };
        Ok((replay, task))
    }

    pub fn connect(&self) -> bool {
        self.connection.connect(self.endpoint.clone())
    }

    pub fn disconnect(&self) -> bool {
        self.connection.disconnect()
    }

    pub fn shutdown(&self) -> bool {
        self.connection.shutdown()
    }

    pub fn view(&self) -> ReplayView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReplayView> {
        self.view.subscribe()
    }

    /// Recordings the service offers, as last announced.
    pub fn files(&self) -> Vec<String> {
        self.files.borrow().clone()
    }

    pub fn subscribe_files(&self) -> watch::Receiver<Vec<String>> {
        self.files.clone()
    }

    pub fn play(&self, file_name: impl Into<String>) -> bool {
        self.connection.send(ReplayMessage::Play(file_name.into()))
    }

    pub fn toggle_pause(&self) -> bool {
        self.view.send_modify(|view| view.paused = !view.paused);
        self.connection.send(ReplayMessage::Pause)
    }

    /// Moves the local scrub position right away; the server's next frame confirms it.
    pub fn seek(&self, progress: f64) -> bool {
        let shown = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.view.send_modify(|view| view.progress = shown);
        self.connection.send(ReplayMessage::Goto(progress))
    }

    pub fn set_speed(&self, speed: f64) -> bool {
        self.view.send_modify(|view| view.speed = speed);
        self.connection.send(ReplayMessage::Speed(speed))
    }
}

fn install_handlers(
    connection: &mut Connection<ReplayResponse, ReplayMessage>,
    view: Arc<watch::Sender<ReplayView>>,
    files: watch::Sender<Vec<String>>,
    default_speed: f64,
) {
    let start_view = Arc::clone(&view);
    connection.register(ReplayResponseTag::Start, move |_, outbox| {
        info!("Replay started, resetting speed to {}", default_speed);
        start_view.send_modify(|view| {
            *view = ReplayView {
                running: true,
                paused: true,
                speed: default_speed,
                ..ReplayView::default()
            }
        });
        outbox.send(ReplayMessage::Speed(default_speed));
    });

    let frame_view = Arc::clone(&view);
    connection.register(ReplayResponseTag::Frame, move |message, _| {
        let ReplayResponse::Frame {
            time,
            progress,
            game_state,
        } = message
        else {
            return;
        };
        // the snapshot travels as a JSON string inside the JSON frame
        let state: GameState = match serde_json::from_str(&game_state) {
            Ok(state) => state,
            Err(e) => {
                warn!("Dropping replay frame at {} with undecodable game state: {}", time, e);
                return;
            }
        };
        frame_view.send_modify(|view| {
            view.running = true;
            view.time = Some(time);
            view.progress = progress.clamp(0.0, 1.0);
            view.game_state = Some(state);
        });
    });

    connection.register(ReplayResponseTag::Files, move |message, _| {
        if let ReplayResponse::Files(names) = message {
            debug!("Replay service offers {} files", names.len());
            files.send_replace(names);
        }
    });

    let end_view = Arc::clone(&view);
    connection.register(ReplayResponseTag::End, move |_, _| {
        info!("Replay ended");
        end_view.send_modify(|view| view.paused = true);
    });

    connection.register_event(EventKind::Disconnect, move |event, _| {
        if let MetaEvent::Disconnect { local } = event {
            debug!("Replay connection closed (local: {})", local);
        }
        view.send_modify(|view| view.running = false);
    });
}

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::reader::check_size;
use super::{ReplayEntry, ReplayError, ReplayPlayer, ReplayView, load_replay, parse_replay_with_limit};
use crate::ClientConfig;

#[derive(Debug)]
enum Control {
    TogglePause,
    Seek(f64),
    Speed(f64),
}

/// Plays a replay log on a local ticker and publishes a [`ReplayView`] after
/// every change.
///
/// The ticker task is aborted on [`LocalReplay::stop`], on loading another
/// log, and when the replay is dropped. A ticker that is mid-tick when that
/// happens can no longer publish.
pub struct LocalReplay {
    period: Duration,
    max_bytes: u64,
    view: Arc<watch::Sender<ReplayView>>,
    generation: Arc<AtomicU64>,
    controls: Option<mpsc::UnboundedSender<Control>>,
    ticker: Option<JoinHandle<()>>,
}

/// Publishes views for one ticker, as long as no newer replay or stop happened.
struct Publisher {
    view: Arc<watch::Sender<ReplayView>>,
    generation: Arc<AtomicU64>,
    mine: u64,
}

impl Publisher {
    /// The generation is checked under the channel's write lock, so a stale
    /// view either lands before the reset that retired it or not at all.
    fn publish(&self, next: ReplayView) -> bool {
        self.view.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != self.mine {
                return false;
            }
            *current = next;
            true
        })
    }
}

impl LocalReplay {
    pub fn new(period: Duration, max_bytes: u64) -> Self {
        let (view, _) = watch::channel(ReplayView::default());
        Self {
            period,
            max_bytes,
            view: Arc::new(view),
            generation: Arc::new(AtomicU64::new(0)),
            controls: None,
            ticker: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.replay_tick, config.max_replay_bytes)
    }

    pub fn subscribe(&self) -> watch::Receiver<ReplayView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> ReplayView {
        self.view.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(|ticker| !ticker.is_finished())
    }

    /// Load a log from disk and start playing it.
    ///
    /// An oversized file is rejected without touching the current replay. Any
    /// other failure stops and resets it.
    pub async fn load_file(&mut self, path: &Path) -> Result<(), ReplayError> {
        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => return self.start_with(Err(e.into())),
        };
        check_size(size, self.max_bytes)?;

        info!("Loading replay {:?}", path);
        let owned = path.to_path_buf();
        let max_bytes = self.max_bytes;
        let loaded = tokio::task::spawn_blocking(move || load_replay(&owned, max_bytes))
            .await
            .map_err(|e| ReplayError::Io(std::io::Error::other(e)))
            .and_then(|result| result);
        self.start_with(loaded)
    }

    /// Parse `text` as a log and start playing it. Same failure rules as [`LocalReplay::load_file`].
    pub fn load_text(&mut self, text: &str) -> Result<(), ReplayError> {
        check_size(text.len() as u64, self.max_bytes)?;
        self.start_with(parse_replay_with_limit(text, self.max_bytes))
    }

    fn start_with(&mut self, loaded: Result<Vec<ReplayEntry>, ReplayError>) -> Result<(), ReplayError> {
        let player = match loaded.and_then(ReplayPlayer::new) {
            Ok(player) => player,
            Err(e) => {
                error!("Failed to load replay: {}", e);
                self.stop();
                return Err(e);
            }
        };
        self.start(player.with_period(self.period));
        Ok(())
    }

    /// Replace whatever is playing with `player` and start ticking.
    pub fn start(&mut self, player: ReplayPlayer) {
        self.abort_ticker();
        info!(
            "Starting replay of {} entries spanning {}s",
            player.entries().len(),
            player.duration().num_seconds()
        );
        self.view.send_replace(player.view());

        let (controls, receiver) = mpsc::unbounded_channel();
        self.controls = Some(controls);
        let publisher = Publisher {
            view: Arc::clone(&self.view),
            generation: Arc::clone(&self.generation),
            mine: self.generation.load(Ordering::SeqCst),
        };
        self.ticker = Some(tokio::spawn(run_ticker(player, self.period, receiver, publisher)));
    }

    /// Returns false when nothing is playing.
    pub fn toggle_pause(&self) -> bool {
        self.control(Control::TogglePause)
    }

    /// Jump to `progress` in `[0, 1]`. The frame there is published right away.
    pub fn seek(&self, progress: f64) -> bool {
        self.control(Control::Seek(progress))
    }

    pub fn set_speed(&self, speed: f64) -> bool {
        self.control(Control::Speed(speed))
    }

    /// Stop the ticker and reset the view.
    pub fn stop(&mut self) {
        self.abort_ticker();
        self.view.send_replace(ReplayView::default());
    }

    fn control(&self, control: Control) -> bool {
        match &self.controls {
            Some(controls) => controls.send(control).is_ok(),
            None => {
                debug!("No replay loaded, ignoring {:?}", control);
                false
            }
        }
    }

    fn abort_ticker(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.controls = None;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for LocalReplay {
    fn drop(&mut self) {
        self.abort_ticker();
    }
}

async fn run_ticker(
    mut player: ReplayPlayer,
    period: Duration,
    mut controls: mpsc::UnboundedReceiver<Control>,
    publisher: Publisher,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if player.tick().is_some() {
                    if !publisher.publish(player.view()) {
                        break;
                    }
                    if player.is_paused() && player.is_finished() {
                        info!("Replay reached the end");
                    }
                }
            }
            control = controls.recv() => {
                let Some(control) = control else { break };
                match control {
                    Control::TogglePause => {
                        let paused = player.toggle_pause();
                        debug!("Replay {}", if paused { "paused" } else { "resumed" });
                    }
                    Control::Seek(progress) => {
                        player.seek(progress);
                    }
                    Control::Speed(speed) => {
                        player.set_speed(speed);
                        debug!("Replay speed set to {} ({}ms per tick)", speed, player.frame_time().num_milliseconds());
                    }
                }
                if !publisher.publish(player.view()) {
                    break;
                }
            }
        }
    }
}

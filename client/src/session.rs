//! The live game session: keeps the latest server snapshot, re-joins the
//! selected team after reconnects and turns user intents into protocol
//! messages.
//!
//! Embark/disembark decisions are derived from the last snapshot received.
//! Two clicks before the server confirms the first may therefore send
//! conflicting commands; the server is authoritative and ignores invalid ones.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::point::Point;
use common::{ClientMessage, DetectiveGadget, GameState, MrXGadget, ServerMessage, ServerMessageTag, Stop};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::ClientConfig;
use crate::connection::{Connection, ConnectionHandle, Connector, EventKind, MetaEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    /// The connection dropped and a reconnect is scheduled.
    Reconnecting,
    Connected,
    Joined { team_id: u32 },
}

impl SessionPhase {
    pub fn is_connected(self) -> bool {
        matches!(self, SessionPhase::Connected | SessionPhase::Joined { .. })
    }
}

/// Everything presentation needs to draw the live game.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub phase: SessionPhase,
    /// The selected team, kept across reconnects.
    pub team: Option<u32>,
    pub game_state: Option<GameState>,
    /// Line id of the train the selected team rides.
    pub embarked_train: Option<String>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            team: None,
            game_state: None,
            embarked_train: None,
        }
    }
}

impl SessionView {
    fn derive_embarked(&mut self) {
        self.embarked_train = match (self.team, &self.game_state) {
            (Some(team_id), Some(state)) => state.team_state(team_id).and_then(|team| team.on_train.clone()),
            _ => None,
        };
    }
}

/// What clicking a train did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainAction {
    Embark { train_id: String },
    Disembark,
}

impl From<TrainAction> for ClientMessage {
    fn from(action: TrainAction) -> Self {
        match action {
            TrainAction::Embark { train_id } => ClientMessage::EmbarkTrain { train_id },
            TrainAction::Disembark => ClientMessage::DisembarkTrain,
        }
    }
}

/// A handle on one live game connection. Clones share the same session.
#[derive(Clone)]
pub struct GameSession {
    connection: ConnectionHandle<ClientMessage>,
    endpoint: Url,
    secure: bool,
    view: Arc<watch::Sender<SessionView>>,
}

impl GameSession {
    /// Spawn the connection task for a session against the configured game server.
    pub fn spawn(config: &ClientConfig, connector: Arc<dyn Connector>) -> Result<(Self, JoinHandle<()>)> {
        let endpoint = config.ws_url()?;
        let (view, _) = watch::channel(SessionView::default());
        let view = Arc::new(view);

        let mut connection = Connection::new(connector).with_connect_timeout(config.connect_timeout);
        install_handlers(&mut connection, Arc::clone(&view), config.reconnect_delay);
        let (connection, task) = connection.spawn();

        let session = Self {
            connection,
            endpoint,
            secure: config.secure,
            view,
        };
        Ok((session, task))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn connect(&self) -> bool {
        info!("Connecting game session to {}", self.endpoint);
        self.connection.connect(self.endpoint.clone())
    }

    pub fn disconnect(&self) -> bool {
        self.connection.disconnect()
    }

    /// Close the connection and end its task.
    pub fn shutdown(&self) -> bool {
        self.connection.shutdown()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.view.borrow().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase().is_connected()
    }

    /// Remember `team_id` and join it now if connected. Returns whether `JoinTeam` was sent.
    pub fn select_team(&self, team_id: u32) -> bool {
        let mut joined = false;
        self.view.send_modify(|view| {
            view.team = Some(team_id);
            view.derive_embarked();
            if view.phase.is_connected() {
                view.phase = SessionPhase::Joined { team_id };
                joined = true;
            }
        });
        if !joined {
            debug!("Not connected, team {} will be joined on connect", team_id);
            return false;
        }
        info!("Joining team {}", team_id);
        self.connection.send(ClientMessage::JoinTeam { team_id })
    }

    /// Embark on `train_id`, or disembark if the selected team already rides it.
    ///
    /// Returns the action sent, or `None` while not connected.
    pub fn click_train(&self, train_id: &str) -> Option<TrainAction> {
        let action = {
            let view = self.view.borrow();
            if !view.phase.is_connected() {
                debug!("Not connected, ignoring click on train {}", train_id);
                return None;
            }
            if view.embarked_train.as_deref() == Some(train_id) {
                TrainAction::Disembark
            } else {
                TrainAction::Embark {
                    train_id: train_id.to_string(),
                }
            }
        };
        self.forward(action.clone().into()).then_some(action)
    }

    /// Move the selected team to `stop`, leaving its train first if it rides one.
    pub fn click_stop(&self, stop: &Stop) -> bool {
        let (embarked, team_id, distance) = {
            let view = self.view.borrow();
            if !view.phase.is_connected() {
                debug!("Not connected, ignoring click on stop {}", stop.name);
                return false;
            }
            let distance = view
                .team
                .zip(view.game_state.as_ref())
                .and_then(|(team_id, state)| state.team_state(team_id))
                .map(|team| Point::from(team).distance(Point::from(stop)));
            (view.embarked_train.is_some(), view.team, distance)
        };
        if let Some(distance) = distance {
            debug!("Moving to stop {} ({:.0}m away)", stop.name, distance);
        }
        if embarked && !self.forward(ClientMessage::DisembarkTrain) {
            return false;
        }
        self.forward(ClientMessage::SetTeamPosition {
            lat: stop.lat,
            long: stop.lon,
            team_id,
        })
    }

    pub fn embark(&self, train_id: &str) -> bool {
        self.forward(ClientMessage::EmbarkTrain {
            train_id: train_id.to_string(),
        })
    }

    pub fn disembark(&self) -> bool {
        self.forward(ClientMessage::DisembarkTrain)
    }

    pub fn update_position(&self, lat: f64, long: f64) -> bool {
        self.forward(ClientMessage::Position { lat, long })
    }

    pub fn use_mr_x_gadget(&self, gadget: MrXGadget) -> bool {
        self.forward(ClientMessage::MrXGadget(gadget))
    }

    pub fn use_detective_gadget(&self, gadget: DetectiveGadget) -> bool {
        self.forward(ClientMessage::DetectiveGadget(gadget))
    }

    pub fn send_message(&self, text: impl Into<String>) -> bool {
        self.forward(ClientMessage::Message(text.into()))
    }

    /// Forward every fix from `positions` as a `Position` message until the
    /// channel closes. Position sharing needs a secure context; otherwise
    /// nothing is spawned.
    pub fn forward_positions(&self, mut positions: mpsc::Receiver<Point>) -> Option<JoinHandle<()>> {
        if !self.secure {
            warn!("Not a secure context, position updates are disabled");
            return None;
        }
        let session = self.clone();
        Some(tokio::spawn(async move {
            while let Some(point) = positions.recv().await {
                session.update_position(point.lat, point.long);
            }
            debug!("Position source closed");
        }))
    }

    fn forward(&self, message: ClientMessage) -> bool {
        if !self.is_connected() {
            debug!("Not connected, suppressing {:?}", message);
            return false;
        }
        self.connection.send(message)
    }
}

fn install_handlers(
    connection: &mut Connection<ServerMessage, ClientMessage>,
    view: Arc<watch::Sender<SessionView>>,
    reconnect_delay: Duration,
) {
    let state_view = Arc::clone(&view);
    connection.register(ServerMessageTag::GameState, move |message, _| {
        let ServerMessage::GameState(state) = message;
        state_view.send_modify(|view| {
            view.game_state = Some(state);
            view.derive_embarked();
        });
    });

    let connect_view = Arc::clone(&view);
    connection.register_event(EventKind::Connect, move |_, outbox| {
        connect_view.send_modify(|view| match view.team {
            Some(team_id) => {
                info!("Connected, rejoining team {}", team_id);
                outbox.send(ClientMessage::JoinTeam { team_id });
                view.phase = SessionPhase::Joined { team_id };
            }
            None => {
                info!("Connected");
                view.phase = SessionPhase::Connected;
            }
        });
    });

    let error_view = Arc::clone(&view);
    connection.register_event(EventKind::Error, move |event, outbox| {
        let MetaEvent::Error(error) = event else { return };
        if !error.is_transport() {
            debug!("Ignoring non-transport error: {}", error);
            return;
        }
        warn!("Connection error, reconnecting in {:?}: {}", reconnect_delay, error);
        error_view.send_modify(|view| view.phase = SessionPhase::Reconnecting);
        outbox.schedule_reconnect(reconnect_delay);
    });

    connection.register_event(EventKind::Disconnect, move |event, outbox| {
        let MetaEvent::Disconnect { local } = event else { return };
        if *local {
            info!("Disconnected");
            view.send_modify(|view| view.phase = SessionPhase::Disconnected);
        } else {
            warn!("Connection lost, reconnecting in {:?}", reconnect_delay);
            view.send_modify(|view| view.phase = SessionPhase::Reconnecting);
            outbox.schedule_reconnect(reconnect_delay);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnector;
    use common::encode;

    fn config() -> ClientConfig {
        ClientConfig {
            dev: true,
            reconnect_delay: Duration::from_millis(20),
            ..ClientConfig::default()
        }
    }

    fn snapshot(on_train: Option<&str>) -> String {
        let on_train = match on_train {
            Some(id) => format!("\"{id}\""),
            None => "null".to_string(),
        };
        format!(
            r##"{{"GameState":{{"teams":[{{"team":{{"id":1,"name":"Detectives","color":"#00f","kind":"Detective"}},"long":8.4,"lat":49.0,"on_train":{on_train}}}],"trains":[{{"id":1,"long":8.4,"lat":49.0,"line_id":"L1","line_name":"S1","direction":"X"}},{{"id":2,"long":8.5,"lat":49.1,"line_id":"L2","line_name":"S2","direction":"Y"}}]}}}}"##
        )
    }

    async fn wait_for(session: &GameSession, predicate: impl FnMut(&SessionView) -> bool) {
        let mut rx = session.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for session view")
            .expect("session view closed");
    }

    fn stop() -> Stop {
        Stop {
            name: "Marktplatz".to_string(),
            id: "de:08212:1".to_string(),
            lat: 49.0094,
            lon: 8.4044,
        }
    }

    #[tokio::test]
    async fn test_intents_are_suppressed_while_disconnected() {
        let (connector, _frames) = MockConnector::new();
        let (session, task) = GameSession::spawn(&config(), Arc::new(connector.clone())).unwrap();

        assert_eq!(session.click_train("L1"), None);
        assert!(!session.embark("L1"));
        assert!(!session.disembark());
        assert!(!session.update_position(49.0, 8.4));
        assert!(!session.click_stop(&stop()));
        assert!(!session.select_team(1));

        session.shutdown();
        task.await.unwrap();
        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn test_connect_joins_selected_team() {
        let (connector, _frames) = MockConnector::new();
        let (session, task) = GameSession::spawn(&config(), Arc::new(connector.clone())).unwrap();
        session.select_team(7);
        session.connect();
        wait_for(&session, |view| view.phase == SessionPhase::Joined { team_id: 7 }).await;

        assert_eq!(connector.wait_for_sent(1).await, vec![r#"{"JoinTeam":{"team_id":7}}"#]);
        session.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_train_click_toggles_embark() {
        let (connector, frames) = MockConnector::new();
        let (session, task) = GameSession::spawn(&config(), Arc::new(connector.clone())).unwrap();
        session.connect();
        wait_for(&session, |view| view.phase == SessionPhase::Connected).await;
        session.select_team(1);

        frames.send(Some(snapshot(Some("L1")))).unwrap();
        wait_for(&session, |view| view.embarked_train.as_deref() == Some("L1")).await;

        assert_eq!(session.click_train("L1"), Some(TrainAction::Disembark));
        assert_eq!(
            session.click_train("L2"),
            Some(TrainAction::Embark {
                train_id: "L2".to_string()
            })
        );

        let sent = connector.wait_for_sent(3).await;
        assert_eq!(
            sent,
            vec![
                r#"{"JoinTeam":{"team_id":1}}"#.to_string(),
                encode(&ClientMessage::DisembarkTrain).unwrap(),
                encode(&ClientMessage::EmbarkTrain {
                    train_id: "L2".to_string()
                })
                .unwrap(),
            ]
        );

        session.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_click_disembarks_first() {
        let (connector, frames) = MockConnector::new();
        let (session, task) = GameSession::spawn(&config(), Arc::new(connector.clone())).unwrap();
        session.select_team(1);
        session.connect();
        frames.send(Some(snapshot(Some("L2")))).unwrap();
        wait_for(&session, |view| view.embarked_train.is_some()).await;

        assert!(session.click_stop(&stop()));
        let sent = connector.wait_for_sent(3).await;
        assert_eq!(
            &sent[1..],
            &[
                r#""DisembarkTrain""#.to_string(),
                r#"{"SetTeamPosition":{"lat":49.0094,"long":8.4044,"team_id":1}}"#.to_string(),
            ]
        );

        session.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_close_reconnects_and_rejoins() {
        let (connector, frames) = MockConnector::new();
        let config = ClientConfig {
            reconnect_delay: Duration::from_millis(300),
            ..config()
        };
        let (session, task) = GameSession::spawn(&config, Arc::new(connector.clone())).unwrap();
        session.select_team(3);
        session.connect();
        wait_for(&session, |view| view.phase.is_connected()).await;

        frames.send(None).unwrap();
        wait_for(&session, |view| view.phase == SessionPhase::Reconnecting).await;
        assert!(!session.disembark());

        wait_for(&session, |view| view.phase == SessionPhase::Joined { team_id: 3 }).await;
        assert_eq!(connector.attempts(), 2);
        let sent = connector.wait_for_sent(2).await;
        assert_eq!(sent, vec![r#"{"JoinTeam":{"team_id":3}}"#; 2]);

        session.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection_is_retried() {
        let (connector, _frames) = MockConnector::new();
        connector.refuse(true);
        let (session, task) = GameSession::spawn(&config(), Arc::new(connector.clone())).unwrap();
        session.connect();
        wait_for(&session, |view| view.phase == SessionPhase::Reconnecting).await;

        connector.refuse(false);
        wait_for(&session, |view| view.phase == SessionPhase::Connected).await;
        assert!(connector.attempts() >= 2);

        session.disconnect();
        wait_for(&session, |view| view.phase == SessionPhase::Disconnected).await;
        session.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_while_reconnecting_settles() {
        let (connector, _frames) = MockConnector::new();
        connector.refuse(true);
        let config = ClientConfig {
            reconnect_delay: Duration::from_secs(5),
            ..config()
        };
        let (session, task) = GameSession::spawn(&config, Arc::new(connector.clone())).unwrap();
        session.connect();
        wait_for(&session, |view| view.phase == SessionPhase::Reconnecting).await;

        session.disconnect();
        wait_for(&session, |view| view.phase == SessionPhase::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.phase(), SessionPhase::Disconnected);
        assert_eq!(connector.attempts(), 1);

        session.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_positions_need_a_secure_context() {
        let (connector, _frames) = MockConnector::new();
        let insecure = ClientConfig {
            secure: false,
            ..config()
        };
        let (session, task) = GameSession::spawn(&insecure, Arc::new(connector.clone())).unwrap();
        let (_tx, rx) = mpsc::channel(4);
        assert!(session.forward_positions(rx).is_none());
        session.shutdown();
        task.await.unwrap();

        let (connector, _frames) = MockConnector::new();
        let (session, task) = GameSession::spawn(&config(), Arc::new(connector.clone())).unwrap();
        session.connect();
        wait_for(&session, |view| view.phase.is_connected()).await;
        let (tx, rx) = mpsc::channel(4);
        let forwarder = session.forward_positions(rx).unwrap();
        tx.send(Point::new(49.0, 8.4)).await.unwrap();
        drop(tx);
        forwarder.await.unwrap();

        assert_eq!(
            connector.wait_for_sent(1).await,
            vec![r#"{"Position":{"lat":49.0,"long":8.4}}"#]
        );
        session.shutdown();
        task.await.unwrap();
    }
}

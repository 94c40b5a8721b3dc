//! The connection manager: one duplex connection, per-tag dispatch of
//! inbound frames, typed sends, and caller-driven reconnects.
//!
//! Failures never surface as `Err` from the public API. Transport and decode
//! problems become [`MetaEvent::Error`] / [`MetaEvent::Disconnect`] callbacks
//! and the registered handlers decide what to do (usually schedule a reconnect).

mod handlers;
#[cfg(test)]
pub(crate) mod mock;
mod transport;

pub use handlers::*;
pub use transport::*;

use std::sync::Arc;
use std::time::Duration;

use common::{Tagged, decode_value, encode, frame_key, parse_frame};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("unknown message tag `{0}`")]
    UnknownTag(String),
    #[error("no endpoint to reconnect to")]
    NoEndpoint,
}

impl ConnectionError {
    /// Network level failures, the ones worth reconnecting for.
    pub fn is_transport(&self) -> bool {
        matches!(self, ConnectionError::Transport(_) | ConnectionError::Timeout(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
    Error,
}

/// Requests a [`ConnectionHandle`] forwards to the connection task.
#[derive(Debug)]
pub enum Command<S> {
    Connect(Url),
    Reconnect { force: bool },
    Send(S),
    Disconnect,
    Shutdown,
}

/// Owns at most one transport at a time.
///
/// `R` is the inbound message family, `S` the outbound one.
pub struct Connection<R: Tagged, S: Tagged> {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    endpoint: Option<Url>,
    transport: Option<Box<dyn Transport>>,
    state: watch::Sender<ConnectionState>,
    handlers: HandlerTable<R, S>,
    events: EventTable<S>,
    reconnect_at: Option<Instant>,
}

impl<R: Tagged, S: Tagged> Connection<R, S> {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            connector,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            endpoint: None,
            transport: None,
            state,
            handlers: HandlerTable::default(),
            events: EventTable::default(),
            reconnect_at: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the handler for one inbound tag, replacing any earlier one.
    pub fn register<F>(&mut self, tag: R::Tag, handler: F) -> &mut Self
    where
        F: FnMut(R, &mut Outbox<S>) + Send + 'static,
    {
        self.handlers.insert(tag, Box::new(handler));
        self
    }

    /// Set the handler for one meta-event kind, replacing any earlier one.
    pub fn register_event<F>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: FnMut(&MetaEvent, &mut Outbox<S>) + Send + 'static,
    {
        self.events.insert(kind, Box::new(handler));
        self
    }

    pub fn has_handler(&self, tag: R::Tag) -> bool {
        self.handlers.contains(tag)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && self.transport.is_some()
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_at.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open a transport to `endpoint`, closing the current one first.
    pub async fn connect(&mut self, endpoint: Url) {
        self.close_transport().await;
        self.reconnect_at = None;
        self.endpoint = Some(endpoint.clone());
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", endpoint);

        let result = match tokio::time::timeout(self.connect_timeout, self.connector.connect(&endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(self.connect_timeout)),
        };

        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.set_state(ConnectionState::Open);
                info!("Established connection to {}", endpoint);
                let outbox = self.events.emit(&MetaEvent::Connect);
                self.flush(outbox).await;
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", endpoint, e);
                self.set_state(ConnectionState::Error);
                let outbox = self.events.emit(&MetaEvent::Error(e));
                self.absorb(outbox);
            }
        }
    }

    /// Reconnect to the last endpoint. Does nothing while open unless `force` is set.
    pub async fn reconnect(&mut self, force: bool) {
        if !force && self.is_open() {
            debug!("Connection already open, skipping reconnect");
            return;
        }
        let Some(endpoint) = self.endpoint.clone() else {
            warn!("Reconnect requested before any endpoint was used");
            let outbox = self.events.emit(&MetaEvent::Error(ConnectionError::NoEndpoint));
            self.absorb(outbox);
            return;
        };
        info!("Reconnecting to {}", endpoint);
        self.connect(endpoint).await;
    }

    /// Write `message` if the connection is open. Otherwise it is dropped, there is no queue.
    pub async fn send(&mut self, message: S) {
        let key = S::tag_key(message.tag());
        if self.state() != ConnectionState::Open {
            debug!("Connection not open, dropping {}", key);
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            debug!("No transport, dropping {}", key);
            return;
        };
        let text = match encode(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = transport.send(text).await {
            error!("Failed to send {}: {}", key, e);
            self.fail(e);
        }
    }

    /// Close the transport and forget any scheduled reconnect.
    ///
    /// `Disconnect { local: true }` fires whenever this ends a live or
    /// recovering connection, even if the transport is already gone.
    pub async fn disconnect(&mut self) {
        let recovering = self.reconnect_at.take().is_some();
        if self.transport.is_some() {
            self.close_transport().await;
        } else if recovering || self.state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Closed);
            info!("Closed connection");
            let outbox = self.events.emit(&MetaEvent::Disconnect { local: true });
            self.absorb(outbox);
        }
        self.reconnect_at = None;
    }

    /// Decode one inbound text frame and run the handler registered for its tag.
    ///
    /// Returns the work the handler (or an `Error` event handler) queued.
    pub fn dispatch(&mut self, text: &str) -> Outbox<S> {
        let value = match parse_frame(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return self.events.emit(&MetaEvent::Error(ConnectionError::Decode(e.to_string())));
            }
        };

        let tag = match frame_key(&value) {
            Ok(key) => match R::tag_from_key(key) {
                Some(tag) => tag,
                None => {
                    warn!("Dropping frame with unknown tag `{}`", key);
                    let error = ConnectionError::UnknownTag(key.to_string());
                    return self.events.emit(&MetaEvent::Error(error));
                }
            },
            Err(e) => {
                warn!("Dropping frame without a tag: {}", e);
                return self.events.emit(&MetaEvent::Error(ConnectionError::Decode(e.to_string())));
            }
        };

        let Some(handler) = self.handlers.get_mut(tag) else {
            warn!("No handler registered for {}, dropping frame", R::tag_key(tag));
            return Outbox::new();
        };

        match decode_value::<R>(value) {
            Ok(message) => {
                let mut outbox = Outbox::new();
                handler(message, &mut outbox);
                outbox
            }
            Err(e) => {
                warn!("Dropping malformed {} frame: {}", R::tag_key(tag), e);
                self.events.emit(&MetaEvent::Error(ConnectionError::Decode(e.to_string())))
            }
        }
    }

    /// Move the manager onto its own task.
    pub fn spawn(self) -> (ConnectionHandle<S>, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(commands, self.subscribe());
        let task = tokio::spawn(self.run(receiver));
        (handle, task)
    }

    /// Serve commands, inbound frames and the reconnect timer one at a time
    /// until shut down or every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<S>>) {
        debug!("Connection loop started");
        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect(endpoint)) => self.connect(endpoint).await,
                    Some(Command::Reconnect { force }) => self.reconnect(force).await,
                    Some(Command::Send(message)) => self.send(message).await,
                    Some(Command::Disconnect) => self.disconnect().await,
                    Some(Command::Shutdown) | None => {
                        self.disconnect().await;
                        break;
                    }
                },
                frame = next_frame(&mut self.transport) => match frame {
                    Some(Ok(text)) => {
                        let outbox = self.dispatch(&text);
                        self.flush(outbox).await;
                    }
                    Some(Err(e)) => {
                        error!("Connection lost: {}", e);
                        self.fail(e);
                    }
                    None => {
                        info!("Connection closed by peer");
                        self.transport = None;
                        self.set_state(ConnectionState::Closed);
                        let outbox = self.events.emit(&MetaEvent::Disconnect { local: false });
                        self.absorb(outbox);
                    }
                },
                _ = wait_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.reconnect(false).await;
                }
            }
        }
        debug!("Connection loop exited");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        debug!("Reconnect scheduled in {:?}", delay);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn flush(&mut self, outbox: Outbox<S>) {
        let (messages, reconnect_after) = outbox.into_parts();
        if let Some(delay) = reconnect_after {
            self.schedule_reconnect(delay);
        }
        for message in messages {
            self.send(message).await;
        }
    }

    /// Apply an outbox produced while the connection is down: only the
    /// reconnect request survives.
    fn absorb(&mut self, outbox: Outbox<S>) {
        let (messages, reconnect_after) = outbox.into_parts();
        if let Some(delay) = reconnect_after {
            self.schedule_reconnect(delay);
        }
        for message in messages {
            debug!("Connection down, dropping {}", S::tag_key(message.tag()));
        }
    }

    /// Abnormal close: drop the transport without a close handshake.
    fn fail(&mut self, error: ConnectionError) {
        self.transport = None;
        self.set_state(ConnectionState::Error);
        let outbox = self.events.emit(&MetaEvent::Error(error));
        self.absorb(outbox);
        let outbox = self.events.emit(&MetaEvent::Disconnect { local: false });
        self.absorb(outbox);
    }

    async fn close_transport(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        self.set_state(ConnectionState::Closing);
        if let Err(e) = transport.close().await {
            debug!("Error while closing transport: {}", e);
        }
        self.set_state(ConnectionState::Closed);
        info!("Closed connection");
        let outbox = self.events.emit(&MetaEvent::Disconnect { local: true });
        self.absorb(outbox);
    }
}

async fn next_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<Result<String, ConnectionError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cheap, cloneable access to a spawned [`Connection`].
///
/// Every method returns `false` once the connection task has ended.
pub struct ConnectionHandle<S> {
    commands: mpsc::UnboundedSender<Command<S>>,
    state: watch::Receiver<ConnectionState>,
}

impl<S> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S> ConnectionHandle<S> {
    pub fn new(commands: mpsc::UnboundedSender<Command<S>>, state: watch::Receiver<ConnectionState>) -> Self {
        Self { commands, state }
    }

    /// A handle with no connection task behind it, for driving commands by hand.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Command<S>>, watch::Sender<ConnectionState>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        (Self::new(commands, state_rx), receiver, state_tx)
    }

    pub fn connect(&self, endpoint: Url) -> bool {
        self.commands.send(Command::Connect(endpoint)).is_ok()
    }

    pub fn reconnect(&self, force: bool) -> bool {
        self.commands.send(Command::Reconnect { force }).is_ok()
    }

    pub fn send(&self, message: S) -> bool {
        self.commands.send(Command::Send(message)).is_ok()
    }

    pub fn disconnect(&self) -> bool {
        self.commands.send(Command::Disconnect).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.commands.send(Command::Shutdown).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

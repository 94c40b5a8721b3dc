use std::collections::HashMap;
use std::time::Duration;

use common::Tagged;
use tracing::debug;

use super::ConnectionError;

/// Lifecycle notifications of the connection itself.
#[derive(Debug, Clone)]
pub enum MetaEvent {
    Connect,
    Error(ConnectionError),
    /// `local` is true when the close was requested through the manager.
    Disconnect { local: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Error,
    Disconnect,
}

impl MetaEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MetaEvent::Connect => EventKind::Connect,
            MetaEvent::Error(_) => EventKind::Error,
            MetaEvent::Disconnect { .. } => EventKind::Disconnect,
        }
    }
}

/// Work a handler asks the connection to do once it returns.
///
/// Messages are written in order after the handler finishes; if the
/// connection is not open by then they are dropped like any other send.
#[derive(Debug)]
pub struct Outbox<S> {
    messages: Vec<S>,
    reconnect_after: Option<Duration>,
}

impl<S> Default for Outbox<S> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            reconnect_after: None,
        }
    }
}

impl<S> Outbox<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, message: S) {
        self.messages.push(message);
    }

    /// Ask for a forced reconnect to the last endpoint after `delay`.
    /// A later request replaces an earlier one.
    pub fn schedule_reconnect(&mut self, delay: Duration) {
        self.reconnect_after = Some(delay);
    }

    pub fn messages(&self) -> &[S] {
        &self.messages
    }

    pub fn reconnect_after(&self) -> Option<Duration> {
        self.reconnect_after
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.reconnect_after.is_none()
    }

    pub(crate) fn into_parts(self) -> (Vec<S>, Option<Duration>) {
        (self.messages, self.reconnect_after)
    }
}

pub type MessageHandler<R, S> = Box<dyn FnMut(R, &mut Outbox<S>) + Send>;
pub type EventHandler<S> = Box<dyn FnMut(&MetaEvent, &mut Outbox<S>) + Send>;

/// One handler per message tag. Registering a tag again replaces the previous handler.
pub struct HandlerTable<R: Tagged, S> {
    handlers: HashMap<R::Tag, MessageHandler<R, S>>,
}

impl<R: Tagged, S> Default for HandlerTable<R, S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<R: Tagged, S> HandlerTable<R, S> {
    pub fn insert(&mut self, tag: R::Tag, handler: MessageHandler<R, S>) {
        if self.handlers.insert(tag, handler).is_some() {
            debug!("Replaced handler for {}", R::tag_key(tag));
        }
    }

    pub fn get_mut(&mut self, tag: R::Tag) -> Option<&mut MessageHandler<R, S>> {
        self.handlers.get_mut(&tag)
    }

    pub fn contains(&self, tag: R::Tag) -> bool {
        self.handlers.contains_key(&tag)
    }
}

/// One handler per meta-event kind, same replace semantics as [`HandlerTable`].
pub struct EventTable<S> {
    handlers: HashMap<EventKind, EventHandler<S>>,
}

impl<S> Default for EventTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> EventTable<S> {
    pub fn insert(&mut self, kind: EventKind, handler: EventHandler<S>) {
        if self.handlers.insert(kind, handler).is_some() {
            debug!("Replaced {:?} event handler", kind);
        }
    }

    pub fn emit(&mut self, event: &MetaEvent) -> Outbox<S> {
        let mut outbox = Outbox::new();
        if let Some(handler) = self.handlers.get_mut(&event.kind()) {
            handler(event, &mut outbox);
        }
        outbox
    }
}

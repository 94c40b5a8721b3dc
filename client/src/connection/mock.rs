use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use url::Url;

use super::{ConnectionError, Connector, Transport};

type Incoming = Arc<Mutex<mpsc::UnboundedReceiver<Option<String>>>>;

/// Hands out transports that record writes and read scripted frames.
///
/// Frames pushed into the returned sender are delivered in order; a `None`
/// frame is a clean remote close.
#[derive(Clone)]
pub(crate) struct MockConnector {
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    sent: Arc<StdMutex<Vec<String>>>,
    incoming: Incoming,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedSender<Option<String>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            attempts: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
            sent: Arc::new(StdMutex::new(Vec::new())),
            incoming: Arc::new(Mutex::new(rx)),
        };
        (connector, tx)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Poll until at least `count` frames were written or a second passes.
    pub(crate) async fn wait_for_sent(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

struct MockTransport {
    sent: Arc<StdMutex<Vec<String>>>,
    incoming: Incoming,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &Url) -> Result<Box<dyn Transport>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("connection refused".to_string()));
        }
        Ok(Box::new(MockTransport {
            sent: Arc::clone(&self.sent),
            incoming: Arc::clone(&self.incoming),
        }))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        match self.incoming.lock().await.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) => None,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

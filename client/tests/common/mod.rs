#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use client::ClientConfig;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};

enum Command {
    Text(String),
    /// Drop the TCP connection without a close handshake.
    Drop,
}

/// A websocket peer standing in for the game or replay server. It serves one
/// connection at a time and accepts the next one when that ends.
pub struct TestServer {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedSender<Command>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (received_tx, received) = mpsc::unbounded_channel();
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                loop {
                    tokio::select! {
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = received_tx.send(text.to_string());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => break,
                        },
                        command = command_rx.recv() => match command {
                            Some(Command::Text(text)) => {
                                if ws.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(Command::Drop) => break,
                            None => return,
                        },
                    }
                }
            }
        });

        Ok(Self {
            addr,
            received,
            commands,
            connections,
            task,
        })
    }

    /// A client configuration pointing at this server over plain websockets.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            host: self.addr.to_string(),
            secure: false,
            reconnect_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Text(text.into()));
    }

    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    pub async fn expect_text(&mut self) -> Result<String> {
        match timeout(Duration::from_secs(5), self.received.recv()).await {
            Ok(Some(text)) => Ok(text),
            Ok(None) => Err(anyhow!("Server stopped")),
            Err(_) => Err(anyhow!("Timeout waiting for a client frame")),
        }
    }

    /// Wait until `count` connections have been accepted in total.
    pub async fn wait_for_connections(&self, count: usize) -> Result<()> {
        for _ in 0..500 {
            if self.connections() >= count {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(anyhow!("Expected {} connections, saw {}", count, self.connections()))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub const GAME_STATE: &str = r##"{"GameState":{"teams":[{"team":{"id":1,"name":"Detectives","color":"#0000ff","kind":"Detective"},"long":8.4,"lat":49.0,"on_train":null}],"trains":[{"id":1,"long":8.4,"lat":49.0,"line_id":"L1","line_name":"S1","direction":"Hochstetten"}]}}"##;

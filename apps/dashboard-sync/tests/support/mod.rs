//! Scripted WebSocket server for feed tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// One step a server connection performs after the upgrade.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a text frame.
    Text(String),
    /// Wait before the next step.
    Pause(Duration),
    /// Send a close frame and drop the connection.
    Close,
}

/// Local WebSocket server that plays the same script on every connection.
pub struct ScriptedServer {
    pub url: String,
    pub http_base: String,
    received: mpsc::UnboundedReceiver<String>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(script: Vec<Step>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                let received_tx = received_tx.clone();

                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();

                    let reader = tokio::spawn(async move {
                        while let Some(Ok(message)) = read.next().await {
                            if let Message::Text(text) = message {
                                let _ = received_tx.send(text.to_string());
                            }
                        }
                    });

                    for step in script {
                        match step {
                            Step::Text(text) => {
                                if write.send(Message::Text(text.into())).await.is_err() {
                                    return;
                                }
                            }
                            Step::Pause(duration) => tokio::time::sleep(duration).await,
                            Step::Close => {
                                let _ = write.send(Message::Close(None)).await;
                                reader.abort();
                                return;
                            }
                        }
                    }

                    let _ = reader.await;
                });
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            http_base: format!("http://{addr}/"),
            received,
            connections,
            task,
        }
    }

    /// Next text frame sent by a client.
    pub async fn next_received(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// URL of a local port with nothing listening on it.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

//! Line-delimited JSON listener over TCP.
//!
//! Each line is one request object; each reply is one line. Lines that do not
//! parse get no reply, the connection stays open.

use crate::core::json;
use crate::error::Result;
use crate::protocol::Dispatcher;
use crate::utils::metrics::global_metrics;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, instrument, warn};

/// Longest accepted request line.
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

#[derive(Debug)]
pub struct JsonListener {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl JsonListener {
    pub async fn bind(addr: SocketAddr, dispatcher: Dispatcher) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "JSON listener bound");
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[instrument(skip(self, shutdown_rx), fields(address = ?self.listener.local_addr().ok()))]
    pub async fn serve(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let active = Arc::new(AtomicUsize::new(0));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, draining JSON connections");
                    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
                    while active.load(Ordering::SeqCst) > 0 {
                        if tokio::time::Instant::now() >= deadline {
                            warn!(
                                connections = active.load(Ordering::SeqCst),
                                "Timed out waiting for JSON connections"
                            );
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let dispatcher = self.dispatcher.clone();
                            let active = active.clone();
                            active.fetch_add(1, Ordering::SeqCst);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, dispatcher).await {
                                    warn!(peer = %peer, error = %e, "JSON connection failed");
                                }
                                active.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            global_metrics().transport_error();
                            error!(error = %e, "JSON accept failed");
                        }
                    }
                }
            }
        }

        info!("JSON listener stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
) -> Result<()> {
    let metrics = global_metrics();
    metrics.connection_opened();
    debug!(peer = %peer, "JSON connection accepted");

    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut outcome = Ok(());
    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                metrics.transport_error();
                outcome = Err(crate::error::ProtocolError::TransportError(e.to_string()));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        metrics.bytes_in(line.len() as u64);
        if let Some(reply) = json::handle(&dispatcher, &line) {
            metrics.bytes_out(reply.len() as u64 + 1);
            if let Err(e) = framed.send(reply).await {
                metrics.transport_error();
                outcome = Err(crate::error::ProtocolError::TransportError(e.to_string()));
                break;
            }
        }
    }

    metrics.connection_closed();
    debug!(peer = %peer, "JSON connection closed");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn json_assign_then_lookup() {
        let dispatcher = Dispatcher::in_memory(42, 42);
        let listener = JsonListener::bind("127.0.0.1:0".parse().unwrap(), dispatcher)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(1);
        let server = tokio::spawn(listener.serve(rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"tag\":\"p\",\"code\":42,\"accessCode\":42,\"addr\":\"26000001\",\"deveui\":\"00000000000000AA\"}\n")
            .await
            .unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"code":0}"#);

        write.write_all(b"garbage\n").await.unwrap();
        write
            .write_all(b"{\"tag\":\"a\",\"code\":42,\"accessCode\":42,\"eui\":\"00000000000000AA\"}\n")
            .await
            .unwrap();
        let reply: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["addr"], "26000001");

        drop(write);
        tx.send(()).await.unwrap();
        server.await.unwrap().unwrap();
    }
}

//! # Event-Loop Listener
//!
//! A single-threaded listener serving UDP and TCP on the same address. The
//! UDP socket and the TCP acceptor are polled by one `select!` loop; accepted
//! connections run as local tasks on the same thread, each walking the
//! [`ConnectionState`] machine until the peer hangs up.
//!
//! ## Shutdown
//! Send on (or drop the sender of) the channel passed to
//! [`EventLoopListener::serve`]. Open connections get a short grace period and
//! are then dropped with the local task set.

use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::Result;
use crate::protocol::Dispatcher;
use crate::transport::blocking::TCP_READ_CHUNK;
use crate::utils::metrics::global_metrics;
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, info, instrument, warn};

/// How long open connections may keep running after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of one TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    /// Waiting for the next request chunk.
    Readable,
    /// A reply is staged in the outbound buffer.
    WritePending,
    Closed,
}

#[derive(Debug)]
pub struct EventLoopListener {
    udp: UdpSocket,
    tcp: Option<TcpListener>,
    dispatcher: Dispatcher,
    capacity: usize,
}

impl EventLoopListener {
    /// Bind UDP on `addr` and, when `tcp_enabled`, TCP on the port UDP got.
    pub async fn bind(
        addr: SocketAddr,
        tcp_enabled: bool,
        dispatcher: Dispatcher,
        capacity: usize,
    ) -> Result<Self> {
        let udp = UdpSocket::bind(addr).await?;
        let bound = udp.local_addr()?;
        let tcp = if tcp_enabled {
            Some(TcpListener::bind(bound).await?)
        } else {
            None
        };
        info!(address = %bound, tcp = tcp_enabled, "Event-loop listener bound");
        Ok(Self {
            udp,
            tcp,
            dispatcher,
            capacity,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Serve until `shutdown_rx` fires or its sender is dropped.
    ///
    /// The returned future is `!Send`; await it directly rather than passing
    /// it to `tokio::spawn`.
    pub async fn serve(self, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let local = LocalSet::new();
        local.run_until(self.run(shutdown_rx)).await
    }

    #[instrument(skip(self, shutdown_rx), fields(address = ?self.udp.local_addr().ok()))]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let metrics = global_metrics();
        let active = Rc::new(Cell::new(0usize));
        let mut inbound = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut outbound = vec![0u8; self.capacity];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(connections = active.get(), "Shutdown signal received");
                    break;
                }
                received = self.udp.recv_from(&mut inbound) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            metrics.transport_error();
                            warn!(error = %e, "UDP receive failed");
                            continue;
                        }
                    };
                    let written = self.dispatcher.query(&inbound[..len], &mut outbound);
                    if written > 0 {
                        if let Err(e) = self.udp.send_to(&outbound[..written], peer).await {
                            metrics.transport_error();
                            warn!(peer = %peer, error = %e, "UDP send failed");
                        }
                    }
                }
                accepted = accept(self.tcp.as_ref()) => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let dispatcher = self.dispatcher.clone();
                            let active = active.clone();
                            let capacity = self.capacity;
                            active.set(active.get() + 1);
                            tokio::task::spawn_local(async move {
                                serve_connection(stream, peer, dispatcher, capacity).await;
                                active.set(active.get().saturating_sub(1));
                            });
                        }
                        Err(e) => {
                            metrics.transport_error();
                            warn!(error = %e, "TCP accept failed");
                        }
                    }
                }
            }
        }

        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while active.get() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if active.get() > 0 {
            warn!(connections = active.get(), "Dropping open connections");
        }
        info!("Event-loop listener stopped");
        Ok(())
    }
}

async fn accept(tcp: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match tcp {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    capacity: usize,
) {
    let metrics = global_metrics();
    let mut inbound = vec![0u8; TCP_READ_CHUNK];
    let mut outbound = vec![0u8; capacity];
    let mut pending = 0;
    let mut state = ConnectionState::Accepted;

    loop {
        state = match state {
            ConnectionState::Accepted => {
                metrics.connection_opened();
                debug!(peer = %peer, "Connection accepted");
                ConnectionState::Readable
            }
            ConnectionState::Readable => match stream.read(&mut inbound).await {
                Ok(0) => ConnectionState::Closed,
                Ok(len) => {
                    pending = dispatcher.query(&inbound[..len], &mut outbound);
                    if pending > 0 {
                        ConnectionState::WritePending
                    } else {
                        ConnectionState::Readable
                    }
                }
                Err(e) => {
                    metrics.transport_error();
                    warn!(peer = %peer, error = %e, "TCP read failed");
                    ConnectionState::Closed
                }
            },
            ConnectionState::WritePending => {
                match stream.write_all(&outbound[..pending]).await {
                    Ok(()) => ConnectionState::Readable,
                    Err(e) => {
                        metrics.transport_error();
                        warn!(peer = %peer, error = %e, "TCP write failed");
                        ConnectionState::Closed
                    }
                }
            }
            ConnectionState::Closed => {
                metrics.connection_closed();
                debug!(peer = %peer, "Connection closed");
                return;
            }
        };
    }
}

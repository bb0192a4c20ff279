//! Blocking listeners: one thread per socket, one request at a time.
//!
//! Both listeners poll a shared shutdown flag. The UDP socket wakes up on its
//! read timeout; the TCP listener is blocked in `accept`, so
//! [`ShutdownHandle::shutdown`] connects to it once to unblock it.

use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::constants::ERR_LISTENER_STOPPED;
use crate::error::{ProtocolError, Result};
use crate::protocol::Dispatcher;
use crate::utils::metrics::global_metrics;
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Size of one TCP read; each chunk is handled as one request.
pub const TCP_READ_CHUNK: usize = 4096;

/// Stops a blocking listener from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    wake: Option<SocketAddr>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Some(addr) = self.wake {
            // unblock accept()
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(200));
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Loop-back form of a listen address, for the wake-up connect.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

/// Blocking UDP listener: recv, dispatch, reply to sender.
#[derive(Debug)]
pub struct BlockingUdpListener {
    socket: UdpSocket,
    dispatcher: Dispatcher,
    capacity: usize,
    shutdown: Arc<AtomicBool>,
}

impl BlockingUdpListener {
    pub fn bind(
        addr: SocketAddr,
        dispatcher: Dispatcher,
        capacity: usize,
        poll_interval: Duration,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(poll_interval))?;
        info!(address = %socket.local_addr()?, "Blocking UDP listener bound");
        Ok(Self {
            socket,
            dispatcher,
            capacity,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            wake: None,
        }
    }

    #[instrument(skip(self), fields(address = ?self.socket.local_addr().ok()))]
    pub fn run(self) -> Result<()> {
        let metrics = global_metrics();
        let mut inbound = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut outbound = vec![0u8; self.capacity];

        while !self.shutdown.load(Ordering::SeqCst) {
            let (len, peer) = match self.socket.recv_from(&mut inbound) {
                Ok(received) => received,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    metrics.transport_error();
                    warn!(error = %e, "UDP receive failed");
                    continue;
                }
            };
            debug!(peer = %peer, bytes = len, "Datagram received");

            let written = self.dispatcher.query(&inbound[..len], &mut outbound);
            if written == 0 {
                continue;
            }
            if let Err(e) = self.socket.send_to(&outbound[..written], peer) {
                metrics.transport_error();
                warn!(peer = %peer, error = %e, "UDP send failed");
            }
        }

        info!("Blocking UDP listener stopped");
        Ok(())
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("udp-listener".to_string())
            .spawn(move || self.run())
            .map_err(ProtocolError::Io)
    }
}

/// Blocking TCP listener: connections are served one after another.
#[derive(Debug)]
pub struct BlockingTcpListener {
    listener: TcpListener,
    dispatcher: Dispatcher,
    capacity: usize,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl BlockingTcpListener {
    pub fn bind(
        addr: SocketAddr,
        dispatcher: Dispatcher,
        capacity: usize,
        poll_interval: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!(address = %listener.local_addr()?, "Blocking TCP listener bound");
        Ok(Self {
            listener,
            dispatcher,
            capacity,
            poll_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            wake: self.listener.local_addr().ok().map(wake_addr),
        }
    }

    #[instrument(skip(self), fields(address = ?self.listener.local_addr().ok()))]
    pub fn run(self) -> Result<()> {
        let metrics = global_metrics();
        let mut outbound = vec![0u8; self.capacity];

        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    metrics.transport_error();
                    warn!(error = %e, "TCP accept failed");
                    continue;
                }
            };
            let peer = stream.peer_addr().ok();
            metrics.connection_opened();
            debug!(peer = ?peer, "Connection accepted");
            if let Err(e) = self.serve_connection(stream, &mut outbound) {
                metrics.transport_error();
                warn!(peer = ?peer, error = %e, "Connection failed");
            }
            metrics.connection_closed();
            debug!(peer = ?peer, "Connection closed");
        }

        info!("Blocking TCP listener stopped");
        Ok(())
    }

    fn serve_connection(&self, mut stream: TcpStream, outbound: &mut [u8]) -> Result<()> {
        stream.set_read_timeout(Some(self.poll_interval))?;
        let mut inbound = [0u8; TCP_READ_CHUNK];
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(ProtocolError::TransportError(ERR_LISTENER_STOPPED.to_string()));
            }
            let len = match stream.read(&mut inbound) {
                Ok(0) => return Ok(()),
                Ok(len) => len,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            let written = self.dispatcher.query(&inbound[..len], outbound);
            if written > 0 {
                stream.write_all(&outbound[..written])?;
            }
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("tcp-listener".to_string())
            .spawn(move || self.run())
            .map_err(ProtocolError::Io)
    }
}

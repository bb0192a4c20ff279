//! # Service Context
//!
//! [`DirectoryService`] owns the configuration, the stores and the dispatcher
//! for one running directory. Its lifecycle is explicit:
//!
//! ```text
//! open(config) -> serve(shutdown_rx) -> close()
//! ```
//!
//! `open` selects and initializes the stores; a failure there is returned
//! before any socket is bound. `serve` runs the listeners chosen by
//! [`ListenerMode`] (plus the optional JSON listener) until the shutdown
//! channel fires. `close` flushes and closes the stores exactly once.

use crate::config::{DirectoryConfig, ListenerMode};
use crate::error::{ProtocolError, Result};
use crate::protocol::Dispatcher;
use crate::storage::{open_gateway_store, open_identity_store};
use crate::transport::{
    BlockingTcpListener, BlockingUdpListener, EventLoopListener, JsonListener, ShutdownHandle,
};
use crate::utils::metrics::global_metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

#[derive(Debug)]
pub struct DirectoryService {
    config: DirectoryConfig,
    dispatcher: Dispatcher,
    closed: AtomicBool,
}

impl DirectoryService {
    /// Validate `config`, open and initialize the configured stores.
    #[instrument(skip(config), fields(backend = ?config.storage.backend))]
    pub fn open(config: DirectoryConfig) -> Result<Self> {
        config.validate_strict()?;

        let identities = open_identity_store(&config.storage);
        identities.init()?;
        let gateways = open_gateway_store(&config.storage);
        gateways.init()?;

        info!(
            identities = identities.size(),
            gateways = gateways.size(),
            "Stores initialized"
        );

        let dispatcher = Dispatcher::new(
            identities,
            gateways,
            config.auth.code,
            config.auth.access_code,
        );
        Ok(Self {
            config,
            dispatcher,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve until `shutdown_rx` fires or its sender is dropped.
    ///
    /// In event-loop mode the future is `!Send` and must be awaited on the
    /// calling task.
    pub async fn serve(&self, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::TransportError(
                "service already closed".to_string(),
            ));
        }
        match self.config.server.mode {
            ListenerMode::Blocking => self.serve_blocking(shutdown_rx).await,
            ListenerMode::EventLoop => self.serve_event_loop(shutdown_rx).await,
        }
    }

    async fn bind_json(&self) -> Result<Option<JsonListener>> {
        match self.config.server.json_socket_addr()? {
            Some(addr) => Ok(Some(JsonListener::bind(addr, self.dispatcher.clone()).await?)),
            None => Ok(None),
        }
    }

    fn spawn_json(
        listener: Option<JsonListener>,
    ) -> (mpsc::Sender<()>, Option<tokio::task::JoinHandle<Result<()>>>) {
        let (tx, rx) = mpsc::channel(1);
        let task = listener.map(|listener| tokio::spawn(listener.serve(rx)));
        (tx, task)
    }

    async fn stop_json(tx: mpsc::Sender<()>, task: Option<tokio::task::JoinHandle<Result<()>>>) {
        let _ = tx.send(()).await;
        if let Some(task) = task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "JSON listener ended with error"),
                Err(e) => error!(error = %e, "JSON listener task failed"),
            }
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(address = %self.config.server.address))]
    async fn serve_event_loop(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let server = &self.config.server;
        let listener = EventLoopListener::bind(
            server.socket_addr()?,
            server.tcp_enabled,
            self.dispatcher.clone(),
            server.response_capacity,
        )
        .await?;
        let (json_tx, json_task) = Self::spawn_json(self.bind_json().await?);

        let (loop_tx, loop_rx) = mpsc::channel(1);
        let serving = listener.serve(loop_rx);
        tokio::pin!(serving);
        let outcome = tokio::select! {
            outcome = &mut serving => outcome,
            _ = shutdown_rx.recv() => {
                let _ = loop_tx.send(()).await;
                (&mut serving).await
            }
        };

        Self::stop_json(json_tx, json_task).await;
        outcome
    }

    #[instrument(skip(self, shutdown_rx), fields(address = %self.config.server.address))]
    async fn serve_blocking(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let server = &self.config.server;
        let addr = server.socket_addr()?;

        let udp = BlockingUdpListener::bind(
            addr,
            self.dispatcher.clone(),
            server.response_capacity,
            server.poll_interval,
        )?;
        let mut handles: Vec<ShutdownHandle> = vec![udp.shutdown_handle()];
        let mut threads: Vec<JoinHandle<Result<()>>> = Vec::new();

        // TCP shares the port UDP was given
        let tcp = if server.tcp_enabled {
            Some(BlockingTcpListener::bind(
                udp.local_addr()?,
                self.dispatcher.clone(),
                server.response_capacity,
                server.poll_interval,
            )?)
        } else {
            None
        };
        threads.push(udp.spawn()?);
        if let Some(tcp) = tcp {
            handles.push(tcp.shutdown_handle());
            threads.push(tcp.spawn()?);
        }
        let (json_tx, json_task) = Self::spawn_json(self.bind_json().await?);

        let _ = shutdown_rx.recv().await;
        info!(threads = threads.len(), "Stopping blocking listeners");
        for handle in &handles {
            handle.shutdown();
        }

        let joined = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .map(|thread| {
                    thread.join().unwrap_or_else(|_| {
                        Err(ProtocolError::TransportError(
                            "listener thread panicked".to_string(),
                        ))
                    })
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ProtocolError::TransportError(e.to_string()))?;

        Self::stop_json(json_tx, json_task).await;
        joined.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    /// Persist pending changes without closing.
    pub fn flush(&self) -> Result<()> {
        self.dispatcher.identities().flush()?;
        self.dispatcher.gateways().flush()?;
        Ok(())
    }

    /// Flush and close both stores. Later calls are no-ops.
    #[instrument(skip(self))]
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let identities = self.dispatcher.identities().close();
        let gateways = self.dispatcher.gateways().close();
        global_metrics().log_metrics();
        info!("Directory service closed");
        identities?;
        gateways?;
        Ok(())
    }
}

impl Drop for DirectoryService {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "Closing stores on drop failed");
        }
    }
}

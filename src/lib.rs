//! # lorawan-storage
//!
//! A directory of LoRaWAN device and gateway identities served over a
//! fixed-layout binary protocol.
//!
//! Network servers and gateways ask it to translate a device address to its
//! session identity (or back), to page through or mutate identity records,
//! and to resolve gateway ids to socket addresses.
//!
//! ## Layers
//! - [`core`]: value types, the binary codec, JSON and URN text forms
//! - [`storage`]: identity and gateway store traits and backends
//! - [`protocol`]: the request dispatcher (authorization, size budgeting)
//! - [`transport`]: blocking, event-loop and JSON listeners
//! - [`service`]: service lifecycle and a blocking query client
//! - [`config`], [`utils`]: configuration, logging, metrics
//!
//! ## Example
//! ```no_run
//! use lorawan_storage::config::DirectoryConfig;
//! use lorawan_storage::service::DirectoryService;
//!
//! # async fn run() -> lorawan_storage::error::Result<()> {
//! let service = DirectoryService::open(DirectoryConfig::default())?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
//! service.serve(shutdown_rx).await?;
//! service.close()
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod storage;
pub mod transport;
pub mod utils;

pub use crate::config::DirectoryConfig;
pub use crate::error::{ProtocolError, Result, ResultCode, StorageError};
pub use crate::protocol::Dispatcher;
pub use crate::service::{DirectoryService, QueryClient};

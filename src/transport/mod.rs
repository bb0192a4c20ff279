//! # Transport Layer
//!
//! Listeners that move request bytes between sockets and the
//! [`Dispatcher`](crate::protocol::Dispatcher). Every listener handles one
//! request per datagram or per read chunk and never replies to input that
//! does not decode.
//!
//! ## Listeners
//! - **blocking**: std UDP and TCP sockets, one thread each
//! - **event_loop**: UDP + TCP on one tokio thread with local tasks
//! - **json**: newline-delimited JSON over TCP

pub mod blocking;
pub mod event_loop;
pub mod json;

pub use blocking::{BlockingTcpListener, BlockingUdpListener, ShutdownHandle};
pub use event_loop::{ConnectionState, EventLoopListener};
pub use json::JsonListener;

//! Service lifecycle and the protocol client.

pub mod client;
pub mod context;

pub use client::QueryClient;
pub use context::DirectoryService;

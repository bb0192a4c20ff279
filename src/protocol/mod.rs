//! # Protocol
//!
//! Request dispatching: the state machine between decoded requests and the
//! persistence port.
//!
//! ## Flow
//! ```text
//! bytes -> decode -> authorize -> store call -> response -> fit to capacity -> bytes
//! ```
//!
//! Malformed input produces no reply. A code / access code mismatch produces
//! an access-denied operation response. Store failures travel back as result
//! codes inside an otherwise well-formed reply.

pub mod dispatcher;

#[cfg(test)]
mod tests;

pub use dispatcher::{fit_to_capacity, Dispatcher};

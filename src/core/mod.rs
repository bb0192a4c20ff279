//! # Core Protocol Components
//!
//! Identity value types, the fixed-layout binary codec and the two textual
//! codecs (JSON and URN).
//!
//! ## Components
//! - **types**: NetID / DevAddr / keys / identities
//! - **wire**: header, tags and record layouts
//! - **message**: typed requests and responses
//! - **json**: newline-delimited JSON requests
//! - **urn**: `LW:D0:` identity text
//!
//! ## Wire Format
//! ```text
//! [Tag(1)] [Code(4)] [AccessCode(8)] [Body(tag dependent)]
//! ```
//!
//! ## Safety
//! - Minimum size checked per tag before any field is read
//! - Enumerations validated while decoding
//! - Encoding into caller buffers is all-or-nothing

pub mod json;
pub mod message;
pub mod types;
pub mod urn;
pub mod wire;

pub use message::{Request, RequestBody, Response, ResponseBody};
pub use types::{
    Activation, DevAddr, DevEui, DevNonce, DeviceClass, DeviceIdentity, DeviceName,
    GatewayIdentity, JoinNonce, Key128, LorawanVersion, NetId, NetworkIdentity,
};
pub use wire::{Header, Tag, WireRecord};

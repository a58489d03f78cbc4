// src/core/mod.rs

//! The central module containing the framing protocol and the delivery core.

pub mod delivery;
pub mod errors;
pub mod metrics;
pub mod protocol;

pub use errors::TitanError;
pub use protocol::{Frame, FrameCodec};

/// Identifies one accepted connection for the lifetime of the process.
pub type ConnectionId = u64;

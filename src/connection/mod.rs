// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: frame reading, per-message
//! dispatch, session state and release.

// Declare the private sub-modules of the `connection` module.
mod callbacks;
mod guard;
mod handle;
mod handler;
mod session;

// Publicly re-export the primary types from the sub-modules.
pub use callbacks::MessageHandler;
pub use handle::{Connection, ConnectionMap};
pub use handler::{ConnectionHandler, ConnectionOptions};
pub use session::{Session, SharedSession};

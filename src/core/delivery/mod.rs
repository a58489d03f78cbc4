// src/core/delivery/mod.rs

//! The user directory and the per-user delivery queue that sits on top of it.

mod directory;
mod purger;
mod queue;
mod router;

pub use directory::Directory;
pub use purger::QueuePurgerTask;
pub use queue::DeliveryQueue;
pub use router::{Params, QueuedRequest, Response, ResponseHandler, Router, response_handler};

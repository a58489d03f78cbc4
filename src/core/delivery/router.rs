// src/core/delivery/router.rs

//! The narrow contract the delivery queue hands requests off through.

use crate::core::{ConnectionId, TitanError};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The parameter payload of a server-originated request. Opaque to the queue.
pub type Params = Value;

/// The reply a client sent for a delivered request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The connection the reply arrived on.
    pub connection_id: ConnectionId,
    /// The request id the reply correlates to.
    pub request_id: String,
    /// `Ok` carries the `result` member, `Err` the `error` member.
    pub outcome: Result<Value, Value>,
}

/// Invoked with the client's reply once a delivered request is answered.
pub type ResponseHandler = Arc<dyn Fn(Response) + Send + Sync>;

/// Creates a `ResponseHandler` from a closure.
pub fn response_handler<F>(f: F) -> ResponseHandler
where
    F: Fn(Response) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Sends a request to a specific connection.
///
/// A successful return means the request was handed to the transport. It does
/// not mean the client has received or answered it.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    async fn send(
        &self,
        connection_id: ConnectionId,
        method: &str,
        params: &Params,
        on_response: ResponseHandler,
    ) -> Result<(), TitanError>;
}

/// A request waiting in a user's queue.
#[derive(Clone)]
pub struct QueuedRequest {
    pub method: String,
    pub params: Params,
    pub on_response: ResponseHandler,
}

impl fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("method", &self.method)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

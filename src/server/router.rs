// src/server/router.rs

//! A `Router` that writes requests onto live listener connections and matches
//! the client's replies back to the request's response handler.

use crate::connection::ConnectionMap;
use crate::core::delivery::{Params, Response, ResponseHandler, Router};
use crate::core::{ConnectionId, TitanError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// The request as it is written to the client.
#[derive(Serialize)]
struct OutboundRequest<'a> {
    id: &'a str,
    method: &'a str,
    params: &'a Params,
}

/// A delivered request waiting for its reply.
struct PendingResponse {
    connection_id: ConnectionId,
    handler: ResponseHandler,
}

/// Routes requests over the connections of a `Listener`.
pub struct ConnectionRouter {
    connections: ConnectionMap,
    pending: DashMap<String, PendingResponse>,
}

impl ConnectionRouter {
    pub fn new(connections: ConnectionMap) -> Self {
        Self {
            connections,
            pending: DashMap::new(),
        }
    }

    /// Treats `payload` as a reply to a delivered request.
    ///
    /// A reply is a JSON object with a string `id`, no `method`, and a `result`
    /// or `error` member. Returns `true` if the payload answered a request sent
    /// on `connection_id`; the request's handler has then been invoked.
    pub fn handle_response(&self, connection_id: ConnectionId, payload: &[u8]) -> bool {
        let Ok(Value::Object(mut reply)) = serde_json::from_slice::<Value>(payload) else {
            return false;
        };
        if reply.contains_key("method") {
            return false;
        }
        let Some(Value::String(request_id)) = reply.remove("id") else {
            return false;
        };
        let outcome = match (reply.remove("result"), reply.remove("error")) {
            (_, Some(error)) if !error.is_null() => Err(error),
            (Some(result), _) => Ok(result),
            _ => return false,
        };

        let Some((_, pending)) = self
            .pending
            .remove_if(&request_id, |_, p| p.connection_id == connection_id)
        else {
            debug!(
                "Reply on connection {} does not match a pending request ({}).",
                connection_id, request_id
            );
            return false;
        };

        (pending.handler)(Response {
            connection_id,
            request_id,
            outcome,
        });
        true
    }

    /// Drops the handlers of requests sent on a connection that has closed.
    pub fn forget_connection(&self, connection_id: ConnectionId) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.connection_id != connection_id);
        before.saturating_sub(self.pending.len())
    }

    /// The number of delivered requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl Router for ConnectionRouter {
    async fn send(
        &self,
        connection_id: ConnectionId,
        method: &str,
        params: &Params,
        on_response: ResponseHandler,
    ) -> Result<(), TitanError> {
        let connection = self
            .connections
            .get(&connection_id)
            .map(|c| c.value().clone())
            .ok_or(TitanError::ConnectionNotFound(connection_id))?;

        let request_id = new_request_id();
        let payload = serde_json::to_vec(&OutboundRequest {
            id: &request_id,
            method,
            params,
        })?;

        self.pending.insert(
            request_id.clone(),
            PendingResponse {
                connection_id,
                handler: on_response,
            },
        );
        if let Err(e) = connection.send(Bytes::from(payload)).await {
            self.pending.remove(&request_id);
            return Err(e);
        }
        Ok(())
    }
}

/// Generates a request id of the form `m-` followed by 96 random bits in hex.
fn new_request_id() -> String {
    format!("m-{}", hex::encode(rand::random::<[u8; 12]>()))
}

//! WebSocket connection handler
//!
//! One task per connection: it forwards bus broadcasts and answers
//! requests, until the client leaves or a send fails or times out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;

use super::bus::Subscription;
use super::protocol::{JsonError, Request, Response, UNKNOWN_ID};
use crate::catalog::Catalog;
use crate::error::CatalogError;

/// Serve one upgraded socket until it closes
pub async fn handle_connection(ws: WebSocket, peer: Option<SocketAddr>, catalog: Arc<Catalog>) {
    serve_socket(ws, peer, catalog).await
}

/// Connection loop over any message stream and sink
pub async fn serve_socket<S>(ws: S, peer: Option<SocketAddr>, catalog: Arc<Catalog>)
where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Unpin,
{
    let subscription = catalog.bus().connect(peer);
    let send_timeout = catalog.bus().send_timeout();

    let mut conn = ConnectionState {
        ws,
        catalog,
        subscription,
        send_timeout,
    };
    conn.run().await;
}

/// State for a single connection
struct ConnectionState<S> {
    ws: S,
    catalog: Arc<Catalog>,
    subscription: Subscription,
    send_timeout: Duration,
}

impl<S> ConnectionState<S>
where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Unpin,
{
    async fn run(&mut self) {
        if let Some(initial) = self.subscription.take_initial() {
            if let Err(e) = self.send(initial.message.to_string()).await {
                tracing::warn!(
                    "Dropping client {}: initial snapshot: {}",
                    self.subscription.id(),
                    e
                );
                return;
            }
        }

        loop {
            tokio::select! {
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let response = handle_request(&self.catalog, &text).await;
                            let reply = match serde_json::to_string(&response) {
                                Ok(reply) => reply,
                                Err(e) => {
                                    tracing::error!("Failed to encode response: {}", e);
                                    continue;
                                }
                            };

                            if let Err(e) = self.send(reply).await {
                                tracing::warn!("Dropping client {}: {}", self.subscription.id(), e);
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!("Client {} requested close", self.subscription.id());
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let pong = self.ws.send(Message::Pong(data));
                            let _ = tokio::time::timeout(self.send_timeout, pong).await;
                        }
                        Some(Err(e)) => {
                            tracing::debug!("WebSocket error from {}: {}", self.subscription.id(), e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }

                broadcast = self.subscription.next() => {
                    let Some(broadcast) = broadcast else { break };

                    if let Err(e) = self.send(broadcast.message.to_string()).await {
                        tracing::warn!(
                            "Dropping client {} at snapshot #{}: {}",
                            self.subscription.id(),
                            broadcast.sequence,
                            e
                        );
                        break;
                    }
                }
            }
        }

        let _ = SinkExt::close(&mut self.ws).await;
    }

    async fn send(&mut self, text: String) -> anyhow::Result<()> {
        tokio::time::timeout(self.send_timeout, self.ws.send(Message::Text(text)))
            .await
            .map_err(|_| anyhow::anyhow!("send timed out after {:?}", self.send_timeout))??;
        Ok(())
    }
}

/// Decode and answer a single request frame
///
/// Never fails: malformed frames and failing methods produce error
/// responses, and the connection stays open.
pub async fn handle_request(catalog: &Arc<Catalog>, text: &str) -> Response {
    let request: Request = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Malformed request: {}", e);
            return Response::error(UNKNOWN_ID, JsonError::from_decode(&e));
        }
    };

    let id = request.id;
    match dispatch(catalog, request).await {
        Ok(result) => Response::result(id, result),
        Err(error) => Response::error(id, error),
    }
}

async fn dispatch(catalog: &Arc<Catalog>, request: Request) -> Result<Value, JsonError> {
    match request.method.as_str() {
        "list" => {
            let segments = list_params(request.params)?;
            let catalog = Arc::clone(catalog);

            let names = tokio::task::spawn_blocking(move || {
                let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
                catalog.store().list(&segments)
            })
            .await
            .map_err(|e| JsonError::internal(e.to_string()))??;

            Ok(Value::from(names))
        }
        "ping" => Ok(Value::from("pong")),
        _ => Err(CatalogError::UnknownEndpoint {
            method: request.method,
        }
        .into()),
    }
}

/// `list` takes an array of path segments; absent params list the root
fn list_params(params: Value) -> Result<Vec<String>, JsonError> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(segment) => Ok(segment),
                other => Err(JsonError::invalid_params(format!(
                    "path segment must be a string, got {}",
                    other
                ))),
            })
            .collect(),
        other => Err(JsonError::invalid_params(format!(
            "expected an array of path segments, got {}",
            other
        ))),
    }
}

//! Transport layer abstraction.
//!
//! The transport carries JSON-RPC requests to the server and returns the
//! matching response. Server-initiated notifications travel the other way
//! through [`Inbound`] messages handed to the client.

use crate::error::{ClientError, ClientResult};
use ovsdb_protocol::{Request, Response};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Request/response channel to an OVSDB server.
pub trait Transport: Send + Sync {
    /// Sends a request and waits for its response.
    fn call(&self, request: &Request) -> ClientResult<Response>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> ClientResult<()>;
}

/// A message the transport delivers to the client's update thread.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A server notification (`update2`, `update3`).
    Notification(Request),
    /// The connection was re-established; monitors must be resubscribed.
    Reconnected,
    /// Stop the update thread.
    Shutdown,
}

/// Monotonic JSON-RPC request ids.
#[derive(Debug, Default)]
pub(crate) struct RequestIds(AtomicU64);

impl RequestIds {
    pub(crate) fn next(&self) -> Json {
        Json::from(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Returns the result of a response, or its error as [`ClientError::Server`].
pub(crate) fn into_result(response: Response) -> ClientResult<Json> {
    if response.error.is_null() {
        Ok(response.result)
    } else {
        Err(ClientError::Server(response.error.to_string()))
    }
}

/// A mock transport for testing.
///
/// Answers each method with queued results in order and records every
/// request it receives.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    replies: Mutex<HashMap<String, VecDeque<Response>>>,
    sent: Mutex<Vec<Request>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a connected mock transport with no queued replies.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            replies: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful result for the next call of `method`.
    pub fn push_result(&self, method: &str, result: Json) {
        self.push(method, Response::ok(Json::Null, result));
    }

    /// Queues an error response for the next call of `method`.
    pub fn push_error(&self, method: &str, error: &str, details: &str) {
        self.push(method, Response::err(Json::Null, error, details));
    }

    fn push(&self, method: &str, response: Response) {
        self.replies
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Requests received so far.
    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn call(&self, request: &Request) -> ClientResult<Response> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.sent.lock().push(request.clone());
        let mut response = self
            .replies
            .lock()
            .get_mut(&request.method)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| {
                ClientError::transport_fatal(format!("no mock reply for {}", request.method))
            })?;
        response.id = request.id.clone();
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.call(&Request::echo(1)),
            Err(ClientError::NotConnected)
        ));

        transport.set_connected(true);
        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn replies_are_consumed_in_order() {
        let transport = MockTransport::new();
        transport.push_result("echo", json!(["a"]));
        transport.push_result("echo", json!(["b"]));

        let first = transport.call(&Request::echo(7)).unwrap();
        assert_eq!(first.id, json!(7));
        assert_eq!(into_result(first).unwrap(), json!(["a"]));
        assert_eq!(into_result(transport.call(&Request::echo(8)).unwrap()).unwrap(), json!(["b"]));
        assert!(transport.call(&Request::echo(9)).is_err());
        assert_eq!(transport.sent().len(), 3);
    }

    #[test]
    fn error_responses_become_server_errors() {
        let transport = MockTransport::new();
        transport.push_error("get_schema", "unknown database", "nope");
        let response = transport.call(&Request::get_schema(1, "nope")).unwrap();
        assert!(matches!(into_result(response), Err(ClientError::Server(_))));
    }

    #[test]
    fn request_ids_increase() {
        let ids = RequestIds::default();
        assert_eq!(ids.next(), json!(0));
        assert_eq!(ids.next(), json!(1));
    }
}

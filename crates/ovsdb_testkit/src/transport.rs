//! In-memory client/server wiring.
//!
//! [`InMemoryTransport`] carries a client's requests to an
//! [`OvsdbServer`] as JSON-RPC text, the same bytes a socket would carry,
//! and forwards the session's notifications to the client's update thread.

use crate::fixtures::{ovslite_model, ovslite_schema, OVSLITE_DB};
use crossbeam_channel::{Receiver, Sender};
use ovsdb_client::{Client, ClientConfig, ClientError, ClientResult, Inbound, Transport};
use ovsdb_protocol::{Message, Request, Response};
use ovsdb_server::{OvsdbServer, ServerConfig, SessionId};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

struct Connection {
    session: SessionId,
    forwarder: Option<JoinHandle<()>>,
}

/// A transport that connects to an in-memory server.
pub struct InMemoryTransport {
    server: Arc<OvsdbServer>,
    connection: Mutex<Option<Connection>>,
    pending: Mutex<Option<Receiver<Request>>>,
    inbound: Mutex<Option<Sender<Inbound>>>,
}

impl InMemoryTransport {
    /// Opens a session on `server`.
    pub fn new(server: Arc<OvsdbServer>) -> Self {
        let (session, notifications) = server.connect().into_parts();
        Self {
            server,
            connection: Mutex::new(Some(Connection {
                session,
                forwarder: None,
            })),
            pending: Mutex::new(Some(notifications)),
            inbound: Mutex::new(None),
        }
    }

    /// Starts forwarding notifications to a client's update thread.
    pub fn attach(&self, inbound: Sender<Inbound>) {
        *self.inbound.lock() = Some(inbound);
        self.start_forwarder();
    }

    /// Drops the session and opens a new one, as after a lost connection,
    /// then tells the client to resubscribe.
    pub fn reconnect(&self) -> ClientResult<()> {
        self.disconnect();
        let (session, notifications) = self.server.connect().into_parts();
        *self.connection.lock() = Some(Connection {
            session,
            forwarder: None,
        });
        *self.pending.lock() = Some(notifications);
        self.start_forwarder();
        debug!(%session, "in-memory transport reconnected");
        if let Some(inbound) = self.inbound.lock().as_ref() {
            inbound
                .send(Inbound::Reconnected)
                .map_err(|_| ClientError::transport_fatal("client update thread is gone"))?;
        }
        Ok(())
    }

    /// Current session id, if connected.
    pub fn session(&self) -> Option<SessionId> {
        self.connection.lock().as_ref().map(|c| c.session)
    }

    fn start_forwarder(&self) {
        let Some(inbound) = self.inbound.lock().clone() else {
            return;
        };
        let Some(notifications) = self.pending.lock().take() else {
            return;
        };
        let handle = thread::spawn(move || {
            for request in notifications.iter() {
                if inbound.send(Inbound::Notification(request)).is_err() {
                    break;
                }
            }
        });
        if let Some(connection) = self.connection.lock().as_mut() {
            connection.forwarder = Some(handle);
        }
    }

    fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        // Closing the session drops its sender, which ends the forwarder.
        self.server.close(connection.session);
        debug!(session = %connection.session, "in-memory transport closed");
        self.pending.lock().take();
        if let Some(forwarder) = connection.forwarder {
            let _ = forwarder.join();
        }
    }
}

impl Transport for InMemoryTransport {
    fn call(&self, request: &Request) -> ClientResult<Response> {
        let session = self.session().ok_or(ClientError::NotConnected)?;
        let text = Message::Request(request.clone()).to_json().to_string();
        let wire: Json = serde_json::from_str(&text)
            .map_err(|e| ClientError::transport_fatal(e.to_string()))?;
        let reply = self
            .server
            .handle_message(session, &wire)
            .ok_or_else(|| ClientError::transport_fatal("no reply to request"))?;
        match Message::parse(&reply)? {
            Message::Response(response) => Ok(response),
            Message::Request(other) => Err(ClientError::transport_fatal(format!(
                "expected a response, got {}",
                other.method
            ))),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn close(&self) -> ClientResult<()> {
        self.disconnect();
        Ok(())
    }
}

/// A server and a client talking through an [`InMemoryTransport`], both on
/// the `ovslite` schema.
pub struct Harness {
    /// The server.
    pub server: Arc<OvsdbServer>,
    /// The transport, for reconnect tests.
    pub transport: Arc<InMemoryTransport>,
    /// The client.
    pub client: Client,
}

impl Harness {
    /// A fresh server and a client using `monitor_cond`.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::new(OVSLITE_DB))
    }

    /// A fresh server and a client using `config`.
    pub fn with_config(config: ClientConfig) -> Self {
        let server = Arc::new(
            OvsdbServer::new(ServerConfig::new(OVSLITE_DB), ovslite_schema())
                .expect("ovslite server starts"),
        );
        Self::connect(server, config)
    }

    /// Connects another client to an existing server.
    pub fn connect(server: Arc<OvsdbServer>, config: ClientConfig) -> Self {
        let transport = Arc::new(InMemoryTransport::new(Arc::clone(&server)));
        let client = Client::new(config, ovslite_model(), transport.clone())
            .expect("client starts");
        transport.attach(client.inbound());
        Self {
            server,
            transport,
            client,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

//! Main OVSDB server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::monitor::SessionId;
use crossbeam_channel::Receiver;
use ovsdb_protocol::{DatabaseSchema, Message, Request, Response};
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::debug;

/// A connected client: its id and the queue of update notifications
/// addressed to it.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    notifications: Receiver<Request>,
}

impl Session {
    /// The session id to pass with every request.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// `update2`/`update3` notifications for this session's monitors.
    pub fn notifications(&self) -> &Receiver<Request> {
        &self.notifications
    }

    /// Splits the session, e.g. to move the receiver to a forwarding thread.
    pub fn into_parts(self) -> (SessionId, Receiver<Request>) {
        (self.id, self.notifications)
    }
}

/// The OVSDB server.
///
/// Hosts one database in memory. A transport calls [`connect`] for every
/// new connection, feeds its requests to [`handle`] or [`handle_message`]
/// and drains [`Session::notifications`].
///
/// # Example
///
/// ```
/// use ovsdb_protocol::{DatabaseSchema, Request};
/// use ovsdb_server::{OvsdbServer, ServerConfig};
///
/// let schema = DatabaseSchema::new("Open_vSwitch", "1");
/// let server = OvsdbServer::new(ServerConfig::default(), schema).unwrap();
/// let session = server.connect();
///
/// let response = server.handle(session.id(), &Request::list_dbs(1));
/// assert_eq!(response.result, serde_json::json!(["Open_vSwitch"]));
/// ```
///
/// [`connect`]: OvsdbServer::connect
/// [`handle`]: OvsdbServer::handle
/// [`handle_message`]: OvsdbServer::handle_message
pub struct OvsdbServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl OvsdbServer {
    /// Creates a server hosting an empty database of `schema`.
    pub fn new(config: ServerConfig, schema: DatabaseSchema) -> ServerResult<Self> {
        let context = Arc::new(HandlerContext::new(config, schema)?);
        let handler = RequestHandler::new(Arc::clone(&context));

        Ok(Self { handler, context })
    }

    /// Opens a session.
    pub fn connect(&self) -> Session {
        let (id, notifications) = self.context.open_session();
        Session { id, notifications }
    }

    /// Closes a session and cancels its monitors.
    pub fn close(&self, session: SessionId) -> bool {
        self.context.close_session(session)
    }

    /// Handles a request.
    pub fn handle(&self, session: SessionId, request: &Request) -> Response {
        self.handler.handle(session, request)
    }

    /// Handles a raw JSON-RPC message.
    ///
    /// Returns the response to send back, if any. Notifications and
    /// responses get none; a message that does not parse gets an error
    /// response with a null id.
    pub fn handle_message(&self, session: SessionId, message: &Json) -> Option<Json> {
        match Message::parse(message) {
            Ok(Message::Request(request)) if request.is_notification() => {
                debug!(session = %session, method = %request.method, "ignoring notification");
                None
            }
            Ok(Message::Request(request)) => {
                let response = self.handle(session, &request);
                Some(Message::Response(response).to_json())
            }
            Ok(Message::Response(_)) => None,
            Err(err) => {
                let response = Response::err(Json::Null, "syntax error", err.to_string());
                Some(Message::Response(response).to_json())
            }
        }
    }

    /// Name of the hosted database.
    pub fn database_name(&self) -> &str {
        &self.context.config.database
    }

    /// The hosted schema.
    pub fn schema(&self) -> &Arc<DatabaseSchema> {
        self.context.schema()
    }

    /// Id of the latest commit, the nil UUID before the first one.
    pub fn last_txn_id(&self) -> String {
        self.context.last_txn_id()
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.context.row_count(table)
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }
}

impl std::fmt::Debug for OvsdbServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvsdbServer")
            .field("database", &self.context.config.database)
            .field("sessions", &self.context.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_protocol::codec::NIL_UUID;
    use ovsdb_protocol::{AtomicType, ColumnSchema, ColumnType, TableSchema};
    use serde_json::json;

    fn server() -> OvsdbServer {
        let schema = DatabaseSchema::new("Open_vSwitch", "1").with_table(
            TableSchema::new("Bridge")
                .with_column(ColumnSchema::new("name", ColumnType::scalar(AtomicType::String))),
        );
        OvsdbServer::new(ServerConfig::default(), schema).unwrap()
    }

    #[test]
    fn server_lifecycle() {
        let server = server();
        assert_eq!(server.database_name(), "Open_vSwitch");
        assert_eq!(server.last_txn_id(), NIL_UUID);
        assert_eq!(server.session_count(), 0);

        let session = server.connect();
        assert_eq!(server.session_count(), 1);
        assert!(server.close(session.id()));
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn message_dispatch() {
        let server = server();
        let session = server.connect();

        let reply = server
            .handle_message(session.id(), &json!({"method": "echo", "params": ["hi"], "id": 7}))
            .unwrap();
        assert_eq!(reply, json!({"result": ["hi"], "error": null, "id": 7}));

        let notification = json!({"method": "echo", "params": [], "id": null});
        assert!(server.handle_message(session.id(), &notification).is_none());

        let response = json!({"result": [], "error": null, "id": 1});
        assert!(server.handle_message(session.id(), &response).is_none());

        let garbage = server.handle_message(session.id(), &json!({"method": 3})).unwrap();
        assert_eq!(garbage["error"]["error"], "syntax error");
        assert_eq!(garbage["id"], Json::Null);
    }

    #[test]
    fn schema_round_trip() {
        let server = server();
        let session = server.connect();
        let response = server.handle(session.id(), &Request::get_schema(1, "Open_vSwitch"));
        let schema = DatabaseSchema::from_json_value(&response.result).unwrap();
        assert_eq!(&schema, server.schema().as_ref());
    }

    #[test]
    fn full_transact_flow() {
        let server = server();
        let session = server.connect();

        let insert = Request::new(
            1,
            "transact",
            vec![
                json!("Open_vSwitch"),
                json!({"op": "insert", "table": "Bridge", "row": {"name": "br0"}}),
            ],
        );
        let response = server.handle(session.id(), &insert);
        assert!(response.error.is_null());
        assert!(response.result[0]["uuid"].is_array());
        assert_eq!(server.row_count("Bridge"), 1);
        assert_ne!(server.last_txn_id(), NIL_UUID);
    }
}

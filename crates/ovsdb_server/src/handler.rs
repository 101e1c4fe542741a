//! Request handlers for the protocol methods.

use crate::config::ServerConfig;
use crate::database::{ChangeSet, Database};
use crate::error::{ServerError, ServerResult};
use crate::monitor::{monitor_id, Monitor, SessionId, SessionState};
use crate::transact;
use crossbeam_channel::{bounded, Receiver};
use ovsdb_protocol::codec::NIL_UUID;
use ovsdb_protocol::{
    empty_object, parse_monitor_requests, DatabaseSchema, MonitorCondSinceReply, Request,
    Response, METHOD_ECHO, METHOD_GET_SCHEMA, METHOD_LIST_DBS, METHOD_MONITOR_CANCEL,
    METHOD_MONITOR_COND, METHOD_MONITOR_COND_SINCE, METHOD_TRANSACT,
};
use parking_lot::RwLock;
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context for request handling.
///
/// Locks are always taken in the order database, then sessions.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    schema: Arc<DatabaseSchema>,
    database: RwLock<Database>,
    sessions: RwLock<HashMap<SessionId, SessionState>>,
    next_session: AtomicU64,
}

impl HandlerContext {
    /// Creates a context hosting one empty database.
    pub fn new(config: ServerConfig, schema: DatabaseSchema) -> ServerResult<Self> {
        if schema.name != config.database {
            return Err(ServerError::UnknownDatabase(format!(
                "schema is for {}, server is configured for {}",
                schema.name, config.database
            )));
        }
        let schema = Arc::new(schema);
        let database = Database::new(Arc::clone(&schema), config.history_limit);
        Ok(Self {
            config,
            schema,
            database: RwLock::new(database),
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    /// The hosted schema.
    pub fn schema(&self) -> &Arc<DatabaseSchema> {
        &self.schema
    }

    /// Opens a session and returns the receiving end of its notifications.
    pub fn open_session(&self) -> (SessionId, Receiver<Request>) {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = bounded(self.config.monitor_queue_capacity);
        self.sessions.write().insert(id, SessionState::new(tx));
        debug!(session = %id, "session opened");
        (id, rx)
    }

    /// Closes a session, dropping its monitors.
    pub fn close_session(&self, session: SessionId) -> bool {
        let removed = self.sessions.write().remove(&session);
        if let Some(state) = &removed {
            debug!(session = %session, monitors = state.monitor_count(), dropped = state.dropped(), "session closed");
        }
        removed.is_some()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Id of the latest commit.
    pub fn last_txn_id(&self) -> String {
        self.database.read().last_txn_id().to_string()
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.database.read().row_count(table)
    }

    /// Runs `f` with read access to the database.
    pub fn with_database<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        f(&self.database.read())
    }

    fn check_database(&self, name: &str) -> ServerResult<()> {
        if name == self.config.database {
            Ok(())
        } else {
            Err(ServerError::UnknownDatabase(name.to_string()))
        }
    }

    /// Delivers a commit to every session; sessions whose receiver is gone
    /// are closed.
    fn publish(&self, txn_id: &str, changes: &ChangeSet) {
        let mut sessions = self.sessions.write();
        let mut gone = Vec::new();
        for (id, state) in sessions.iter_mut() {
            match state.publish(*id, txn_id, changes, &self.schema) {
                Ok(true) => {}
                Ok(false) => gone.push(*id),
                Err(err) => warn!(session = %id, error = %err, "failed to encode update"),
            }
        }
        for id in gone {
            sessions.remove(&id);
            debug!(session = %id, "session receiver gone, closed");
        }
    }
}

/// Handler for protocol requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Dispatches a request and renders its response.
    ///
    /// Failures become JSON-RPC error objects; transaction failures are
    /// not failures here, they are part of the transact result.
    pub fn handle(&self, session: SessionId, request: &Request) -> Response {
        let result = match request.method.as_str() {
            METHOD_ECHO => Ok(self.handle_echo(request)),
            METHOD_LIST_DBS => Ok(self.handle_list_dbs()),
            METHOD_GET_SCHEMA => self.handle_get_schema(request),
            METHOD_TRANSACT => self.handle_transact(request),
            METHOD_MONITOR_COND => self.handle_monitor_cond(session, request),
            METHOD_MONITOR_COND_SINCE => self.handle_monitor_cond_since(session, request),
            METHOD_MONITOR_CANCEL => self.handle_monitor_cancel(session, request),
            other => Err(ServerError::InvalidRequest(format!("unknown method {other}"))),
        };
        match result {
            Ok(result) => Response::ok(request.id.clone(), result),
            Err(err) => {
                if err.is_server_error() {
                    warn!(method = %request.method, error = %err, "request failed");
                } else {
                    debug!(method = %request.method, error = %err, "request rejected");
                }
                Response::err(request.id.clone(), err.error_tag(), err.to_string())
            }
        }
    }

    /// Handles an echo request.
    pub fn handle_echo(&self, request: &Request) -> Json {
        Json::Array(request.params.clone())
    }

    /// Handles a list_dbs request.
    pub fn handle_list_dbs(&self) -> Json {
        json!([self.context.config.database])
    }

    /// Handles a get_schema request.
    pub fn handle_get_schema(&self, request: &Request) -> ServerResult<Json> {
        self.context.check_database(request.str_param(0)?)?;
        Ok(self.context.schema.to_json())
    }

    /// Handles a transact request.
    pub fn handle_transact(&self, request: &Request) -> ServerResult<Json> {
        self.context.check_database(request.str_param(0)?)?;
        let operations = request.params.get(1..).unwrap_or_default();
        let limit = self.context.config.max_operations_per_transaction;
        if operations.len() > limit {
            return Err(ServerError::InvalidRequest(format!(
                "too many operations: {} > {limit}",
                operations.len()
            )));
        }

        let mut database = self.context.database.write();
        let outcome = transact::execute(&database, operations);
        if let Some(staged) = outcome.staged {
            let (txn_id, changes) = database.commit(staged);
            info!(txn = %txn_id, operations = operations.len(), rows = changes.len(), "transaction committed");
            self.context.publish(&txn_id, &changes);
        }
        Ok(Json::Array(outcome.results))
    }

    /// Handles a monitor_cond request.
    pub fn handle_monitor_cond(&self, session: SessionId, request: &Request) -> ServerResult<Json> {
        let (id, monitor) = self.parse_monitor(request, false)?;
        let database = self.context.database.read();
        let initial = monitor.initial(&database).to_json(&self.context.schema)?;
        self.register(session, &id, monitor)?;
        Ok(initial)
    }

    /// Handles a monitor_cond_since request.
    ///
    /// Sends the changes since the client's transaction id when the server
    /// still has them, the full state otherwise.
    pub fn handle_monitor_cond_since(
        &self,
        session: SessionId,
        request: &Request,
    ) -> ServerResult<Json> {
        let (id, monitor) = self.parse_monitor(request, true)?;
        let since = request
            .params
            .get(3)
            .and_then(Json::as_str)
            .unwrap_or(NIL_UUID);

        let database = self.context.database.read();
        let (found, updates) = match database.changes_since(since) {
            Some(changes) => (true, monitor.updates(&changes, &self.context.schema)),
            None => (false, monitor.initial(&database)),
        };
        let reply = MonitorCondSinceReply {
            found,
            last_txn_id: database.last_txn_id().to_string(),
            updates: updates.to_json(&self.context.schema)?,
        };
        self.register(session, &id, monitor)?;
        debug!(session = %session, monitor = %id, found, "monitor_cond_since");
        Ok(reply.to_json())
    }

    /// Handles a monitor_cancel request.
    pub fn handle_monitor_cancel(&self, session: SessionId, request: &Request) -> ServerResult<Json> {
        let id = request
            .params
            .first()
            .map(monitor_id)
            .ok_or_else(|| ServerError::InvalidRequest("monitor_cancel without monitor id".into()))?;
        self.context
            .sessions
            .write()
            .get_mut(&session)
            .ok_or_else(|| ServerError::InvalidRequest(format!("unknown {session}")))?
            .cancel(&id)?;
        Ok(empty_object())
    }

    fn parse_monitor(&self, request: &Request, with_txn_id: bool) -> ServerResult<(String, Monitor)> {
        self.context.check_database(request.str_param(0)?)?;
        let (Some(id), Some(requests)) = (request.params.get(1), request.params.get(2)) else {
            return Err(ServerError::InvalidRequest(format!(
                "{} needs database, monitor id and requests",
                request.method
            )));
        };
        let requests = parse_monitor_requests(requests, &self.context.schema)?;
        if requests.is_empty() {
            return Err(ServerError::InvalidRequest("no tables to monitor".into()));
        }
        Ok((monitor_id(id), Monitor::new(requests, with_txn_id)))
    }

    /// Registers a monitor. Called with the database lock held so no
    /// commit falls between the initial state and the registration.
    fn register(&self, session: SessionId, id: &str, monitor: Monitor) -> ServerResult<()> {
        self.context
            .sessions
            .write()
            .get_mut(&session)
            .ok_or_else(|| ServerError::InvalidRequest(format!("unknown {session}")))?
            .add_monitor(id, monitor)?;
        info!(session = %session, monitor = %id, "monitor registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "name": "Open_vSwitch",
        "version": "1",
        "tables": {
            "Bridge": {
                "columns": {
                    "name": {"type": "string", "mutable": false},
                    "external_ids": {"type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}}
                },
                "indexes": [["name"]]
            }
        }
    }"#;

    fn handler() -> (RequestHandler, Arc<HandlerContext>) {
        let schema = DatabaseSchema::from_json(SCHEMA).unwrap();
        let context = Arc::new(HandlerContext::new(ServerConfig::default(), schema).unwrap());
        (RequestHandler::new(Arc::clone(&context)), context)
    }

    fn insert(name: &str) -> Request {
        Request::new(
            1,
            "transact",
            vec![
                json!("Open_vSwitch"),
                json!({"op": "insert", "table": "Bridge", "row": {"name": name}}),
            ],
        )
    }

    fn monitor(method: &str, id: &str, since: Option<&str>) -> Request {
        let mut params = vec![
            json!("Open_vSwitch"),
            json!(id),
            json!({"Bridge": {"columns": ["name"]}}),
        ];
        if let Some(since) = since {
            params.push(json!(since));
        }
        Request::new(2, method, params)
    }

    #[test]
    fn rejects_schema_of_other_database() {
        let schema = DatabaseSchema::from_json(SCHEMA).unwrap();
        let result = HandlerContext::new(ServerConfig::new("other"), schema);
        assert!(matches!(result, Err(ServerError::UnknownDatabase(_))));
    }

    #[test]
    fn unknown_method_and_database() {
        let (handler, context) = handler();
        let (session, _rx) = context.open_session();

        let response = handler.handle(session, &Request::new(1, "lock", vec![json!("l")]));
        assert_eq!(response.error["error"], "invalid request");

        let response = handler.handle(session, &Request::get_schema(2, "nope"));
        assert_eq!(response.error["error"], "unknown database");
        assert_eq!(response.id, json!(2));
    }

    #[test]
    fn transact_limit() {
        let schema = DatabaseSchema::from_json(SCHEMA).unwrap();
        let config = ServerConfig::default().with_max_operations_per_transaction(1);
        let context = Arc::new(HandlerContext::new(config, schema).unwrap());
        let handler = RequestHandler::new(Arc::clone(&context));
        let (session, _rx) = context.open_session();

        let request = Request::new(
            1,
            "transact",
            vec![json!("Open_vSwitch"), json!({"op": "comment", "comment": "a"}), json!({"op": "comment", "comment": "b"})],
        );
        let response = handler.handle(session, &request);
        assert_eq!(response.error["error"], "invalid request");
    }

    #[test]
    fn monitor_sees_commits_after_initial_state() {
        let (handler, context) = handler();
        let (session, rx) = context.open_session();
        handler.handle(session, &insert("br0"));

        let response = handler.handle(session, &monitor("monitor_cond", "m", None));
        let initial = response.result["Bridge"].as_object().unwrap();
        assert_eq!(initial.len(), 1);
        assert!(rx.try_recv().is_err());

        handler.handle(session, &insert("br1"));
        let update = rx.try_recv().unwrap();
        assert_eq!(update.method, "update2");
        assert_eq!(update.params[0], json!("m"));

        let again = handler.handle(session, &monitor("monitor_cond", "m", None));
        assert_eq!(again.error["error"], "duplicate monitor");

        let cancel = Request::monitor_cancel(3, "m");
        assert_eq!(handler.handle(session, &cancel).result, json!({}));
        assert_eq!(handler.handle(session, &cancel).error["error"], "unknown monitor");

        handler.handle(session, &insert("br2"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn monitor_cond_since_resumes_from_known_txn() {
        let (handler, context) = handler();
        let (session, _rx) = context.open_session();
        handler.handle(session, &insert("br0"));
        let known = context.last_txn_id();
        handler.handle(session, &insert("br1"));

        let response = handler.handle(session, &monitor("monitor_cond_since", "a", Some(&known)));
        let reply = MonitorCondSinceReply::parse(&response.result).unwrap();
        assert!(reply.found);
        assert_eq!(reply.last_txn_id, context.last_txn_id());
        let rows = reply.updates["Bridge"].as_object().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.values().all(|row| row.get("insert").is_some()));

        let response = handler.handle(session, &monitor("monitor_cond_since", "b", Some("stale")));
        let reply = MonitorCondSinceReply::parse(&response.result).unwrap();
        assert!(!reply.found);
        assert_eq!(reply.updates["Bridge"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let (handler, context) = handler();
        let (watcher, rx) = context.open_session();
        let (writer, _writer_rx) = context.open_session();
        handler.handle(watcher, &monitor("monitor_cond", "m", None));
        drop(rx);

        handler.handle(writer, &insert("br0"));
        assert_eq!(context.session_count(), 1);
        assert!(!context.close_session(watcher));
        assert!(context.close_session(writer));
    }
}

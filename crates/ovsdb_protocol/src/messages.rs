//! JSON-RPC envelopes and typed method parameters.

use crate::codec::NIL_UUID;
use crate::error::{CodecError, CodecResult};
use crate::monitor::{MonitorRequest, MonitorRequests};
use crate::operation::{Operation, OperationResult};
use crate::schema::DatabaseSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

/// `echo` method.
pub const METHOD_ECHO: &str = "echo";
/// `list_dbs` method.
pub const METHOD_LIST_DBS: &str = "list_dbs";
/// `get_schema` method.
pub const METHOD_GET_SCHEMA: &str = "get_schema";
/// `transact` method.
pub const METHOD_TRANSACT: &str = "transact";
/// `monitor_cond` method.
pub const METHOD_MONITOR_COND: &str = "monitor_cond";
/// `monitor_cond_since` method.
pub const METHOD_MONITOR_COND_SINCE: &str = "monitor_cond_since";
/// `monitor_cancel` method.
pub const METHOD_MONITOR_CANCEL: &str = "monitor_cancel";
/// `update2` notification.
pub const METHOD_UPDATE2: &str = "update2";
/// `update3` notification.
pub const METHOD_UPDATE3: &str = "update3";

/// A request, or a notification when `id` is null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Method name.
    pub method: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Json>,
    /// Request id, null for notifications.
    #[serde(default)]
    pub id: Json,
}

/// A response to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Result, null on error.
    #[serde(default)]
    pub result: Json,
    /// Error, null on success.
    #[serde(default)]
    pub error: Json,
    /// Id of the request answered.
    pub id: Json,
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request or notification.
    Request(Request),
    /// Response.
    Response(Response),
}

impl Message {
    /// Parses a message, telling requests from responses by `method`.
    pub fn parse(json: &Json) -> CodecResult<Self> {
        if json.get("method").is_some() {
            Ok(Message::Request(Request::deserialize(json)?))
        } else {
            Ok(Message::Response(Response::deserialize(json)?))
        }
    }

    /// Renders the message.
    pub fn to_json(&self) -> Json {
        match self {
            Message::Request(r) => json!({"method": r.method, "params": r.params, "id": r.id}),
            Message::Response(r) => json!({"result": r.result, "error": r.error, "id": r.id}),
        }
    }
}

impl Request {
    /// Creates a request.
    pub fn new(id: impl Into<Json>, method: impl Into<String>, params: Vec<Json>) -> Self {
        Self {
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// Creates a notification.
    pub fn notification(method: impl Into<String>, params: Vec<Json>) -> Self {
        Self {
            method: method.into(),
            params,
            id: Json::Null,
        }
    }

    /// Returns true for notifications.
    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }

    /// `echo` request.
    pub fn echo(id: impl Into<Json>) -> Self {
        Self::new(id, METHOD_ECHO, Vec::new())
    }

    /// `list_dbs` request.
    pub fn list_dbs(id: impl Into<Json>) -> Self {
        Self::new(id, METHOD_LIST_DBS, Vec::new())
    }

    /// `get_schema` request.
    pub fn get_schema(id: impl Into<Json>, database: &str) -> Self {
        Self::new(id, METHOD_GET_SCHEMA, vec![json!(database)])
    }

    /// `transact` request, checking every operation against the schema.
    pub fn transact(id: impl Into<Json>, schema: &DatabaseSchema, operations: &[Operation]) -> CodecResult<Self> {
        let mut params = Vec::with_capacity(operations.len() + 1);
        params.push(json!(schema.name));
        for op in operations {
            params.push(op.to_json(schema)?);
        }
        Ok(Self::new(id, METHOD_TRANSACT, params))
    }

    /// `monitor_cond` request.
    pub fn monitor_cond(
        id: impl Into<Json>,
        database: &str,
        monitor_id: &str,
        requests: &MonitorRequests,
    ) -> Self {
        Self::new(
            id,
            METHOD_MONITOR_COND,
            vec![json!(database), json!(monitor_id), requests_to_json(requests)],
        )
    }

    /// `monitor_cond_since` request. Without a transaction id the server
    /// sends the full initial state.
    pub fn monitor_cond_since(
        id: impl Into<Json>,
        database: &str,
        monitor_id: &str,
        requests: &MonitorRequests,
        last_txn_id: Option<&str>,
    ) -> Self {
        Self::new(
            id,
            METHOD_MONITOR_COND_SINCE,
            vec![
                json!(database),
                json!(monitor_id),
                requests_to_json(requests),
                json!(last_txn_id.unwrap_or(NIL_UUID)),
            ],
        )
    }

    /// `monitor_cancel` request.
    pub fn monitor_cancel(id: impl Into<Json>, monitor_id: &str) -> Self {
        Self::new(id, METHOD_MONITOR_CANCEL, vec![json!(monitor_id)])
    }

    /// Returns the string parameter at `index`.
    pub fn str_param(&self, index: usize) -> CodecResult<&str> {
        self.params
            .get(index)
            .and_then(Json::as_str)
            .ok_or_else(|| {
                CodecError::invalid_structure(format!(
                    "{}: parameter {index} must be a string",
                    self.method
                ))
            })
    }
}

fn requests_to_json(requests: &MonitorRequests) -> Json {
    Json::Object(
        requests
            .iter()
            .map(|(table, request)| (table.clone(), json!([request.to_json()])))
            .collect(),
    )
}

/// Parses the table-to-request object of a monitor call.
///
/// Each table maps to one request object or an array holding one.
pub fn parse_monitor_requests(json: &Json, schema: &DatabaseSchema) -> CodecResult<MonitorRequests> {
    let object = json
        .as_object()
        .ok_or_else(|| CodecError::invalid_structure("monitor requests must be an object"))?;
    let mut requests = MonitorRequests::new();
    for (name, value) in object {
        let table = schema.require_table(name)?;
        let request = match value {
            Json::Array(items) => match items.as_slice() {
                [single] => MonitorRequest::from_json(single, table)?,
                _ => {
                    return Err(CodecError::unsupported(
                        "multiple monitor requests for one table",
                    ))
                }
            },
            other => MonitorRequest::from_json(other, table)?,
        };
        requests.insert(name.clone(), request);
    }
    Ok(requests)
}

impl Response {
    /// A successful response.
    pub fn ok(id: Json, result: Json) -> Self {
        Self {
            result,
            error: Json::Null,
            id,
        }
    }

    /// An error response.
    pub fn err(id: Json, error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            result: Json::Null,
            error: json!({"error": error.into(), "details": details.into()}),
            id,
        }
    }

    /// Returns the result, or the error as `InvalidStructure`.
    pub fn into_result(self) -> CodecResult<Json> {
        if self.error.is_null() {
            Ok(self.result)
        } else {
            Err(CodecError::invalid_structure(format!(
                "error response: {}",
                self.error
            )))
        }
    }
}

/// Parses the result array of a `transact` reply.
///
/// Null entries, for operations not attempted after an earlier failure,
/// become empty results.
pub fn parse_transact_reply(result: &Json) -> CodecResult<Vec<OperationResult>> {
    let items = result
        .as_array()
        .ok_or_else(|| CodecError::invalid_structure("transact result must be an array"))?;
    items
        .iter()
        .map(|item| match item {
            Json::Null => Ok(OperationResult::default()),
            other => Ok(OperationResult::deserialize(other)?),
        })
        .collect()
}

/// An `update2` or `update3` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateNotification {
    /// Monitor the update belongs to.
    pub monitor_id: String,
    /// Transaction id of the change, for `update3`.
    pub last_txn_id: Option<String>,
    /// Undecoded table updates.
    pub updates: Json,
}

impl UpdateNotification {
    /// Parses a notification request.
    pub fn parse(request: &Request) -> CodecResult<Self> {
        match (request.method.as_str(), request.params.as_slice()) {
            (METHOD_UPDATE2, [monitor_id, updates]) => Ok(Self {
                monitor_id: monitor_id_string(monitor_id),
                last_txn_id: None,
                updates: updates.clone(),
            }),
            (METHOD_UPDATE3, [monitor_id, txn, updates]) => Ok(Self {
                monitor_id: monitor_id_string(monitor_id),
                last_txn_id: txn.as_str().map(str::to_string),
                updates: updates.clone(),
            }),
            (method, params) => Err(CodecError::invalid_structure(format!(
                "{method} with {} parameters is not an update notification",
                params.len()
            ))),
        }
    }

    /// Renders the notification, as `update3` when a transaction id is set.
    pub fn to_request(&self) -> Request {
        match &self.last_txn_id {
            Some(txn) => Request::notification(
                METHOD_UPDATE3,
                vec![json!(self.monitor_id), json!(txn), self.updates.clone()],
            ),
            None => Request::notification(
                METHOD_UPDATE2,
                vec![json!(self.monitor_id), self.updates.clone()],
            ),
        }
    }
}

fn monitor_id_string(json: &Json) -> String {
    match json {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reply of `monitor_cond_since`.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorCondSinceReply {
    /// Whether the server could resume from the given transaction id.
    pub found: bool,
    /// Latest transaction id on the server.
    pub last_txn_id: String,
    /// Changes since the id when found, full state otherwise.
    pub updates: Json,
}

impl MonitorCondSinceReply {
    /// Parses the reply's result array.
    pub fn parse(result: &Json) -> CodecResult<Self> {
        match result.as_array().map(Vec::as_slice) {
            Some([Json::Bool(found), Json::String(txn), updates]) => Ok(Self {
                found: *found,
                last_txn_id: txn.clone(),
                updates: updates.clone(),
            }),
            _ => Err(CodecError::invalid_structure(
                "monitor_cond_since result must be [found, last_txn_id, updates]",
            )),
        }
    }

    /// Renders the reply's result array.
    pub fn to_json(&self) -> Json {
        json!([self.found, self.last_txn_id, self.updates])
    }
}

/// Returns an empty object, the result of `monitor_cancel`.
pub fn empty_object() -> Json {
    Json::Object(Map::new())
}

//! Monitor subscription lifecycle.
//!
//! The manager owns the table → [`MonitorRequest`] map of every active
//! monitor. The union of those maps is the filter every inbound batch goes
//! through before it reaches the cache. Cancelling a monitor only removes
//! its requests, so later batches for its tables are dropped while rows
//! already cached stay until cleared explicitly.

use crate::cache::{ApplySummary, Resync, TableCache};
use crate::config::{ClientConfig, MonitorMethod};
use crate::error::{ClientError, ClientResult};
use crate::transport::{into_result, RequestIds, Transport};
use ovsdb_protocol::{
    DatabaseSchema, MonitorCondSinceReply, MonitorRequest, MonitorRequests, Request,
    TableUpdates2, UpdateNotification,
};
use parking_lot::RwLock;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct MonitorState {
    monitors: BTreeMap<String, MonitorRequests>,
    last_txn_id: Option<String>,
}

impl MonitorState {
    fn merged(&self) -> MonitorRequests {
        self.monitors
            .values()
            .flat_map(|requests| requests.iter())
            .map(|(table, request)| (table.clone(), request.clone()))
            .collect()
    }
}

/// Owns the active monitors and feeds their updates to the cache.
pub struct MonitorManager {
    config: ClientConfig,
    schema: Arc<DatabaseSchema>,
    cache: Arc<TableCache>,
    transport: Arc<dyn Transport>,
    ids: Arc<RequestIds>,
    state: RwLock<MonitorState>,
}

impl MonitorManager {
    pub(crate) fn new(
        config: ClientConfig,
        cache: Arc<TableCache>,
        transport: Arc<dyn Transport>,
        ids: Arc<RequestIds>,
    ) -> Self {
        Self {
            config,
            schema: Arc::clone(cache.model().schema()),
            cache,
            transport,
            ids,
            state: RwLock::new(MonitorState::default()),
        }
    }

    /// Starts a monitor and applies its initial state.
    ///
    /// Each table may belong to one monitor only.
    pub fn monitor(&self, monitor_id: &str, requests: MonitorRequests) -> ClientResult<ApplySummary> {
        if requests.is_empty() {
            return Err(ClientError::Unsupported("monitor without tables".into()));
        }
        for (table, request) in &requests {
            request.validate(self.schema.require_table(table)?)?;
        }
        {
            let mut state = self.state.write();
            if state.monitors.contains_key(monitor_id) {
                return Err(ClientError::Unsupported(format!(
                    "monitor {monitor_id} already exists"
                )));
            }
            if let Some(table) = requests
                .keys()
                .find(|table| state.monitors.values().any(|m| m.contains_key(*table)))
            {
                return Err(ClientError::Unsupported(format!(
                    "table {table} is already monitored"
                )));
            }
            state.monitors.insert(monitor_id.to_string(), requests.clone());
        }

        info!(monitor = monitor_id, tables = requests.len(), "starting monitor");
        let resume = self.resume_token();
        let result = self.sync(monitor_id, &requests, resume);
        if result.is_err() {
            self.state.write().monitors.remove(monitor_id);
        }
        result
    }

    /// Monitors every column of `tables`.
    pub fn monitor_tables(&self, monitor_id: &str, tables: &[&str]) -> ClientResult<ApplySummary> {
        let mut requests = MonitorRequests::new();
        for table in tables {
            let schema = self.schema.require_table(table)?;
            requests.insert(schema.name.clone(), MonitorRequest::all_columns(schema));
        }
        self.monitor(monitor_id, requests)
    }

    /// Cancels a monitor. Rows already cached for its tables are kept.
    pub fn cancel(&self, monitor_id: &str) -> ClientResult<()> {
        if self.state.write().monitors.remove(monitor_id).is_none() {
            return Err(ClientError::Unsupported(format!(
                "unknown monitor {monitor_id}"
            )));
        }
        info!(monitor = monitor_id, "cancelling monitor");
        let request = Request::monitor_cancel(self.ids.next(), monitor_id);
        into_result(self.transport.call(&request)?)?;
        Ok(())
    }

    /// Applies an `update2` or `update3` notification.
    pub fn handle_notification(&self, request: &Request) -> ClientResult<ApplySummary> {
        let notification = UpdateNotification::parse(request)?;
        if !self.state.read().monitors.contains_key(&notification.monitor_id) {
            debug!(monitor = %notification.monitor_id, "update for inactive monitor ignored");
            return Ok(ApplySummary::default());
        }
        let updates = self.decode(&notification.updates)?;
        if let Some(txn) = notification.last_txn_id {
            self.state.write().last_txn_id = Some(txn);
        }
        Ok(self.apply(updates))
    }

    /// Applies a decoded batch through the active filter.
    pub fn apply(&self, updates: TableUpdates2) -> ApplySummary {
        let requests = self.requests();
        let summary = self.cache.apply(&requests, updates);
        debug!(
            added = summary.added,
            updated = summary.updated,
            deleted = summary.deleted,
            skipped = summary.skipped,
            "update applied"
        );
        summary
    }

    /// Re-issues every monitor after a reconnect.
    ///
    /// Resumes from the last transaction id when configured to and the
    /// server still knows it; otherwise each monitor's tables are cleared
    /// and refilled from the full state.
    pub fn resubscribe(&self) -> ClientResult<ApplySummary> {
        let monitors: Vec<(String, MonitorRequests)> = self
            .state
            .read()
            .monitors
            .iter()
            .map(|(id, requests)| (id.clone(), requests.clone()))
            .collect();
        let mut total = ApplySummary::default();
        for (id, requests) in monitors {
            let resume = self.resume_token();
            let summary = self.sync(&id, &requests, resume)?;
            total.added += summary.added;
            total.updated += summary.updated;
            total.deleted += summary.deleted;
            total.skipped += summary.skipped;
        }
        info!(events = total.events(), "monitors resubscribed");
        Ok(total)
    }

    /// Union of the requests of every active monitor.
    pub fn requests(&self) -> MonitorRequests {
        self.state.read().merged()
    }

    /// Ids of the active monitors.
    pub fn monitor_ids(&self) -> Vec<String> {
        self.state.read().monitors.keys().cloned().collect()
    }

    /// Latest transaction id seen, if the server reports them.
    pub fn last_txn_id(&self) -> Option<String> {
        self.state.read().last_txn_id.clone()
    }

    fn resume_token(&self) -> Option<String> {
        if self.config.resumes() {
            self.last_txn_id()
        } else {
            None
        }
    }

    fn sync(
        &self,
        monitor_id: &str,
        requests: &MonitorRequests,
        resume: Option<String>,
    ) -> ClientResult<ApplySummary> {
        self.cache.resync(requests, || {
            let (resync, txn) = self.subscribe(monitor_id, requests, resume.as_deref())?;
            if let Some(txn) = txn {
                self.state.write().last_txn_id = Some(txn);
            }
            Ok(resync)
        })
    }

    fn subscribe(
        &self,
        monitor_id: &str,
        requests: &MonitorRequests,
        resume: Option<&str>,
    ) -> ClientResult<(Resync, Option<String>)> {
        let database = self.config.database.as_str();
        match self.config.monitor_method {
            MonitorMethod::MonitorCond => {
                let request = Request::monitor_cond(self.ids.next(), database, monitor_id, requests);
                let result = into_result(self.transport.call(&request)?)?;
                Ok((Resync::Full(self.decode(&result)?), None))
            }
            MonitorMethod::MonitorCondSince => {
                let request = Request::monitor_cond_since(
                    self.ids.next(),
                    database,
                    monitor_id,
                    requests,
                    resume,
                );
                let result = into_result(self.transport.call(&request)?)?;
                let reply = MonitorCondSinceReply::parse(&result)?;
                let updates = self.decode(&reply.updates)?;
                let resync = if reply.found && resume.is_some() {
                    info!(monitor = monitor_id, txn = %reply.last_txn_id, "monitor resumed");
                    Resync::Delta(updates)
                } else {
                    debug!(monitor = monitor_id, "monitor fully resynchronised");
                    Resync::Full(updates)
                };
                Ok((resync, Some(reply.last_txn_id)))
            }
        }
    }

    fn decode(&self, json: &Json) -> ClientResult<TableUpdates2> {
        let (updates, skipped) = TableUpdates2::decode(json, &self.schema)?;
        for fragment in skipped {
            warn!(
                table = %fragment.table,
                uuid = fragment.uuid.as_deref().unwrap_or("-"),
                error = %fragment.error,
                "skipping malformed update fragment"
            );
        }
        Ok(updates)
    }
}

impl std::fmt::Debug for MonitorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MonitorManager")
            .field("database", &self.config.database)
            .field("monitors", &state.monitors.keys().collect::<Vec<_>>())
            .field("last_txn_id", &state.last_txn_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatabaseModel;
    use crate::transport::MockTransport;
    use ovsdb_protocol::{AtomicType, ColumnSchema, ColumnType, TableSchema};
    use serde_json::json;

    const A: &str = "36b0a6a4-9a4b-4f4e-8d8f-6a0a6f0b1c01";
    const B: &str = "36b0a6a4-9a4b-4f4e-8d8f-6a0a6f0b1c02";

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new("Open_vSwitch", "1")
            .with_table(
                TableSchema::new("Bridge")
                    .with_column(ColumnSchema::new("name", ColumnType::scalar(AtomicType::String))),
            )
            .with_table(
                TableSchema::new("Port")
                    .with_column(ColumnSchema::new("name", ColumnType::scalar(AtomicType::String))),
            )
    }

    fn manager(config: ClientConfig) -> (MonitorManager, Arc<MockTransport>, Arc<TableCache>) {
        let cache = Arc::new(TableCache::new(Arc::new(DatabaseModel::new(schema())), 8));
        let transport = Arc::new(MockTransport::new());
        let manager = MonitorManager::new(
            config,
            Arc::clone(&cache),
            transport.clone(),
            Arc::new(RequestIds::default()),
        );
        (manager, transport, cache)
    }

    fn insert(uuid: &str, name: &str) -> Json {
        json!({"Bridge": {uuid: {"insert": {"name": name}}}})
    }

    #[test]
    fn monitor_applies_initial_state() {
        let (manager, transport, cache) = manager(ClientConfig::default());
        transport.push_result("monitor_cond", json!({"Bridge": {A: {"initial": {"name": "br0"}}}}));

        let summary = manager.monitor_tables("m1", &["Bridge"]).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(cache.len("Bridge"), 1);
        assert_eq!(manager.monitor_ids(), vec!["m1"]);
        assert_eq!(transport.sent()[0].method, "monitor_cond");
    }

    #[test]
    fn failed_monitor_is_forgotten() {
        let (manager, transport, _) = manager(ClientConfig::default());
        transport.push_error("monitor_cond", "unknown database", "x");
        assert!(matches!(
            manager.monitor_tables("m1", &["Bridge"]),
            Err(ClientError::Server(_))
        ));
        assert!(manager.monitor_ids().is_empty());
    }

    #[test]
    fn overlapping_monitors_are_rejected() {
        let (manager, transport, _) = manager(ClientConfig::default());
        transport.push_result("monitor_cond", json!({}));
        manager.monitor_tables("m1", &["Bridge"]).unwrap();
        assert!(matches!(
            manager.monitor_tables("m2", &["Bridge"]),
            Err(ClientError::Unsupported(_))
        ));
        assert!(matches!(
            manager.monitor_tables("m3", &["Nope"]),
            Err(ClientError::Codec(_))
        ));
    }

    #[test]
    fn notifications_update_cache_and_txn_id() {
        let (manager, transport, cache) = manager(ClientConfig::default());
        transport.push_result("monitor_cond", json!({}));
        manager.monitor_tables("m1", &["Bridge"]).unwrap();

        let update = Request::notification("update3", vec![json!("m1"), json!("txn-1"), insert(A, "br0")]);
        assert_eq!(manager.handle_notification(&update).unwrap().added, 1);
        assert_eq!(manager.last_txn_id().as_deref(), Some("txn-1"));

        let other = Request::notification("update2", vec![json!("other"), insert(B, "br1")]);
        assert_eq!(manager.handle_notification(&other).unwrap().events(), 0);
        assert_eq!(cache.len("Bridge"), 1);
    }

    #[test]
    fn cancel_keeps_rows_but_filters_later_updates() {
        let (manager, transport, cache) = manager(ClientConfig::default());
        transport.push_result("monitor_cond", json!({"Bridge": {A: {"initial": {"name": "br0"}}}}));
        transport.push_result("monitor_cancel", json!({}));
        manager.monitor_tables("m1", &["Bridge"]).unwrap();
        manager.cancel("m1").unwrap();

        assert_eq!(cache.len("Bridge"), 1);
        let summary = manager.apply(TableUpdates2::decode(&insert(B, "br1"), &schema()).unwrap().0);
        assert_eq!(summary.events(), 0);
        assert_eq!(cache.len("Bridge"), 1);
        assert!(matches!(manager.cancel("m1"), Err(ClientError::Unsupported(_))));
    }

    #[test]
    fn reconnect_resumes_when_server_knows_txn() {
        let config = ClientConfig::default()
            .with_monitor_method(MonitorMethod::MonitorCondSince)
            .with_resume_on_reconnect(true);
        let (manager, transport, cache) = manager(config);
        transport.push_result(
            "monitor_cond_since",
            json!([false, "t1", {"Bridge": {A: {"initial": {"name": "br0"}}}}]),
        );
        manager.monitor_tables("m1", &["Bridge"]).unwrap();
        assert_eq!(manager.last_txn_id().as_deref(), Some("t1"));

        transport.push_result("monitor_cond_since", json!([true, "t2", insert(B, "br1")]));
        let summary = manager.resubscribe().unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(cache.len("Bridge"), 2);
        assert_eq!(manager.last_txn_id().as_deref(), Some("t2"));
        assert_eq!(transport.sent()[1].params[3], json!("t1"));
    }

    #[test]
    fn reconnect_without_resume_clears_tables() {
        let (manager, transport, cache) = manager(ClientConfig::default());
        transport.push_result("monitor_cond", json!({"Bridge": {A: {"initial": {"name": "br0"}}}}));
        manager.monitor_tables("m1", &["Bridge"]).unwrap();

        transport.push_result("monitor_cond", json!({"Bridge": {B: {"initial": {"name": "br1"}}}}));
        manager.resubscribe().unwrap();
        assert!(cache.get("Bridge", A).is_none());
        assert!(cache.get("Bridge", B).is_some());
    }
}

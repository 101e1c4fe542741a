//! Per-session monitors and update delivery.

use crate::database::{ChangeSet, Database};
use crate::error::{ServerError, ServerResult};
use crossbeam_channel::{Sender, TrySendError};
use ovsdb_protocol::{
    filter2, CodecResult, DatabaseSchema, MonitorRequests, Request, Row, RowUpdate2,
    TableUpdate2, TableUpdates2, UpdateNotification,
};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Identifies one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One registered monitor.
#[derive(Debug, Clone)]
pub(crate) struct Monitor {
    requests: MonitorRequests,
    /// Created through `monitor_cond_since`; updates go out as `update3`.
    with_txn_id: bool,
}

impl Monitor {
    pub(crate) fn new(requests: MonitorRequests, with_txn_id: bool) -> Self {
        Self {
            requests,
            with_txn_id,
        }
    }

    /// Current contents of the monitored tables as `initial` records.
    pub(crate) fn initial(&self, db: &Database) -> TableUpdates2 {
        let mut updates = TableUpdates2::new();
        for (table, request) in &self.requests {
            if !request.select.initial {
                continue;
            }
            let mut update = TableUpdate2::new();
            for (uuid, row) in db.rows(table) {
                update.insert(uuid, RowUpdate2::initial(row.clone()));
            }
            if !update.is_empty() {
                updates.insert(table.clone(), update);
            }
        }
        filter2(&self.requests, &mut updates);
        updates
    }

    /// The part of `changes` this monitor asked for.
    pub(crate) fn updates(&self, changes: &ChangeSet, schema: &DatabaseSchema) -> TableUpdates2 {
        let mut updates = TableUpdates2::new();
        for (table, rows) in changes.tables() {
            let (Some(request), Some(table_schema)) = (self.requests.get(table), schema.table(table))
            else {
                continue;
            };
            let select = request.select;
            let mut update = TableUpdate2::new();
            for (uuid, change) in rows {
                let record = match (&change.old, &change.new) {
                    (None, Some(new)) if select.insert => RowUpdate2::insert(new.clone()),
                    (Some(_), None) if select.delete => RowUpdate2::delete(),
                    (Some(old), Some(new)) if select.modify => {
                        let mut diff = Row::diff(old, new, table_schema);
                        diff.retain(|column| request.wants_column(column));
                        if diff.is_empty() {
                            continue;
                        }
                        RowUpdate2::modify(diff)
                    }
                    _ => continue,
                };
                update.insert(uuid.clone(), record);
            }
            if !update.is_empty() {
                updates.insert(table, update);
            }
        }
        filter2(&self.requests, &mut updates);
        updates
    }
}

/// Monitors and notification queue of one session.
#[derive(Debug)]
pub(crate) struct SessionState {
    monitors: BTreeMap<String, Monitor>,
    tx: Sender<Request>,
    dropped: u64,
}

impl SessionState {
    pub(crate) fn new(tx: Sender<Request>) -> Self {
        Self {
            monitors: BTreeMap::new(),
            tx,
            dropped: 0,
        }
    }

    pub(crate) fn add_monitor(&mut self, id: &str, monitor: Monitor) -> ServerResult<()> {
        if self.monitors.contains_key(id) {
            return Err(ServerError::DuplicateMonitor(id.to_string()));
        }
        self.monitors.insert(id.to_string(), monitor);
        Ok(())
    }

    pub(crate) fn cancel(&mut self, id: &str) -> ServerResult<()> {
        self.monitors
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ServerError::UnknownMonitor(id.to_string()))
    }

    pub(crate) fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Notifications dropped because the queue was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Queues one notification per monitor interested in `changes`.
    ///
    /// Never blocks: a full queue loses the notification. Returns false
    /// once the receiving side is gone.
    pub(crate) fn publish(
        &mut self,
        session: SessionId,
        txn_id: &str,
        changes: &ChangeSet,
        schema: &DatabaseSchema,
    ) -> CodecResult<bool> {
        for (id, monitor) in &self.monitors {
            let updates = monitor.updates(changes, schema);
            if updates.is_empty() {
                continue;
            }
            let notification = UpdateNotification {
                monitor_id: id.clone(),
                last_txn_id: monitor.with_txn_id.then(|| txn_id.to_string()),
                updates: updates.to_json(schema)?,
            };
            match self.tx.try_send(notification.to_request()) {
                Ok(()) => debug!(%session, monitor = %id, rows = updates.row_count(), "update queued"),
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    warn!(%session, monitor = %id, dropped = self.dropped, "notification queue full, update dropped");
                }
                Err(TrySendError::Disconnected(_)) => return Ok(false),
            }
        }
        Ok(true)
    }
}

/// Renders a monitor id parameter the way notifications echo it back.
pub(crate) fn monitor_id(json: &Json) -> String {
    match json {
        Json::String(id) => id.clone(),
        other => other.to_string(),
    }
}

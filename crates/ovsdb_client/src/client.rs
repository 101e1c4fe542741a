//! Client facade.
//!
//! Ties the cache, the monitor manager and the transaction builder to one
//! transport. A dedicated thread drains [`Inbound`] messages: update
//! notifications are applied to the cache, reconnects resubscribe every
//! monitor.

use crate::cache::{ApplySummary, EventHandler, Subscription, TableCache};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::model::DatabaseModel;
use crate::monitor::MonitorManager;
use crate::transaction::TransactionBuilder;
use crate::transport::{into_result, Inbound, RequestIds, Transport};
use crossbeam_channel::{bounded, Receiver, Sender};
use ovsdb_protocol::{
    parse_transact_reply, DatabaseSchema, MonitorRequest, MonitorRequests, Operation,
    OperationResult, Request,
};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Name of the update-draining thread.
const UPDATE_THREAD: &str = "ovsdb-client-updates";

/// An OVSDB client.
pub struct Client {
    config: ClientConfig,
    model: Arc<DatabaseModel>,
    cache: Arc<TableCache>,
    monitors: Arc<MonitorManager>,
    transport: Arc<dyn Transport>,
    ids: Arc<RequestIds>,
    inbound: Sender<Inbound>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Creates a client and starts its update thread.
    pub fn new(
        config: ClientConfig,
        model: DatabaseModel,
        transport: Arc<dyn Transport>,
    ) -> ClientResult<Self> {
        if model.schema().name != config.database {
            return Err(ClientError::Unsupported(format!(
                "schema is for database {}, client is configured for {}",
                model.schema().name,
                config.database
            )));
        }
        let model = Arc::new(model);
        let ids = Arc::new(RequestIds::default());
        let cache = Arc::new(TableCache::new(
            Arc::clone(&model),
            config.event_queue_capacity,
        ));
        let monitors = Arc::new(MonitorManager::new(
            config.clone(),
            Arc::clone(&cache),
            Arc::clone(&transport),
            Arc::clone(&ids),
        ));

        let (inbound, rx) = bounded(config.update_queue_capacity.max(1));
        let worker_monitors = Arc::clone(&monitors);
        let worker = thread::Builder::new()
            .name(UPDATE_THREAD.to_string())
            .spawn(move || drain_updates(rx, worker_monitors))
            .map_err(|e| ClientError::transport_fatal(format!("failed to spawn update thread: {e}")))?;

        info!(database = %config.database, "client started");
        Ok(Self {
            config,
            model,
            cache,
            monitors,
            transport,
            ids,
            inbound,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Fetches a database schema through `transport`.
    pub fn fetch_schema(transport: &dyn Transport, database: &str) -> ClientResult<DatabaseSchema> {
        let response = transport.call(&Request::get_schema(0, database))?;
        Ok(DatabaseSchema::from_json_value(&into_result(response)?)?)
    }

    /// Sender the transport uses to hand notifications and reconnects to
    /// the update thread.
    pub fn inbound(&self) -> Sender<Inbound> {
        self.inbound.clone()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Registered models and their schema.
    pub fn model(&self) -> &Arc<DatabaseModel> {
        &self.model
    }

    /// The table cache.
    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    /// The monitor manager.
    pub fn monitors(&self) -> &Arc<MonitorManager> {
        &self.monitors
    }

    /// Registers a synchronous cache observer.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.cache.add_handler(handler);
    }

    /// Opens a bounded asynchronous cache event queue.
    pub fn subscribe(&self) -> Subscription {
        self.cache.subscribe()
    }

    /// Starts a monitor.
    pub fn monitor(&self, monitor_id: &str, requests: MonitorRequests) -> ClientResult<ApplySummary> {
        self.monitors.monitor(monitor_id, requests)
    }

    /// Monitors every column of every table with a registered model.
    pub fn monitor_all(&self, monitor_id: &str) -> ClientResult<ApplySummary> {
        let requests: MonitorRequests = self
            .model
            .schema()
            .tables()
            .filter(|table| self.model.has_model(&table.name))
            .map(|table| (table.name.clone(), MonitorRequest::all_columns(table)))
            .collect();
        self.monitors.monitor(monitor_id, requests)
    }

    /// Cancels a monitor.
    pub fn cancel_monitor(&self, monitor_id: &str) -> ClientResult<()> {
        self.monitors.cancel(monitor_id)
    }

    /// Starts a transaction.
    pub fn transaction(&self) -> TransactionBuilder {
        TransactionBuilder::new(Arc::clone(&self.model))
    }

    /// Sends a built transaction and classifies its reply.
    ///
    /// Returns the per-operation results on success. Any failed operation
    /// yields [`ClientError::Transaction`] carrying every per-operation
    /// error.
    pub fn transact(&self, transaction: &TransactionBuilder) -> ClientResult<Vec<OperationResult>> {
        let results = self.send_operations(transaction.operations())?;
        transaction.check(&results)?;
        Ok(results)
    }

    /// Sends raw operations and classifies the reply.
    pub fn transact_operations(&self, operations: &[Operation]) -> ClientResult<Vec<OperationResult>> {
        let results = self.send_operations(operations)?;
        ovsdb_protocol::check_operation_results(&results, operations)?;
        Ok(results)
    }

    fn send_operations(&self, operations: &[Operation]) -> ClientResult<Vec<OperationResult>> {
        if operations.is_empty() {
            return Err(ClientError::Unsupported("empty transaction".into()));
        }
        let request = Request::transact(self.ids.next(), self.model.schema(), operations)?;
        debug!(operations = operations.len(), "sending transaction");
        let result = into_result(self.transport.call(&request)?)?;
        Ok(parse_transact_reply(&result)?)
    }

    /// Round-trips an `echo` request.
    pub fn echo(&self) -> ClientResult<Json> {
        into_result(self.transport.call(&Request::echo(self.ids.next()))?)
    }

    /// Lists the databases the server hosts.
    pub fn list_dbs(&self) -> ClientResult<Vec<String>> {
        let result = into_result(self.transport.call(&Request::list_dbs(self.ids.next()))?)?;
        Ok(serde_json::from_value(result).map_err(ovsdb_protocol::CodecError::from)?)
    }

    /// Returns true if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Stops the update thread and closes the transport.
    pub fn shutdown(&self) -> ClientResult<()> {
        if let Some(worker) = self.worker.lock().take() {
            // The thread may already be gone if every sender was dropped.
            let _ = self.inbound.send(Inbound::Shutdown);
            if worker.join().is_err() {
                warn!("update thread panicked");
            }
            info!(database = %self.config.database, "client stopped");
        }
        if self.transport.is_connected() {
            self.transport.close()?;
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "client shutdown failed");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("monitors", &self.monitors)
            .field("cache", &self.cache)
            .finish()
    }
}

fn drain_updates(rx: Receiver<Inbound>, monitors: Arc<MonitorManager>) {
    for message in rx.iter() {
        match message {
            Inbound::Notification(request) => {
                if let Err(err) = monitors.handle_notification(&request) {
                    warn!(method = %request.method, error = %err, "update notification dropped");
                }
            }
            Inbound::Reconnected => {
                if let Err(err) = monitors.resubscribe() {
                    warn!(error = %err, "resubscribe after reconnect failed");
                }
            }
            Inbound::Shutdown => break,
        }
    }
    debug!("update thread exiting");
}

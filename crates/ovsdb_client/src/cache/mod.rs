//! In-memory mirror of monitored tables.
//!
//! The cache applies update2 batches, keeps unique indexes current and
//! reports every change to registered observers. A batch is applied under
//! one write-lock acquisition. Its events are dispatched afterwards, outside
//! the lock, in this order:
//!
//! 1. every delete of the batch
//! 2. every add
//! 3. every update
//!
//! Within each group tables keep the order in which the server sent them.

mod event;
mod table;

pub use event::{CacheEvent, CachedRow, EventHandler, EventHandlerFns, EventKind, Subscription};

use crate::error::{ClientError, ClientResult};
use crate::model::{DatabaseModel, Model};
use event::{notify, Subscriber};
use ovsdb_protocol::{
    filter2, MonitorRequests, Row, RowUpdate2, TableSchema, TableUpdate2, TableUpdates2, Value,
    UUID_COLUMN,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use table::RowCache;
use tracing::{debug, warn};

/// Outcome of a resynchronisation fetch.
#[derive(Debug, Clone)]
pub enum Resync {
    /// The batch is the complete state of the requested tables, which are
    /// cleared first.
    Full(TableUpdates2),
    /// The batch continues the cached state.
    Delta(TableUpdates2),
}

/// Counts of what one batch did to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Rows added.
    pub added: usize,
    /// Rows changed.
    pub updated: usize,
    /// Rows removed.
    pub deleted: usize,
    /// Row fragments skipped as malformed or inconsistent.
    pub skipped: usize,
}

impl ApplySummary {
    /// Total number of events produced.
    pub fn events(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

#[derive(Default)]
struct Pending {
    deletes: Vec<CacheEvent>,
    adds: Vec<CacheEvent>,
    updates: Vec<CacheEvent>,
    skipped: usize,
}

impl Pending {
    fn summary(&self) -> ApplySummary {
        ApplySummary {
            added: self.adds.len(),
            updated: self.updates.len(),
            deleted: self.deletes.len(),
            skipped: self.skipped,
        }
    }

    fn into_events(self) -> Vec<CacheEvent> {
        let mut events = self.deletes;
        events.extend(self.adds);
        events.extend(self.updates);
        events
    }
}

/// Indexed mirror of the monitored tables.
pub struct TableCache {
    model: Arc<DatabaseModel>,
    tables: RwLock<HashMap<String, RowCache>>,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    event_capacity: usize,
}

impl TableCache {
    /// Creates an empty cache for the tables of `model`'s schema.
    pub fn new(model: Arc<DatabaseModel>, event_capacity: usize) -> Self {
        Self {
            model,
            tables: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            event_capacity: event_capacity.max(1),
        }
    }

    /// The models the cache decodes rows into.
    pub fn model(&self) -> &Arc<DatabaseModel> {
        &self.model
    }

    /// Registers a synchronous observer.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Opens a bounded asynchronous event queue.
    ///
    /// When the queue is full new events are dropped and counted on the
    /// returned subscription.
    pub fn subscribe(&self) -> Subscription {
        let (subscriber, subscription) = Subscription::bounded(self.event_capacity);
        self.subscribers.lock().push(subscriber);
        subscription
    }

    /// Filters a batch through `requests` and applies it.
    pub fn apply(&self, requests: &MonitorRequests, updates: TableUpdates2) -> ApplySummary {
        let pending = {
            let mut tables = self.tables.write();
            self.apply_locked(&mut tables, requests, updates)
        };
        let summary = pending.summary();
        self.dispatch(pending.into_events());
        summary
    }

    /// Resynchronises under the write lock.
    ///
    /// `fetch` runs while the lock is held, so no other batch can interleave
    /// with the clear and refill. A full resync first clears the tables named
    /// in `requests`, without delete events.
    pub fn resync<F>(&self, requests: &MonitorRequests, fetch: F) -> ClientResult<ApplySummary>
    where
        F: FnOnce() -> ClientResult<Resync>,
    {
        let pending = {
            let mut tables = self.tables.write();
            let updates = match fetch()? {
                Resync::Full(updates) => {
                    let mut cleared = 0;
                    for name in requests.keys() {
                        if let Some(rows) = tables.get_mut(name) {
                            cleared += rows.len();
                            rows.clear();
                        }
                    }
                    debug!(rows = cleared, "cache cleared for full resync");
                    updates
                }
                Resync::Delta(updates) => updates,
            };
            self.apply_locked(&mut tables, requests, updates)
        };
        let summary = pending.summary();
        self.dispatch(pending.into_events());
        Ok(summary)
    }

    /// Removes every row without emitting events.
    pub fn clear(&self) {
        self.tables.write().values_mut().for_each(RowCache::clear);
    }

    /// Removes every row of `table` without emitting events.
    pub fn clear_table(&self, table: &str) {
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.clear();
        }
    }

    fn apply_locked(
        &self,
        tables: &mut HashMap<String, RowCache>,
        requests: &MonitorRequests,
        mut updates: TableUpdates2,
    ) -> Pending {
        filter2(requests, &mut updates);
        let mut pending = Pending::default();
        for (name, update) in updates {
            let Some(schema) = self.model.schema().table(&name) else {
                warn!(table = %name, "update for table not in schema");
                pending.skipped += update.len();
                continue;
            };
            let rows = tables
                .entry(name.clone())
                .or_insert_with(|| RowCache::new(schema));
            self.apply_table(&name, schema, rows, update, &mut pending);
        }
        pending
    }

    fn apply_table(
        &self,
        name: &str,
        schema: &TableSchema,
        rows: &mut RowCache,
        update: TableUpdate2,
        pending: &mut Pending,
    ) {
        let mut modifies = Vec::new();
        let mut inserts = Vec::new();
        for (uuid, row_update) in update {
            let RowUpdate2 {
                initial,
                insert,
                modify,
                delete,
            } = row_update;
            let new_row = initial.or(insert);
            if !rows.contains(&uuid) && new_row.is_none() {
                if modify.is_some() {
                    warn!(table = name, uuid = %uuid, "modify for unknown row");
                    pending.skipped += 1;
                } else {
                    debug!(table = name, uuid = %uuid, "delete for unknown row");
                }
                continue;
            }
            if delete.is_some() {
                if let Some(row) = rows.remove(&uuid) {
                    pending.deletes.push(CacheEvent::Delete {
                        table: name.to_string(),
                        row,
                    });
                }
            }
            if let Some(row) = new_row {
                inserts.push((uuid, row));
            } else if let Some(diff) = modify {
                modifies.push((uuid, diff));
            }
        }

        for (uuid, diff) in modifies {
            let Some(existing) = rows.get(&uuid) else {
                continue;
            };
            let mut row = existing.row().clone();
            if !row.apply_diff(&diff, schema) {
                continue;
            }
            if let Some(event) = self.install(name, rows, uuid, row, pending) {
                pending.updates.push(event);
            }
        }

        for (uuid, mut row) in inserts {
            row.insert(UUID_COLUMN, Value::uuid(uuid.clone()));
            if rows.get(&uuid).is_some_and(|existing| *existing.row() == row) {
                continue;
            }
            if let Some(event) = self.install(name, rows, uuid, row, pending) {
                match event {
                    CacheEvent::Update { .. } => pending.updates.push(event),
                    _ => pending.adds.push(event),
                }
            }
        }
    }

    /// Decodes and stores a row, returning the event it produces.
    fn install(
        &self,
        table: &str,
        rows: &mut RowCache,
        uuid: String,
        row: Row,
        pending: &mut Pending,
    ) -> Option<CacheEvent> {
        let model = match self.model.decode_row(table, &row).transpose() {
            Ok(model) => model,
            Err(err) => {
                warn!(table, uuid = %uuid, error = %err, "row does not fit model, skipped");
                pending.skipped += 1;
                return None;
            }
        };
        let entry = CachedRow::new(uuid, row, model);
        Some(match rows.install(entry.clone()) {
            Some(old) => CacheEvent::Update {
                table: table.to_string(),
                old,
                new: entry,
            },
            None => CacheEvent::Add {
                table: table.to_string(),
                row: entry,
            },
        })
    }

    fn dispatch(&self, events: Vec<CacheEvent>) {
        if events.is_empty() {
            return;
        }
        let handlers = self.handlers.read().clone();
        for event in &events {
            for handler in &handlers {
                notify(handler.as_ref(), event);
            }
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| events.iter().all(|event| subscriber.offer(event)));
    }

    /// Returns a cached row.
    pub fn get(&self, table: &str, uuid: &str) -> Option<CachedRow> {
        self.tables.read().get(table)?.get(uuid).cloned()
    }

    /// Returns every cached row of `table`, ordered by UUID.
    pub fn list(&self, table: &str) -> Vec<CachedRow> {
        self.tables
            .read()
            .get(table)
            .map(RowCache::sorted)
            .unwrap_or_default()
    }

    /// Returns the plain rows of `table`, ordered by UUID.
    pub fn rows(&self, table: &str) -> Vec<Arc<Row>> {
        self.list(table).iter().map(CachedRow::shared_row).collect()
    }

    /// Number of cached rows in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, RowCache::len)
    }

    /// Returns true if no table holds a row.
    pub fn is_empty(&self) -> bool {
        self.tables.read().values().all(|rows| rows.len() == 0)
    }

    /// Returns the model of a cached row.
    pub fn get_model<M: Model>(&self, uuid: &str) -> ClientResult<Option<M>> {
        self.model.mapper::<M>()?;
        Ok(self
            .get(M::table_name(), uuid)
            .and_then(|row| row.model::<M>()))
    }

    /// Returns the models of every cached row, ordered by UUID.
    pub fn list_models<M: Model>(&self) -> ClientResult<Vec<M>> {
        self.model.mapper::<M>()?;
        Ok(self
            .list(M::table_name())
            .iter()
            .filter_map(CachedRow::model::<M>)
            .collect())
    }

    /// Finds a row through the schema index over exactly `columns`.
    ///
    /// `values` follow the order of `columns`.
    pub fn find_by_index(
        &self,
        table: &str,
        columns: &[&str],
        values: &[Value],
    ) -> ClientResult<Option<CachedRow>> {
        let schema = self.model.schema().require_table(table)?;
        let covered = schema.indexes.iter().any(|index| {
            index.len() == columns.len() && index.iter().all(|c| columns.contains(&c.as_str()))
        });
        if !covered {
            return Err(ClientError::Unsupported(format!(
                "no index on {table} over {columns:?}"
            )));
        }
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.find(columns, values))
            .flatten()
            .cloned())
    }

    /// Finds the cached counterpart of `model`.
    ///
    /// Uses `_uuid` when set, otherwise the first schema index whose fields
    /// are all set on the model.
    pub fn lookup<M: Model>(&self, model: &M) -> ClientResult<M> {
        let mapper = self.model.mapper::<M>()?;
        let table = M::table_name();
        let uuid = mapper.uuid(model);
        if !uuid.is_empty() {
            return self.get_model::<M>(&uuid)?.ok_or(ClientError::NotFound {
                table: table.to_string(),
                key: uuid,
            });
        }

        let mut tried = Vec::new();
        for index in &mapper.table().indexes {
            let columns: Vec<&str> = index.iter().map(String::as_str).collect();
            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                if mapper.binding(column).is_none() || mapper.is_unset(model, column)? {
                    break;
                }
                values.push(mapper.field_value(model, column)?);
            }
            if values.len() != columns.len() {
                continue;
            }
            if let Some(model) = self
                .find_by_index(table, &columns, &values)?
                .and_then(|row| row.model::<M>())
            {
                return Ok(model);
            }
            tried.push(columns.join(","));
        }
        Err(ClientError::NotFound {
            table: table.to_string(),
            key: if tried.is_empty() {
                "no usable index".to_string()
            } else {
                tried.join(" | ")
            },
        })
    }
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("TableCache")
            .field("database", &self.model.schema().name)
            .field(
                "rows",
                &tables
                    .iter()
                    .map(|(name, rows)| (name.clone(), rows.len()))
                    .collect::<HashMap<_, _>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldBinding;
    use ovsdb_protocol::{
        AtomicType, BaseType, ColumnSchema, ColumnType, DatabaseSchema, MonitorRequest,
        UNLIMITED,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Bridge {
        uuid: String,
        name: String,
        external_ids: BTreeMap<String, String>,
    }

    impl Model for Bridge {
        fn table_name() -> &'static str {
            "Bridge"
        }

        fn bindings() -> Vec<FieldBinding<Self>> {
            vec![
                FieldBinding::new("_uuid", |b| &b.uuid, |b| &mut b.uuid),
                FieldBinding::new("name", |b| &b.name, |b| &mut b.name),
                FieldBinding::new("external_ids", |b| &b.external_ids, |b| &mut b.external_ids),
            ]
        }
    }

    fn schema() -> DatabaseSchema {
        let string_map = ColumnType::map(
            BaseType::atomic(AtomicType::String),
            BaseType::atomic(AtomicType::String),
            0,
            UNLIMITED,
        );
        DatabaseSchema::new("test", "1")
            .with_table(
                TableSchema::new("Bridge")
                    .with_column(ColumnSchema::new("name", ColumnType::scalar(AtomicType::String)))
                    .with_column(ColumnSchema::new("external_ids", string_map.clone()))
                    .with_index(&["name"]),
            )
            .with_table(
                TableSchema::new("Open_vSwitch")
                    .with_column(ColumnSchema::new("external_ids", string_map)),
            )
    }

    fn cache() -> TableCache {
        let model = DatabaseModel::new(schema()).register::<Bridge>().unwrap();
        TableCache::new(Arc::new(model), 16)
    }

    fn all_requests() -> MonitorRequests {
        let schema = schema();
        schema
            .tables()
            .map(|t| (t.name.clone(), MonitorRequest::all_columns(t)))
            .collect()
    }

    fn bridge(name: &str) -> Row {
        Row::new().with("name", name)
    }

    fn batch(table: &str, rows: Vec<(&str, RowUpdate2)>) -> TableUpdates2 {
        let mut update = TableUpdate2::new();
        for (uuid, row) in rows {
            update.insert(uuid, row);
        }
        TableUpdates2::new().with_table(table, update)
    }

    fn recorder(cache: &TableCache) -> Arc<StdMutex<Vec<String>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let (a, u, d) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        cache.add_handler(Arc::new(
            EventHandlerFns::new()
                .on_add(move |t, r| a.lock().unwrap().push(format!("add {t} {}", r.uuid())))
                .on_update(move |t, _, r| u.lock().unwrap().push(format!("update {t} {}", r.uuid())))
                .on_delete(move |t, r| d.lock().unwrap().push(format!("delete {t} {}", r.uuid()))),
        ));
        log
    }

    #[test]
    fn insert_modify_delete_lifecycle() {
        let cache = cache();
        let log = recorder(&cache);
        let requests = all_requests();

        cache.apply(&requests, batch("Bridge", vec![("b1", RowUpdate2::insert(bridge("br0")))]));
        let model: Bridge = cache.get_model("b1").unwrap().unwrap();
        assert_eq!(model.uuid, "b1");
        assert_eq!(model.name, "br0");

        let diff = Row::new().with("external_ids", Value::map([("k", "v")]));
        let summary = cache.apply(&requests, batch("Bridge", vec![("b1", RowUpdate2::modify(diff))]));
        assert_eq!(summary.updated, 1);
        let model: Bridge = cache.get_model("b1").unwrap().unwrap();
        assert_eq!(model.external_ids.get("k").map(String::as_str), Some("v"));

        cache.apply(&requests, batch("Bridge", vec![("b1", RowUpdate2::delete())]));
        assert!(cache.get("Bridge", "b1").is_none());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["add Bridge b1", "update Bridge b1", "delete Bridge b1"]
        );
    }

    #[test]
    fn unrequested_columns_never_reach_the_cache() {
        let cache = cache();
        let requests = MonitorRequests::from([("Bridge".to_string(), MonitorRequest::new(["name"]))]);
        cache.apply(&requests, batch("Bridge", vec![("foo", RowUpdate2::insert(bridge("bar")))]));

        let row = Row::new()
            .with("name", "bar")
            .with("external_ids", Value::map([("foo", "bar")]));
        cache.apply(&requests, batch("Bridge", vec![("foo", RowUpdate2::insert(row))]));
        cache.apply(
            &requests,
            batch("Open_vSwitch", vec![("ovs", RowUpdate2::insert(Row::new()))]),
        );

        let cached = cache.get("Bridge", "foo").unwrap();
        assert_eq!(
            cached.row(),
            &Row::new().with("_uuid", Value::uuid("foo")).with("name", "bar")
        );
        assert_eq!(cache.len("Open_vSwitch"), 0);
    }

    #[test]
    fn reinsert_is_idempotent() {
        let cache = cache();
        let log = recorder(&cache);
        let requests = all_requests();
        let insert = batch("Bridge", vec![("b1", RowUpdate2::insert(bridge("br0")))]);
        cache.apply(&requests, insert.clone());
        let once = cache.get("Bridge", "b1").unwrap().row().clone();
        let summary = cache.apply(&requests, insert);
        assert_eq!(summary.events(), 0);
        assert_eq!(cache.get("Bridge", "b1").unwrap().row(), &once);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn deletes_dispatch_before_inserts() {
        let cache = cache();
        let requests = all_requests();
        cache.apply(&requests, batch("Bridge", vec![("x", RowUpdate2::insert(bridge("old")))]));
        let log = recorder(&cache);

        let replace = RowUpdate2 {
            insert: Some(bridge("new")),
            delete: Some(Row::new()),
            ..RowUpdate2::default()
        };
        let updates = TableUpdates2::new()
            .with_table(
                "Open_vSwitch",
                TableUpdate2::new().with_row("o", RowUpdate2::insert(Row::new())),
            )
            .with_table("Bridge", TableUpdate2::new().with_row("x", replace));
        cache.apply(&requests, updates);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["delete Bridge x", "add Open_vSwitch o", "add Bridge x"]
        );
    }

    #[test]
    fn unknown_rows_are_skipped() {
        let cache = cache();
        let requests = all_requests();
        let diff = Row::new().with("name", "x");
        let summary = cache.apply(
            &requests,
            batch(
                "Bridge",
                vec![("nope", RowUpdate2::modify(diff)), ("gone", RowUpdate2::delete())],
            ),
        );
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.events(), 0);
        assert!(cache.is_empty());
    }

    fn holder(cache: &TableCache, name: &str) -> Option<String> {
        cache
            .find_by_index("Bridge", &["name"], &[Value::from(name)])
            .unwrap()
            .map(|row| row.uuid().to_string())
    }

    fn name_of(cache: &TableCache, uuid: &str) -> Option<Value> {
        cache.get("Bridge", uuid)?.row().get("name").cloned()
    }

    #[test]
    fn released_index_key_can_be_reused_in_one_batch() {
        let cache = cache();
        let requests = all_requests();
        cache.apply(&requests, batch("Bridge", vec![("a", RowUpdate2::insert(bridge("br0")))]));
        let summary = cache.apply(
            &requests,
            batch(
                "Bridge",
                vec![
                    ("a", RowUpdate2::modify(bridge("br9"))),
                    ("b", RowUpdate2::insert(bridge("br0"))),
                ],
            ),
        );
        assert_eq!(summary.skipped, 0);
        assert_eq!(holder(&cache, "br0").as_deref(), Some("b"));
        assert_eq!(holder(&cache, "br9").as_deref(), Some("a"));
    }

    #[test]
    fn rows_swapping_names_in_one_batch() {
        let cache = cache();
        let requests = all_requests();
        cache.apply(
            &requests,
            batch(
                "Bridge",
                vec![
                    ("a", RowUpdate2::insert(bridge("br0"))),
                    ("b", RowUpdate2::insert(bridge("br1"))),
                ],
            ),
        );
        let summary = cache.apply(
            &requests,
            batch(
                "Bridge",
                vec![
                    ("a", RowUpdate2::modify(bridge("br1"))),
                    ("b", RowUpdate2::modify(bridge("br0"))),
                ],
            ),
        );
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(name_of(&cache, "a"), Some(Value::from("br1")));
        assert_eq!(name_of(&cache, "b"), Some(Value::from("br0")));
        assert_eq!(holder(&cache, "br0").as_deref(), Some("b"));
        assert_eq!(holder(&cache, "br1").as_deref(), Some("a"));
    }

    #[test]
    fn name_taken_over_while_its_holder_is_renamed() {
        let cache = cache();
        let requests = all_requests();
        cache.apply(
            &requests,
            batch(
                "Bridge",
                vec![
                    ("a", RowUpdate2::insert(bridge("br0"))),
                    ("b", RowUpdate2::insert(bridge("br1"))),
                ],
            ),
        );
        // `a` sorts first, so it claims br1 before `b` lets go of it.
        let summary = cache.apply(
            &requests,
            batch(
                "Bridge",
                vec![
                    ("a", RowUpdate2::modify(bridge("br1"))),
                    ("b", RowUpdate2::modify(bridge("br2"))),
                ],
            ),
        );
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(name_of(&cache, "a"), Some(Value::from("br1")));
        assert_eq!(name_of(&cache, "b"), Some(Value::from("br2")));
        assert_eq!(holder(&cache, "br0"), None);
        assert_eq!(holder(&cache, "br1").as_deref(), Some("a"));
        assert_eq!(holder(&cache, "br2").as_deref(), Some("b"));

        // Deleting the renamed row leaves the key it gave up alone.
        cache.apply(&requests, batch("Bridge", vec![("b", RowUpdate2::delete())]));
        assert_eq!(holder(&cache, "br1").as_deref(), Some("a"));
        assert_eq!(holder(&cache, "br2"), None);
    }

    #[test]
    fn full_resync_clears_without_delete_events() {
        let cache = cache();
        let requests = all_requests();
        cache.apply(&requests, batch("Bridge", vec![("a", RowUpdate2::insert(bridge("br0")))]));
        let log = recorder(&cache);

        let summary = cache
            .resync(&requests, || {
                Ok(Resync::Full(batch(
                    "Bridge",
                    vec![("b", RowUpdate2::initial(bridge("br1")))],
                )))
            })
            .unwrap();
        assert_eq!(summary.added, 1);
        assert!(cache.get("Bridge", "a").is_none());
        assert_eq!(*log.lock().unwrap(), vec!["add Bridge b"]);
    }

    #[test]
    fn failed_fetch_leaves_cache_alone() {
        let cache = cache();
        let requests = all_requests();
        cache.apply(&requests, batch("Bridge", vec![("a", RowUpdate2::insert(bridge("br0")))]));
        let result = cache.resync(&requests, || Err(ClientError::NotConnected));
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert_eq!(cache.len("Bridge"), 1);
    }

    #[test]
    fn lookup_by_uuid_and_index() {
        let cache = cache();
        let requests = all_requests();
        cache.apply(&requests, batch("Bridge", vec![("a", RowUpdate2::insert(bridge("br0")))]));

        let by_name = cache
            .lookup(&Bridge {
                name: "br0".into(),
                ..Bridge::default()
            })
            .unwrap();
        assert_eq!(by_name.uuid, "a");

        let by_uuid = cache
            .lookup(&Bridge {
                uuid: "a".into(),
                ..Bridge::default()
            })
            .unwrap();
        assert_eq!(by_uuid.name, "br0");

        assert!(matches!(
            cache.lookup(&Bridge::default()),
            Err(ClientError::NotFound { .. })
        ));
        assert!(matches!(
            cache.find_by_index("Bridge", &["external_ids"], &[]),
            Err(ClientError::Unsupported(_))
        ));
    }

    #[test]
    fn subscribers_receive_owned_events() {
        let cache = cache();
        let subscription = cache.subscribe();
        cache.apply(
            &all_requests(),
            batch("Bridge", vec![("a", RowUpdate2::insert(bridge("br0")))]),
        );
        let event = subscription.try_recv().unwrap();
        assert_eq!(event.kind(), EventKind::Add);
        let mut model: Bridge = match event {
            CacheEvent::Add { row, .. } => row.model().unwrap(),
            other => panic!("unexpected event {other:?}"),
        };
        model.name = "changed".into();
        let cached: Bridge = cache.get_model("a").unwrap().unwrap();
        assert_eq!(cached.name, "br0");
    }
}

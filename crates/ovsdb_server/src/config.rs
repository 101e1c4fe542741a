//! Server configuration.

/// Configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the served database. Must match the schema name.
    pub database: String,
    /// Maximum number of operations in one `transact` request.
    pub max_operations_per_transaction: usize,
    /// Capacity of each session's notification queue.
    pub monitor_queue_capacity: usize,
    /// Number of committed transactions kept for `monitor_cond_since`.
    pub history_limit: usize,
}

impl ServerConfig {
    /// Creates a configuration serving `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            max_operations_per_transaction: 1024,
            monitor_queue_capacity: 256,
            history_limit: 128,
        }
    }

    /// Sets the maximum number of operations per transaction.
    pub fn with_max_operations_per_transaction(mut self, max: usize) -> Self {
        self.max_operations_per_transaction = max;
        self
    }

    /// Sets the notification queue capacity.
    pub fn with_monitor_queue_capacity(mut self, capacity: usize) -> Self {
        self.monitor_queue_capacity = capacity.max(1);
        self
    }

    /// Sets the number of transactions kept for resumption.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("Open_vSwitch")
    }
}

//! Configuration for the client engine.

/// Which monitor method the client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorMethod {
    /// `monitor_cond`: every (re)subscription receives the full state.
    #[default]
    MonitorCond,
    /// `monitor_cond_since`: a resubscription may resume from the last
    /// transaction id seen.
    MonitorCondSince,
}

/// Configuration for a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Database to monitor and transact against.
    pub database: String,
    /// Monitor method.
    pub monitor_method: MonitorMethod,
    /// Whether to try resuming the monitor after a reconnect.
    pub resume_on_reconnect: bool,
    /// Capacity of each asynchronous cache subscriber queue.
    pub event_queue_capacity: usize,
    /// Capacity of the inbound notification queue.
    pub update_queue_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration for `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            monitor_method: MonitorMethod::MonitorCond,
            resume_on_reconnect: false,
            event_queue_capacity: 1024,
            update_queue_capacity: 256,
        }
    }

    /// Sets the monitor method.
    pub fn with_monitor_method(mut self, method: MonitorMethod) -> Self {
        self.monitor_method = method;
        self
    }

    /// Enables or disables resuming after reconnect.
    pub fn with_resume_on_reconnect(mut self, resume: bool) -> Self {
        self.resume_on_reconnect = resume;
        self
    }

    /// Sets the subscriber queue capacity.
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }

    /// Sets the inbound notification queue capacity.
    pub fn with_update_queue_capacity(mut self, capacity: usize) -> Self {
        self.update_queue_capacity = capacity.max(1);
        self
    }

    /// Returns true if reconnects should try `monitor_cond_since` resumption.
    pub fn resumes(&self) -> bool {
        self.resume_on_reconnect && self.monitor_method == MonitorMethod::MonitorCondSince
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("Open_vSwitch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.database, "Open_vSwitch");
        assert_eq!(config.monitor_method, MonitorMethod::MonitorCond);
        assert!(!config.resumes());
    }

    #[test]
    fn builder() {
        let config = ClientConfig::new("db")
            .with_monitor_method(MonitorMethod::MonitorCondSince)
            .with_resume_on_reconnect(true)
            .with_event_queue_capacity(0)
            .with_update_queue_capacity(8);
        assert!(config.resumes());
        assert_eq!(config.event_queue_capacity, 1);
        assert_eq!(config.update_queue_capacity, 8);
    }
}

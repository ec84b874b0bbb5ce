//! Store key naming.
//!
//! Every key is derived from a namespace plus connection and/or queue name.
//! Queue names are wrapped in brackets so a queue called `x::ready` can never
//! be confused with the ready list of queue `x`.

/// Default namespace prefix for all keys.
pub const DEFAULT_NAMESPACE: &str = "relq";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    namespace: String,
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Set of all known connection names.
    pub fn connections(&self) -> String {
        format!("{}::connections", self.namespace)
    }

    /// Set of all opened queue names.
    pub fn queues(&self) -> String {
        format!("{}::queues", self.namespace)
    }

    pub fn heartbeat(&self, connection: &str) -> String {
        format!("{}::connection::{}::heartbeat", self.namespace, connection)
    }

    /// Set of queue names the connection is consuming.
    pub fn connection_queues(&self, connection: &str) -> String {
        format!("{}::connection::{}::queues", self.namespace, connection)
    }

    pub fn consumers(&self, connection: &str, queue: &str) -> String {
        format!(
            "{}::connection::{}::queue::[{}]::consumers",
            self.namespace, connection, queue
        )
    }

    pub fn unacked(&self, connection: &str, queue: &str) -> String {
        format!(
            "{}::connection::{}::queue::[{}]::unacked",
            self.namespace, connection, queue
        )
    }

    pub fn ready(&self, queue: &str) -> String {
        format!("{}::queue::[{}]::ready", self.namespace, queue)
    }

    pub fn rejected(&self, queue: &str) -> String {
        format!("{}::queue::[{}]::rejected", self.namespace, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = Keys::new("test");
        assert_eq!(keys.connections(), "test::connections");
        assert_eq!(keys.queues(), "test::queues");
        assert_eq!(keys.heartbeat("c1"), "test::connection::c1::heartbeat");
        assert_eq!(keys.ready("q"), "test::queue::[q]::ready");
        assert_eq!(keys.rejected("q"), "test::queue::[q]::rejected");
        assert_eq!(
            keys.unacked("c1", "q"),
            "test::connection::c1::queue::[q]::unacked"
        );
    }

    #[test]
    fn bracketed_queue_names_do_not_collide() {
        let keys = Keys::default();
        assert_ne!(keys.ready("a]::ready"), keys.ready("a"));
        assert_ne!(keys.ready("q"), keys.rejected("q"));
        assert_ne!(keys.unacked("c", "q"), keys.consumers("c", "q"));
        assert_ne!(keys.unacked("c1", "q"), keys.unacked("c2", "q"));
    }
}

//! Connection registry: id allocation and lookup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use tcpmux_connection::{ConnId, Connection};

/// Concurrent map of live connections.
///
/// Ids come from a monotonically increasing counter and are never reused,
/// even after the connection that held them is gone.
#[derive(Debug, Default)]
pub struct Registry {
    last_id: AtomicU32,
    conns: DashMap<ConnId, Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id. The first id handed out is 1.
    pub fn allocate(&self) -> ConnId {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn insert(&self, conn: Arc<Connection>) {
        self.conns.insert(conn.id(), conn);
    }

    pub fn get(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.conns.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.conns.remove(&id).map(|(_, conn)| conn)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Calls `f` for every registered connection.
    ///
    /// Works on a snapshot taken up front, so `f` runs without holding any
    /// shard lock and may freely touch the registry or close connections.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Connection>)) {
        let snapshot: Vec<Arc<Connection>> = self
            .conns
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in &snapshot {
            f(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tcpmux_connection::{Handler, HandlerFuture, ShutdownCoordinator, Spawner};
    use tcpmux_protocol::Message;
    use tokio_util::task::TaskTracker;

    use super::*;

    struct Noop;

    impl Handler for Noop {
        fn on_message(&self, _conn: &Arc<Connection>, _msg: Message) -> HandlerFuture<'_> {
            Box::pin(async {})
        }
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let registry = Registry::new();
        assert_eq!(registry.allocate(), 1);
        assert_eq!(registry.allocate(), 2);
        assert_eq!(registry.allocate(), 3);
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..500).map(|_| registry.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(seen.iter().max(), Some(&4000));
    }

    #[tokio::test]
    async fn insert_lookup_remove() {
        let registry = Registry::new();
        let spawner = Spawner::new(TaskTracker::new(), Arc::new(ShutdownCoordinator::new()));
        let (local, _remote) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(local);

        let id = registry.allocate();
        let conn = spawner.spawn(id, "127.0.0.1:9".parse().unwrap(), reader, writer, Arc::new(Noop));
        registry.insert(Arc::clone(&conn));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).map(|c| c.id()), Some(id));
        assert!(registry.get(id + 1).is_none());

        let mut visited = Vec::new();
        registry.for_each(|c| {
            visited.push(c.id());
            // Mutating during iteration must not deadlock.
            registry.remove(c.id());
        });
        assert_eq!(visited, vec![id]);
        assert!(registry.is_empty());

        // Ids are not reused after removal.
        assert_eq!(registry.allocate(), id + 1);

        conn.close();
        spawner.tracker().close();
        spawner.tracker().wait().await;
    }
}

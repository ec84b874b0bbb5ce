//! Point-in-time view over queues and connections.
//!
//! Every number is read with its own store call, so a snapshot is not
//! consistent across keys. Good enough for dashboards and operators.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::core::connection::heartbeat_alive;
use crate::core::error::QueueResult;
use crate::core::keys::Keys;
use crate::core::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStat {
    pub active: bool,
    pub unacked_count: u64,
    pub consumers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStat {
    pub ready_count: u64,
    pub rejected_count: u64,
    /// Keyed by consuming connection name.
    pub connection_stats: BTreeMap<String, ConnectionStat>,
}

impl QueueStat {
    pub fn unacked_count(&self) -> u64 {
        self.connection_stats.values().map(|c| c.unacked_count).sum()
    }

    pub fn consumer_count(&self) -> usize {
        self.connection_stats.values().map(|c| c.consumers.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub queue_stats: BTreeMap<String, QueueStat>,
    /// Registered connections not consuming any of the requested queues,
    /// with their liveness.
    pub other_connections: BTreeMap<String, bool>,
}

pub(crate) async fn collect_stats(
    store: &dyn Store,
    keys: &Keys,
    queue_list: &[&str],
) -> QueueResult<Stats> {
    let mut stats = Stats::default();

    for &queue in queue_list {
        let stat = QueueStat {
            ready_count: store.llen(&keys.ready(queue)).await?,
            rejected_count: store.llen(&keys.rejected(queue)).await?,
            connection_stats: BTreeMap::new(),
        };
        stats.queue_stats.insert(queue.to_string(), stat);
    }

    for connection in store.smembers(&keys.connections()).await? {
        let active = heartbeat_alive(store, keys, &connection).await?;
        let consuming = store.smembers(&keys.connection_queues(&connection)).await?;

        let mut referenced = false;
        for queue in consuming {
            let Some(queue_stat) = stats.queue_stats.get_mut(&queue) else {
                continue;
            };
            referenced = true;
            let connection_stat = ConnectionStat {
                active,
                unacked_count: store.llen(&keys.unacked(&connection, &queue)).await?,
                consumers: store.smembers(&keys.consumers(&connection, &queue)).await?,
            };
            queue_stat
                .connection_stats
                .insert(connection.clone(), connection_stat);
        }

        if !referenced {
            stats.other_connections.insert(connection, active);
        }
    }

    Ok(stats)
}

fn liveness(active: bool) -> &'static str {
    if active {
        "active"
    } else {
        "inactive"
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<32} {:>10} {:>10} {:>10} {:>10}",
            "queue", "ready", "rejected", "unacked", "consumers"
        )?;
        for (name, queue) in &self.queue_stats {
            writeln!(
                f,
                "{:<32} {:>10} {:>10} {:>10} {:>10}",
                name,
                queue.ready_count,
                queue.rejected_count,
                queue.unacked_count(),
                queue.consumer_count()
            )?;
            for (connection, stat) in &queue.connection_stats {
                writeln!(
                    f,
                    "  {:<30} {:>10} {:>10} {:>10} {:>10}",
                    format!("{connection} ({})", liveness(stat.active)),
                    "",
                    "",
                    stat.unacked_count,
                    stat.consumers.len()
                )?;
            }
        }
        for (connection, active) in &self.other_connections {
            writeln!(f, "{connection} ({})", liveness(*active))?;
        }
        Ok(())
    }
}

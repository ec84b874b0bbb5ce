mod common;

use std::sync::Arc;

use common::{eventually, init_logging, open, TestConsumer, POLL};
use relq::{Cleaner, MemoryStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_report_queues_and_connections() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let conn = open(&store, "stats-conn").await;
    assert!(Cleaner::new(&conn).clean().await.unwrap().connections.is_empty());

    let conn1 = open(&store, "stats-conn1").await;
    let conn2 = open(&store, "stats-conn2").await;

    let q1 = conn2.open_queue("stats-q1").await.unwrap();
    q1.purge_ready().await.unwrap();
    q1.publish("stats-d1").await.unwrap();

    let q2 = conn2.open_queue("stats-q2").await.unwrap();
    q2.purge_ready().await.unwrap();
    let consumer = TestConsumer::manual();
    q2.start_consuming(10, POLL).await.unwrap();
    q2.add_consumer("stats-cons1", consumer.clone()).await.unwrap();
    for payload in ["stats-d2", "stats-d3", "stats-d4"] {
        q2.publish(payload).await.unwrap();
    }
    assert!(eventually(|| async { consumer.pending_len() == 3 }).await);
    assert!(consumer.take("stats-d2").ack().await.unwrap());
    assert!(consumer.take("stats-d3").reject().await.unwrap());
    q2.add_consumer("stats-cons2", TestConsumer::auto_ack())
        .await
        .unwrap();

    let stats = conn.collect_stats(&["stats-q1", "stats-q2"]).await.unwrap();
    assert!(stats.queue_stats.keys().all(|name| name.starts_with("stats")));

    let s1 = &stats.queue_stats["stats-q1"];
    assert_eq!(s1.ready_count, 1);
    assert_eq!(s1.rejected_count, 0);
    assert!(s1.connection_stats.is_empty());

    let s2 = &stats.queue_stats["stats-q2"];
    assert_eq!(s2.ready_count, 0);
    assert_eq!(s2.rejected_count, 1);
    assert_eq!(s2.unacked_count(), 1);
    assert_eq!(s2.consumer_count(), 2);
    let c2 = &s2.connection_stats[conn2.name()];
    assert!(c2.active);
    assert_eq!(c2.unacked_count, 1);

    assert_eq!(stats.other_connections.get(conn.name()), Some(&true));
    assert_eq!(stats.other_connections.get(conn1.name()), Some(&true));
    assert!(!stats.other_connections.contains_key(conn2.name()));

    let rendered = stats.to_string();
    assert!(rendered.contains("stats-q2"));
    assert!(rendered.contains(conn2.name()));

    conn1.stop_heartbeat().await.unwrap();
    let stats = conn.collect_stats(&["stats-q2"]).await.unwrap();
    assert_eq!(stats.other_connections.get(conn1.name()), Some(&false));

    q2.stop_consuming().await;
    conn.stop_heartbeat().await.unwrap();
    conn2.stop_heartbeat().await.unwrap();
}

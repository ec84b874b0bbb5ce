use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use relq::{consumer_fn, Connection, ConnectionOptions, Delivery, MemoryStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const NUM_MESSAGES: u64 = 10_000;

async fn open_connection() -> Connection {
    Connection::open(
        "bench",
        Arc::new(MemoryStore::new()),
        ConnectionOptions::default(),
    )
    .await
    .expect("failed to open connection")
}

fn bench_publish(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create Tokio runtime");
    let conn = rt.block_on(open_connection());
    let queue = rt.block_on(conn.open_queue("bench-publish")).expect("open queue");

    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(NUM_MESSAGES));
    group.bench_function("memory_store", |b| {
        b.iter(|| {
            rt.block_on(async {
                for i in 0..NUM_MESSAGES {
                    queue.publish(format!("msg-{i}")).await.expect("publish");
                }
                queue.purge_ready().await.expect("purge");
            })
        })
    });
    group.finish();
}

fn bench_consume_ack(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create Tokio runtime");

    let mut group = c.benchmark_group("consume_ack");
    group.throughput(Throughput::Elements(NUM_MESSAGES));
    group.sample_size(10);
    group.bench_function("prefetch_100", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    let conn = open_connection().await;
                    let queue = conn.open_queue("bench-consume").await.expect("open queue");
                    for i in 0..NUM_MESSAGES {
                        queue.publish(format!("msg-{i}")).await.expect("publish");
                    }
                    (conn, queue)
                })
            },
            |(conn, queue)| {
                rt.block_on(async {
                    let acked = Arc::new(AtomicU64::new(0));
                    let counter = acked.clone();
                    queue
                        .start_consuming(100, Duration::from_millis(1))
                        .await
                        .expect("start consuming");
                    queue
                        .add_consumer(
                            "bench",
                            consumer_fn(move |delivery: Delivery| {
                                let counter = counter.clone();
                                async move {
                                    if delivery.ack().await.unwrap_or(false) {
                                        counter.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                            }),
                        )
                        .await
                        .expect("add consumer");

                    while acked.load(Ordering::Relaxed) < NUM_MESSAGES {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    queue.stop_consuming().await;
                    conn.stop_heartbeat().await.expect("stop heartbeat");
                })
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_publish, bench_consume_ack);
criterion_main!(benches);

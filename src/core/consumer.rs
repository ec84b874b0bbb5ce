//! Application-supplied delivery handlers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::delivery::Delivery;

/// Receives deliveries one at a time. The handler owns the delivery's fate
/// and must resolve it with `ack`, `reject` or `push`.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn consume(&self, delivery: Delivery);
}

/// Same contract as [`Consumer`], for a batch of deliveries.
#[async_trait]
pub trait BatchConsumer: Send + Sync + 'static {
    async fn consume_batch(&self, batch: Vec<Delivery>);
}

/// Adapts an async closure into a [`Consumer`].
pub struct ConsumerFn<F>(F);

pub fn consumer_fn<F, Fut>(f: F) -> ConsumerFn<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    ConsumerFn(f)
}

#[async_trait]
impl<F, Fut> Consumer for ConsumerFn<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn consume(&self, delivery: Delivery) {
        (self.0)(delivery).await
    }
}

/// Registered handler shapes, selected at registration time.
pub(crate) enum Handler {
    Single(Box<dyn Consumer>),
    Batch {
        consumer: Box<dyn BatchConsumer>,
        size: usize,
        /// How long to wait for a batch to fill up before handing over what
        /// has arrived so far.
        timeout: Duration,
    },
}

//! A bounded in-process work queue.
//!
//! We never want more than a fixed number of items in flight. Submitting more
//! work than that waits until a slot frees up, so a slow remote service slows
//! us down instead of piling up requests. Background reading: ["Queues Don't
//! Fix Overload"](https://ferd.ca/queues-don-t-fix-overload.html).
//!
//! Results come back on per-item one-shot channels, so callers can resolve
//! them in whatever order they like. We use
//! [`StreamExt::buffer_unordered`](futures::StreamExt::buffer_unordered) to see
//! them in completion order.

use std::sync::Arc;

use futures::{
    FutureExt as _, SinkExt as _, StreamExt as _,
    channel::{mpsc, oneshot},
};
use tokio::task::JoinHandle;

use crate::{
    async_utils::{BoxedFuture, BoxedStream},
    prelude::*,
};

/// An async work function. It must report per-item failures in its output,
/// because there is nowhere else to put them.
pub type WorkFn<Input, Output> =
    Arc<dyn Fn(Input) -> BoxedFuture<Output> + Send + Sync + 'static>;

/// An input waiting to be processed, and where to send its output.
struct WorkItem<Input, Output> {
    input: Input,
    tx: oneshot::Sender<Output>,
}

/// A cheaply cloneable handle for submitting work to a [`WorkQueue`].
pub struct WorkQueueHandle<Input, Output> {
    tx: mpsc::Sender<WorkItem<Input, Output>>,
}

// Written by hand so that `Input` and `Output` need not be `Clone`.
impl<Input, Output> Clone for WorkQueueHandle<Input, Output> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Input, Output> WorkQueueHandle<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Submit `input` and wait for its output. Waits for a free slot first if
    /// the queue is full.
    pub async fn process(&self, input: Input) -> Result<Output> {
        let (tx, rx) = oneshot::channel();
        let mut sender = self.tx.clone();
        sender
            .send(WorkItem { input, tx })
            .await
            .context("work queue has shut down")?;
        rx.await.context("work queue dropped an item without a result")
    }

    /// Turn a stream of inputs into a stream of futures yielding outputs.
    /// Nothing is submitted until a future is polled, so the caller's
    /// buffering decides how far ahead of the consumer we read.
    pub fn process_stream(
        &self,
        inputs: BoxedStream<Input>,
    ) -> BoxedStream<BoxedFuture<Result<Output>>> {
        let handle = self.clone();
        inputs
            .map(move |input| {
                let handle = handle.clone();
                async move { handle.process(input).await }.boxed()
            })
            .boxed()
    }
}

/// Runs up to `concurrency_limit` work items at once on a background task.
pub struct WorkQueue<Input, Output> {
    tx: mpsc::Sender<WorkItem<Input, Output>>,
    worker: JoinHandle<()>,
}

impl<Input, Output> WorkQueue<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Start a queue which calls `work_fn` on each input.
    pub fn new(concurrency_limit: usize, work_fn: WorkFn<Input, Output>) -> Self {
        let concurrency_limit = concurrency_limit.max(1);
        // The channel itself holds nothing beyond one slot per sender, so the
        // real limit is the `for_each_concurrent` below.
        let (tx, rx) = mpsc::channel::<WorkItem<Input, Output>>(0);
        let worker = tokio::spawn(async move {
            rx.for_each_concurrent(concurrency_limit, |item| {
                let work_fn = work_fn.clone();
                async move {
                    let output = work_fn(item.input).await;
                    if item.tx.send(output).is_err() {
                        debug!("dropping work result because nobody is waiting for it");
                    }
                }
            })
            .await;
        });
        Self { tx, worker }
    }

    /// Get a handle for submitting work.
    pub fn handle(&self) -> WorkQueueHandle<Input, Output> {
        WorkQueueHandle {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting work and wait for in-flight items to finish.
    ///
    /// All handles must be dropped first, or this will wait forever.
    pub async fn close(self) -> Result<()> {
        drop(self.tx);
        self.worker.await.context("work queue worker failed")
    }
}

//! The worker pool: fetch and process remote items, a few at a time.

use std::{any::Any, future, panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt as _, StreamExt as _, stream};

use super::work::{WorkFn, WorkQueue};
use crate::{
    async_utils::{BoxedStream, ShutdownFlag},
    engine::{FailureKind, ItemFailure, ItemProcessor, ProcessingResult},
    prelude::*,
    remote::{RemoteItem, RemoteSource},
};

/// A running pool. Drop `results` before calling [`ItemPool::close`].
pub struct ItemPool {
    queue: WorkQueue<RemoteItem, ProcessingResult>,
}

impl ItemPool {
    /// Start processing `pending` with at most `jobs` items in flight.
    ///
    /// Results are yielded in completion order. Once `shutdown` is requested
    /// no further items are started, but items already in flight still
    /// finish and are yielded.
    pub fn start(
        source: Arc<dyn RemoteSource>,
        processor: Arc<dyn ItemProcessor>,
        jobs: usize,
        pending: Vec<RemoteItem>,
        shutdown: ShutdownFlag,
    ) -> (Self, BoxedStream<Result<ProcessingResult>>) {
        let jobs = jobs.max(1);
        let work_fn: WorkFn<RemoteItem, ProcessingResult> = Arc::new(move |item| {
            let source = source.clone();
            let processor = processor.clone();
            async move { process_item(source.as_ref(), processor.as_ref(), item).await }
                .boxed()
        });
        let queue = WorkQueue::new(jobs, work_fn);

        let inputs = stream::iter(pending)
            .take_while(move |_| future::ready(!shutdown.is_requested()))
            .boxed();
        let results = queue
            .handle()
            .process_stream(inputs)
            .buffer_unordered(jobs)
            .boxed();
        (Self { queue }, results)
    }

    /// Wait for the pool's background worker to exit.
    pub async fn close(self) -> Result<()> {
        self.queue.close().await
    }
}

/// Fetch and process a single item. Never fails: every error, including a
/// panic in the processor, becomes an [`ItemFailure`].
#[instrument(level = "debug", skip_all, fields(id = %item.id))]
pub async fn process_item(
    source: &dyn RemoteSource,
    processor: &dyn ItemProcessor,
    item: RemoteItem,
) -> ProcessingResult {
    let outcome = AssertUnwindSafe(fetch_and_process(source, processor, &item))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(ItemFailure {
                id: item.id.clone(),
                name: item.display_path(),
                kind: FailureKind::Process,
                reason: format!("processing panicked: {}", panic_message(&*payload)),
            })
        });
    ProcessingResult { item, outcome }
}

async fn fetch_and_process(
    source: &dyn RemoteSource,
    processor: &dyn ItemProcessor,
    item: &RemoteItem,
) -> Result<Value, ItemFailure> {
    let content = source
        .fetch(item)
        .await
        .map_err(|err| ItemFailure::from_error(item, FailureKind::Fetch, &err))?;
    trace!(bytes = content.len(), "Fetched item");
    processor
        .process(item, content)
        .await
        .map_err(|err| ItemFailure::from_error(item, FailureKind::Process, &err))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

//! A simple worker pool for OCR-heavy batch work.
//!
//! Each worker owns its own expensive state (an OCR engine, a scratch
//! directory), created exactly once by a factory when the worker starts. Work
//! is split into contiguous chunks up front, each worker processes its chunk
//! in order, and results are only merged once every worker has finished.

use std::sync::Arc;

use futures::future::try_join_all;
use indicatif::ProgressBar;

use crate::prelude::*;

/// A worker which processes one unit at a time.
#[async_trait]
pub trait Worker: Send {
    /// The input to a single step.
    type Unit: Send + 'static;
    /// The output of a single step.
    type Output: Send + 'static;

    /// Process a single unit. Per-unit failures should be handled here, so
    /// that one bad unit doesn't stop the rest of the chunk.
    async fn process(&mut self, unit: Self::Unit) -> Self::Output;
}

/// Split `units` into at most `count` contiguous, non-empty chunks of nearly
/// equal size.
pub fn partition<U>(units: Vec<U>, count: usize) -> Vec<Vec<U>> {
    let count = count.max(1);
    let chunk_size = units.len().div_ceil(count).max(1);
    let mut chunks = vec![];
    let mut iter = units.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }
    chunks
}

/// Run `units` through `worker_count` workers built by `factory`, and return
/// the outputs in the same order as the input.
#[instrument(level = "debug", skip_all, fields(units = units.len(), worker_count = worker_count))]
pub async fn run_pool<W, F>(
    units: Vec<W::Unit>,
    worker_count: usize,
    factory: F,
    progress: Option<ProgressBar>,
) -> Result<Vec<W::Output>>
where
    W: Worker + 'static,
    F: Fn(usize) -> Result<W> + Send + Sync + 'static,
{
    let factory = Arc::new(factory);
    let handles = partition(units, worker_count)
        .into_iter()
        .enumerate()
        .map(|(worker_idx, chunk)| {
            let factory = factory.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                let mut worker = factory(worker_idx)
                    .with_context(|| format!("could not start worker {worker_idx}"))?;
                debug!(worker_idx, units = chunk.len(), "Worker started");
                let mut outputs = Vec::with_capacity(chunk.len());
                for unit in chunk {
                    outputs.push(worker.process(unit).await);
                    if let Some(progress) = &progress {
                        progress.inc(1);
                    }
                }
                Ok::<_, anyhow::Error>(outputs)
            })
        })
        .collect::<Vec<_>>();

    // Wait for every worker before merging anything.
    let results = try_join_all(handles)
        .await
        .context("could not join worker")?;
    let mut merged = vec![];
    for result in results {
        merged.extend(result?);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn partitions_into_contiguous_chunks() {
        assert_eq!(
            partition((1..=7).collect(), 3),
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
        );
        assert_eq!(partition(vec![1, 2], 8), vec![vec![1], vec![2]]);
        assert!(partition(Vec::<u32>::new(), 4).is_empty());
        assert_eq!(partition(vec![1, 2], 0), vec![vec![1, 2]]);
    }

    struct Doubler {
        id: usize,
    }

    #[async_trait]
    impl Worker for Doubler {
        type Unit = u32;
        type Output = (usize, u32);

        async fn process(&mut self, unit: u32) -> (usize, u32) {
            tokio::task::yield_now().await;
            (self.id, unit * 2)
        }
    }

    #[tokio::test]
    async fn factory_runs_once_per_worker_and_order_is_kept() {
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = created.clone();
        let outputs = run_pool(
            (0..10).collect(),
            3,
            move |id| {
                created_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Doubler { id })
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 3);
        let values = outputs.iter().map(|(_, v)| *v).collect::<Vec<_>>();
        assert_eq!(values, (0..10).map(|v| v * 2).collect::<Vec<_>>());
        // Each worker handled one contiguous chunk.
        let ids = outputs.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn factory_failure_fails_the_pool() {
        let result = run_pool::<Doubler, _>(
            (0..4).collect(),
            2,
            |id| {
                if id == 1 {
                    Err(anyhow!("no engine"))
                } else {
                    Ok(Doubler { id })
                }
            },
            None,
        )
        .await;
        assert!(result.is_err());
    }
}

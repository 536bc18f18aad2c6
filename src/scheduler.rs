//! Bounded-concurrency fan-out across multiple targets (instances, regions).
//!
//! Results preserve input order regardless of completion order: each target
//! is pre-assigned a slot, and a worker pool drains the work queue while
//! reporting progress on a separate channel.

use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    ContinueOnError,
    StopOnError,
}

#[derive(Debug, Clone)]
pub enum FanoutProgress<T> {
    Started { index: usize, total: usize },
    Completed { index: usize, total: usize, outcome: T },
}

/// Run `work` for every item in `targets` with at most `parallel` in flight.
///
/// Returns one outcome per target, in the same order as `targets`. Under
/// `StopOnError`, once any task errors, `cancel` is triggered so in-flight and
/// queued work winds down; already-collected outcomes for slots that never
/// ran are `None`.
pub async fn run<T, E, F, Fut>(
    targets: Vec<String>,
    parallel: usize,
    policy: FailurePolicy,
    cancel: CancellationToken,
    progress: Option<UnboundedSender<FanoutProgress<Result<T, E>>>>,
    work: F,
) -> Vec<Option<Result<T, E>>>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn(String, usize, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
{
    let total = targets.len();
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let work = Arc::new(work);
    let mut slots: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();

    let mut handles = Vec::with_capacity(total);
    for (index, target) in targets.into_iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        let permit_holder = semaphore.clone();
        let work = work.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();

        let handle = tokio::spawn(async move {
            let _permit = match permit_holder.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, None),
            };
            if cancel.is_cancelled() {
                return (index, None);
            }
            if let Some(tx) = &progress {
                let _ = tx.send(FanoutProgress::Started { index, total });
            }
            let outcome = work(target, index, cancel.clone()).await;
            if let Some(tx) = &progress {
                let _ = tx.send(FanoutProgress::Completed {
                    index,
                    total,
                    outcome: outcome.clone(),
                });
            }
            (index, Some(outcome))
        });
        handles.push(handle);
    }

    for handle in handles {
        if let Ok((index, outcome)) = handle.await {
            let is_err = matches!(outcome, Some(Err(_)));
            slots[index] = outcome;
            if is_err && policy == FailurePolicy::StopOnError {
                cancel.cancel();
            }
        }
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn preserves_input_order_regardless_of_completion_order() {
        let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let cancel = CancellationToken::new();
        let results = run::<String, String, _, _>(targets, 3, FailurePolicy::ContinueOnError, cancel, None, |target, index, _cancel| async move {
            let delay = (3 - index) as u64 * 5;
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            Ok(target)
        })
        .await;

        assert_eq!(results[0].clone().unwrap().unwrap(), "a");
        assert_eq!(results[1].clone().unwrap().unwrap(), "b");
        assert_eq!(results[2].clone().unwrap().unwrap(), "c");
    }

    #[tokio::test]
    async fn respects_bounded_parallelism() {
        let targets: Vec<String> = (0..6).map(|i| i.to_string()).collect();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let concurrent_for_work = concurrent.clone();
        let max_seen_for_work = max_seen.clone();
        let results = run::<(), String, _, _>(targets, 2, FailurePolicy::ContinueOnError, cancel, None, move |_target, _index, _cancel| {
            let concurrent = concurrent_for_work.clone();
            let max_seen = max_seen_for_work.clone();
            async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(results.len(), 6);
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn stop_on_error_cancels_remaining_work() {
        let targets = vec!["fail".to_string(), "ok".to_string()];
        let cancel = CancellationToken::new();
        let results = run::<&str, &str, _, _>(targets, 1, FailurePolicy::StopOnError, cancel, None, |target, _index, _cancel| async move {
            if target == "fail" {
                Err("boom")
            } else {
                Ok("done")
            }
        })
        .await;

        assert!(matches!(results[0], Some(Err("boom"))));
    }
}

//! Bounded worker pool: a fixed number of workers drain a closed job queue and
//! report successes through an aggregation channel.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Outcome of one pool run. `results` arrive in completion order.
#[derive(Debug)]
pub struct PoolReport<R> {
    pub submitted: usize,
    pub results: Vec<R>,
}

/// Run `work` over every job with at most `workers` jobs in flight.
///
/// The job queue is filled and closed up front; workers exit once it is drained.
/// Each job runs in its own task, so a panicking job loses only its own result.
/// Jobs returning `None` contribute nothing.
pub async fn run_bounded<T, R, F, Fut>(jobs: Vec<T>, workers: usize, work: F) -> PoolReport<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<R>> + Send + 'static,
{
    let submitted = jobs.len();
    if submitted == 0 {
        return PoolReport { submitted, results: Vec::new() };
    }

    let (job_tx, job_rx) = mpsc::unbounded_channel::<T>();
    for job in jobs {
        // receiver is alive until the workers below finish
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let work = Arc::new(work);
    let (tx, mut rx) = mpsc::channel::<R>(submitted);

    let workers = workers.clamp(1, submitted);
    for _ in 0..workers {
        let job_rx = job_rx.clone();
        let work = work.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let next = { job_rx.lock().await.recv().await };
                let Some(job) = next else { break };
                match tokio::spawn(work(job)).await {
                    Ok(Some(r)) => {
                        let _ = tx.send(r).await;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "pool job aborted"),
                }
            }
        });
    }
    drop(tx);

    let mut results = Vec::new();
    while let Some(r) = rx.recv().await {
        results.push(r);
    }
    PoolReport { submitted, results }
}

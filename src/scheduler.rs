//! Periodic execution of collection cycles.

use std::time::Duration;
use tracing::{debug, error, info};

use crate::collector::{Collector, CollectorError, CycleReport, PollState};

/// Runs `collector` every `interval`, forever or for `iterations` cycles.
///
/// Cycles are strictly sequential and run on the blocking thread pool. A
/// failed cycle is reported to `on_cycle` and the next cycle starts from the
/// last successful state. There is no sleep after the final bounded
/// iteration. Returns the number of cycles run.
pub async fn start<F>(
    mut collector: Collector,
    mut state: PollState,
    interval: Duration,
    iterations: Option<usize>,
    mut on_cycle: F,
) -> Result<usize, CollectorError>
where
    F: FnMut(&Result<CycleReport, CollectorError>) + Send,
{
    let done = |completed: usize| iterations.is_some_and(|n| completed >= n);

    info!(
        "Starting collector: interval {}s, iterations {}",
        interval.as_secs_f64(),
        iterations.map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );

    let mut completed = 0usize;
    while !done(completed) {
        let (returned, previous, result) = tokio::task::spawn_blocking(move || {
            let result = collector.execute(&state);
            (collector, state, result)
        })
        .await
        .map_err(|e| CollectorError::Aborted(e.to_string()))?;

        collector = returned;
        completed += 1;

        let outcome = match result {
            Ok((next, report)) => {
                state = next;
                Ok(report)
            }
            Err(e) => {
                error!("Collection cycle {} failed: {}", completed, e);
                state = previous;
                Err(e)
            }
        };
        on_cycle(&outcome);

        if done(completed) {
            break;
        }
        debug!("Sleeping {:?} until the next cycle", interval);
        tokio::time::sleep(interval).await;
    }

    Ok(completed)
}

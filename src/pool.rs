//! Bounded-concurrency executor shared by the provisioning and cleanup phases.
//!
//! Tasks start in submission order, at most `concurrency` at a time, and are
//! reported in completion order. Every task runs on its own tokio task so a
//! panic is captured in that task's report and never reaches siblings. When
//! an [`AbortSignal`] gates the dispatch, it is consulted right before each
//! start; once an abort is confirmed the remaining inputs are reported as
//! [`TaskOutcome::NotAttempted`] without having been touched.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

use crate::abort::AbortSignal;

/// How a submitted task ended.
#[derive(Debug)]
pub enum TaskOutcome<I, T> {
    /// The task ran to completion and produced a value.
    Completed(T),
    /// The task panicked.
    Panicked(String),
    /// The task never started; its input is handed back unchanged.
    NotAttempted(I),
}

/// Outcome of the task submitted at position `index`.
#[derive(Debug)]
pub struct TaskReport<I, T> {
    /// Submission position, starting at zero.
    pub index: usize,
    /// How the task ended.
    pub outcome: TaskOutcome<I, T>,
}

/// Executor configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerPool {
    concurrency: NonZeroUsize,
}

impl WorkerPool {
    /// Creates a pool running at most `concurrency` tasks at once.
    #[must_use]
    pub const fn new(concurrency: NonZeroUsize) -> Self {
        Self { concurrency }
    }

    /// Maximum number of simultaneously running tasks.
    #[must_use]
    pub const fn concurrency(&self) -> NonZeroUsize {
        self.concurrency
    }

    /// Starts dispatching `inputs` through `task` with no abort gate.
    #[must_use]
    pub fn dispatch<I, T, F, Fut>(
        &self,
        inputs: impl IntoIterator<Item = I>,
        task: F,
    ) -> Dispatch<I, T, F>
    where
        T: Send + 'static,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        Dispatch::new(self.concurrency, inputs, task, None)
    }

    /// Starts dispatching `inputs` through `task`, consulting `abort` before
    /// every start.
    #[must_use]
    pub fn dispatch_until_aborted<I, T, F, Fut>(
        &self,
        inputs: impl IntoIterator<Item = I>,
        task: F,
        abort: AbortSignal,
    ) -> Dispatch<I, T, F>
    where
        T: Send + 'static,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        Dispatch::new(self.concurrency, inputs, task, Some(abort))
    }

    /// Runs every input to completion and returns the reports in completion
    /// order.
    pub async fn run_all<I, T, F, Fut>(
        &self,
        inputs: impl IntoIterator<Item = I>,
        task: F,
    ) -> Vec<TaskReport<I, T>>
    where
        T: Send + 'static,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut dispatch = self.dispatch(inputs, task);
        let mut reports = Vec::new();
        while let Some(report) = dispatch.next().await {
            reports.push(report);
        }
        reports
    }
}

/// An in-progress dispatch. Drive it with [`Dispatch::next`].
pub struct Dispatch<I, T, F> {
    limit: usize,
    pending: VecDeque<(usize, I)>,
    skipped: VecDeque<(usize, I)>,
    running: JoinSet<(usize, Result<T, JoinError>)>,
    task: F,
    gate: Option<AbortSignal>,
}

impl<I, T, F, Fut> Dispatch<I, T, F>
where
    T: Send + 'static,
    F: FnMut(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    fn new(
        concurrency: NonZeroUsize,
        inputs: impl IntoIterator<Item = I>,
        task: F,
        gate: Option<AbortSignal>,
    ) -> Self {
        Self {
            limit: concurrency.get(),
            pending: inputs.into_iter().enumerate().collect(),
            skipped: VecDeque::new(),
            running: JoinSet::new(),
            task,
            gate,
        }
    }

    /// Number of tasks currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Waits for the next report. Returns `None` once every input has been
    /// reported.
    pub async fn next(&mut self) -> Option<TaskReport<I, T>> {
        loop {
            self.fill();
            if let Some((index, input)) = self.skipped.pop_front() {
                return Some(TaskReport {
                    index,
                    outcome: TaskOutcome::NotAttempted(input),
                });
            }

            let joined = self.running.join_next().await?;
            match joined {
                Ok((index, Ok(value))) => {
                    self.fill();
                    return Some(TaskReport {
                        index,
                        outcome: TaskOutcome::Completed(value),
                    });
                }
                Ok((index, Err(err))) => {
                    self.fill();
                    let message = join_failure_message(err);
                    error!(index, panic = %message, "task panicked");
                    return Some(TaskReport {
                        index,
                        outcome: TaskOutcome::Panicked(message),
                    });
                }
                Err(err) => {
                    error!(error = %err, "task supervisor failed");
                }
            }
        }
    }

    fn fill(&mut self) {
        while self.running.len() < self.limit {
            let Some((index, input)) = self.pending.pop_front() else {
                return;
            };
            if self.gate.as_ref().is_some_and(AbortSignal::is_confirmed) {
                debug!(skipped = self.pending.len() + 1, "abort confirmed, dropping queued tasks");
                self.skipped.push_back((index, input));
                self.skipped.extend(self.pending.drain(..));
                return;
            }

            let work = (self.task)(input);
            self.running
                .spawn(async move { (index, tokio::spawn(work).await) });
        }
    }
}

fn join_failure_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    panic_message(payload.as_ref())
}

/// Extracts the message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| {
            payload
                .downcast_ref::<&'static str>()
                .map(|message| (*message).to_owned())
        })
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rstest::rstest;
    use tokio::time::sleep;

    use super::*;

    fn pool(limit: usize) -> WorkerPool {
        WorkerPool::new(NonZeroUsize::new(limit).expect("non-zero"))
    }

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(7, 3)]
    #[case(4, 8)]
    #[tokio::test(start_paused = true)]
    async fn never_exceeds_limit(#[case] count: usize, #[case] limit: usize) {
        let gauge = Arc::new(Gauge::default());
        let reports = pool(limit)
            .run_all(0..count, |item| {
                let gauge = Arc::clone(&gauge);
                async move {
                    gauge.enter();
                    sleep(Duration::from_millis(10)).await;
                    gauge.leave();
                    item
                }
            })
            .await;

        assert_eq!(reports.len(), count);
        assert!(gauge.peak.load(Ordering::SeqCst) <= limit);
        if count > 0 {
            assert_eq!(gauge.peak.load(Ordering::SeqCst), count.min(limit));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_in_completion_order() {
        let reports = pool(3)
            .run_all([30_u64, 10, 20], |millis| async move {
                sleep(Duration::from_millis(millis)).await;
                millis
            })
            .await;

        let order: Vec<usize> = reports.iter().map(|report| report.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn panic_is_isolated() {
        let reports = pool(2)
            .run_all(0..3_u32, |item| async move {
                assert!(item != 1, "task {item} exploded");
                item
            })
            .await;

        let mut completed = 0;
        for report in reports {
            match report.outcome {
                TaskOutcome::Completed(_) => completed += 1,
                TaskOutcome::Panicked(message) => {
                    assert_eq!(report.index, 1);
                    assert!(message.contains("task 1 exploded"), "message: {message}");
                }
                TaskOutcome::NotAttempted(_) => panic!("nothing was aborted"),
            }
        }
        assert_eq!(completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_abort_drops_queued_inputs() {
        let abort = AbortSignal::new();
        let started = Arc::new(AtomicUsize::new(0));
        let trigger = abort.clone();
        let counter = Arc::clone(&started);
        let mut dispatch = pool(2).dispatch_until_aborted(
            0..6_usize,
            move |item| {
                let begun = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if begun == 3 {
                    trigger.confirm();
                }
                async move {
                    sleep(Duration::from_millis(5)).await;
                    item
                }
            },
            abort,
        );

        let mut completed = 0;
        let mut skipped = Vec::new();
        while let Some(report) = dispatch.next().await {
            match report.outcome {
                TaskOutcome::Completed(_) => completed += 1,
                TaskOutcome::NotAttempted(item) => skipped.push(item),
                TaskOutcome::Panicked(message) => panic!("unexpected panic: {message}"),
            }
        }

        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(completed, 3);
        skipped.sort_unstable();
        assert_eq!(skipped, vec![3, 4, 5]);
    }
}

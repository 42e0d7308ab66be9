//! Step registry and execution.
//!
//! Steps run in registration order with strict forward progress: the first
//! halt or error stops the sequence. Cleanup then runs in reverse over every
//! step whose `run` was entered, regardless of how the build ended. Cleanups
//! observe `BuildState::aborted` to decide between rollback and retention;
//! they must not assume `error` is absent.

use async_trait::async_trait;

use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::context::BuildContext;
use crate::pipeline::state::{BuildFailure, BuildState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// One stage of the build.
///
/// `run` must be idempotent with respect to the state bag, writing only the
/// keys it owns. `cleanup` is invoked exactly once for every entered step.
#[async_trait]
pub trait Step: Send {
    fn name(&self) -> &'static str;

    async fn run(&mut self, ctx: &BuildContext, state: &mut BuildState)
        -> ForgeResult<StepAction>;

    async fn cleanup(&mut self, _ctx: &BuildContext, _state: &mut BuildState) {}
}

/// Runs an ordered sequence of steps with reverse-order cleanup.
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Pipeline {
        Pipeline { steps }
    }

    /// Execute the pipeline to completion. The first fatal error is recorded
    /// in the state and returned after cleanup has run.
    pub async fn run(mut self, ctx: &BuildContext, state: &mut BuildState) -> ForgeResult<()> {
        let mut entered = 0;

        for step in self.steps.iter_mut() {
            if ctx.cancel.is_cancelled() {
                state.cancelled = true;
                break;
            }

            tracing::info!(stage = step.name(), "running stage");
            entered += 1;

            match step.run(ctx, state).await {
                Ok(StepAction::Continue) => {}
                Ok(StepAction::Halt) => {
                    // A halt without an error is a cancellation surfaced by
                    // the step itself.
                    if state.error.is_none() {
                        state.cancelled = true;
                    } else {
                        state.halted = true;
                    }
                    break;
                }
                Err(err) if err.is_cancelled() => {
                    state.cancelled = true;
                    break;
                }
                Err(err) => {
                    tracing::error!(stage = step.name(), error = %err, "stage failed");
                    state.error = Some(BuildFailure {
                        stage: step.name(),
                        error: err,
                    });
                    state.halted = true;
                    break;
                }
            }
        }

        for step in self.steps[..entered].iter_mut().rev() {
            tracing::debug!(stage = step.name(), "cleaning up stage");
            step.cleanup(ctx, state).await;
        }

        if state.cancelled {
            return Err(ForgeError::Cancelled);
        }
        if let Some(failure) = state.error.take() {
            return Err(failure.into_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cancel::CancelSource;
    use crate::testutil::test_context;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Records run/cleanup order into a shared log.
    struct Probe {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<String>>>,
        seq: Arc<AtomicUsize>,
        outcome: Outcome,
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Continue,
        Fail,
        SleepLong,
    }

    impl Probe {
        fn boxed(
            name: &'static str,
            log: &Arc<std::sync::Mutex<Vec<String>>>,
            seq: &Arc<AtomicUsize>,
            outcome: Outcome,
        ) -> Box<dyn Step> {
            Box::new(Probe {
                name,
                log: Arc::clone(log),
                seq: Arc::clone(seq),
                outcome,
            })
        }

        fn record(&self, event: &str) {
            self.seq.fetch_add(1, Ordering::SeqCst);
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
        }
    }

    #[async_trait]
    impl Step for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(
            &mut self,
            ctx: &BuildContext,
            _state: &mut BuildState,
        ) -> ForgeResult<StepAction> {
            self.record("run");
            match self.outcome {
                Outcome::Continue => Ok(StepAction::Continue),
                Outcome::Fail => Err(ForgeError::Cloud("boom".into())),
                Outcome::SleepLong => {
                    ctx.cancel.sleep(Duration::from_secs(600)).await?;
                    Ok(StepAction::Continue)
                }
            }
        }

        async fn cleanup(&mut self, _ctx: &BuildContext, _state: &mut BuildState) {
            self.record("cleanup");
        }
    }

    #[tokio::test]
    async fn halt_skips_later_steps_and_cleans_up_in_reverse() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seq = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            Probe::boxed("one", &log, &seq, Outcome::Continue),
            Probe::boxed("two", &log, &seq, Outcome::Fail),
            Probe::boxed("three", &log, &seq, Outcome::Continue),
        ]);

        let ctx = test_context();
        let mut state = BuildState::new();
        let err = pipeline.run(&ctx, &mut state).await.unwrap_err();

        assert_eq!(err.to_string(), "two: cloud error: boom");
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "one:run",
                "two:run",
                "two:cleanup",
                "one:cleanup",
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_sleeping_step() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seq = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            Probe::boxed("one", &log, &seq, Outcome::Continue),
            Probe::boxed("two", &log, &seq, Outcome::SleepLong),
            Probe::boxed("three", &log, &seq, Outcome::Continue),
        ]);

        let (source, token) = CancelSource::new();
        let mut ctx = test_context();
        ctx.cancel = token;

        let handle = tokio::spawn(async move {
            let mut state = BuildState::new();
            let result = pipeline.run(&ctx, &mut state).await;
            (result, state.cancelled)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        source.cancel();

        let (result, cancelled) = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancel must interrupt the sleeping step")
            .unwrap();
        assert!(matches!(result, Err(ForgeError::Cancelled)));
        assert!(cancelled);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "one:run",
                "two:run",
                "two:cleanup",
                "one:cleanup",
            ]
        );
    }

    #[tokio::test]
    async fn clean_run_cleans_up_every_step_once() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seq = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            Probe::boxed("one", &log, &seq, Outcome::Continue),
            Probe::boxed("two", &log, &seq, Outcome::Continue),
        ]);

        let ctx = test_context();
        let mut state = BuildState::new();
        pipeline.run(&ctx, &mut state).await.unwrap();

        assert!(!state.aborted());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["one:run", "two:run", "two:cleanup", "one:cleanup"]
        );
    }
}

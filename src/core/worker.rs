use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::job::Job;
use crate::core::rate_limit::RateLimiter;
use crate::core::state::{KickRequest, StepFn};

/// What a worker reports back to the dispatcher after one execution.
pub(crate) struct Outcome<JC> {
    pub prior_state: String,
    pub job: Job<JC>,
    pub kick_requests: Vec<KickRequest<JC>>,
}

/// One long-lived task bound to a single non-terminal state. All workers of
/// a state share the dispatch receiver and the optional rate limiter; every
/// outcome goes to the one central return channel.
///
/// Workers never touch the counters or queues: the dispatcher is the single
/// point of serialization for those.
pub(crate) struct StateWorker<AC, OC, JC> {
    pub index: usize,
    pub state_name: String,
    pub exec: StepFn<AC, OC, JC>,
    pub rate_limit: Option<Arc<RateLimiter>>,
    pub app: Arc<AC>,
    pub overall: Arc<OC>,
    pub jobs: Arc<Mutex<mpsc::Receiver<Job<JC>>>>,
    pub outcomes: mpsc::Sender<Outcome<JC>>,
    pub cancel: CancellationToken,
}

impl<AC, OC, JC> StateWorker<AC, OC, JC>
where
    AC: Send + Sync + 'static,
    OC: Send + Sync + 'static,
    JC: Send + 'static,
{
    pub(crate) async fn run(self) {
        debug!(worker = self.index, state = %self.state_name, "worker started");
        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = Self::next_job(&self.jobs) => match job {
                    Some(job) => job,
                    // Channel closed: the dispatcher is shutting down.
                    None => break,
                },
            };

            if let Some(limiter) = &self.rate_limit {
                if limiter.wait(&self.cancel).await.is_err() {
                    break;
                }
            }

            let Job {
                id,
                payload,
                state: prior_state,
                state_errors,
            } = job;
            debug!(job = %id, state = %prior_state, "executing job");

            let step = (self.exec)(
                self.cancel.clone(),
                Arc::clone(&self.app),
                Arc::clone(&self.overall),
                payload,
            )
            .await;
            debug!(
                job = %id,
                next_state = %step.next_state,
                kicks = step.kick_requests.len(),
                "execution complete"
            );

            let mut job = Job {
                id,
                payload: step.payload,
                state: step.next_state,
                state_errors,
            };
            if let Some(message) = step.error {
                job.record_error(&prior_state, message);
            }

            let outcome = Outcome {
                prior_state,
                job,
                kick_requests: step.kick_requests,
            };
            if self.outcomes.send(outcome).await.is_err() {
                // The dispatcher already returned; the outcome is dropped.
                break;
            }
        }
        debug!(worker = self.index, state = %self.state_name, "worker stopped");
    }

    async fn next_job(jobs: &Mutex<mpsc::Receiver<Job<JC>>>) -> Option<Job<JC>> {
        jobs.lock().await.recv().await
    }
}

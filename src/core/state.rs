use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::rate_limit::RateLimiter;

/// The state jobs enter when added to a run without an explicit state.
pub const TRIGGER_STATE_NEW: &str = "new";

/// A request, emitted by an execution function, to spawn a new child job in
/// the given state. The dispatcher assigns the child an id derived from the
/// parent's id and the request's index within the batch.
pub struct KickRequest<JC> {
    pub payload: JC,
    pub state: String,
}

impl<JC> KickRequest<JC> {
    pub fn new(payload: JC, state: impl Into<String>) -> Self {
        Self {
            payload,
            state: state.into(),
        }
    }
}

/// What an execution function hands back: the updated payload, the state the
/// job moves to next, any child jobs to kick off, and an optional error.
///
/// The next state and kick requests are honored whether or not an error is
/// present; the error is only recorded in the job's per-state error log.
pub struct StepResult<JC> {
    pub payload: JC,
    pub next_state: String,
    pub kick_requests: Vec<KickRequest<JC>>,
    pub error: Option<String>,
}

impl<JC> StepResult<JC> {
    /// Move the job to `next_state` with no kicks and no error.
    pub fn next(payload: JC, next_state: impl Into<String>) -> Self {
        Self {
            payload,
            next_state: next_state.into(),
            kick_requests: Vec::new(),
            error: None,
        }
    }

    pub fn with_kicks(mut self, kick_requests: Vec<KickRequest<JC>>) -> Self {
        self.kick_requests = kick_requests;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

pub type StepFuture<JC> = Pin<Box<dyn Future<Output = StepResult<JC>> + Send>>;

/// An execution function: `(cancellation token, app context, overall context,
/// payload) -> StepResult`. Must not panic; errors are returned in the
/// [`StepResult`]. Long operations are expected to honor the token.
pub type StepFn<AC, OC, JC> =
    Arc<dyn Fn(CancellationToken, Arc<AC>, Arc<OC>, JC) -> StepFuture<JC> + Send + Sync>;

/// A named node in the caller's job state machine.
///
/// Non-terminal states carry an execution function and a worker pool of
/// `concurrency` tasks. Terminal states execute nothing; entering one marks
/// the job completed.
pub struct State<AC, OC, JC> {
    pub name: String,
    pub terminal: bool,
    pub concurrency: usize,
    pub exec: Option<StepFn<AC, OC, JC>>,
    pub rate_limit: Option<Arc<RateLimiter>>,
}

impl<AC, OC, JC> State<AC, OC, JC> {
    /// A non-terminal state executing `exec` on up to `concurrency` jobs at
    /// a time.
    pub fn new<F, Fut>(name: impl Into<String>, concurrency: usize, exec: F) -> Self
    where
        F: Fn(CancellationToken, Arc<AC>, Arc<OC>, JC) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<JC>> + Send + 'static,
    {
        Self {
            name: name.into(),
            terminal: false,
            concurrency,
            exec: Some(Arc::new(move |cancel, app, overall, payload| -> StepFuture<JC> {
                Box::pin(exec(cancel, app, overall, payload))
            })),
            rate_limit: None,
        }
    }

    /// A terminal state. Jobs that reach it are done.
    pub fn terminal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terminal: true,
            concurrency: 0,
            exec: None,
            rate_limit: None,
        }
    }

    /// Attach a rate limiter shared by every worker of this state, bounding
    /// the state's aggregate execution rate.
    pub fn with_rate_limit(mut self, limiter: RateLimiter) -> Self {
        self.rate_limit = Some(Arc::new(limiter));
        self
    }
}

impl<AC, OC, JC> Clone for State<AC, OC, JC> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            terminal: self.terminal,
            concurrency: self.concurrency,
            exec: self.exec.clone(),
            rate_limit: self.rate_limit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exec() {
        let state = State::<(), (), ()>::terminal("done");
        assert!(state.terminal);
        assert_eq!(state.concurrency, 0);
        assert!(state.exec.is_none());
        assert!(state.rate_limit.is_none());
    }

    #[tokio::test]
    async fn exec_closure_is_boxed_and_callable() {
        let state = State::new(
            TRIGGER_STATE_NEW,
            2,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, payload: u32| async move {
                StepResult::next(payload + 1, "done")
            },
        );
        assert!(!state.terminal);

        let exec = state.exec.expect("non-terminal state has an exec fn");
        let result = exec(CancellationToken::new(), Arc::new(()), Arc::new(()), 41).await;
        assert_eq!(result.payload, 42);
        assert_eq!(result.next_state, "done");
        assert!(result.kick_requests.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn step_result_builders() {
        let result = StepResult::next((), "middle")
            .with_kicks(vec![KickRequest::new((), "middle")])
            .with_error("boom");
        assert_eq!(result.next_state, "middle");
        assert_eq!(result.kick_requests.len(), 1);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}

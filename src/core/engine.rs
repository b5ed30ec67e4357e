//! The engine: one dispatcher task that owns every job-movement decision.
//!
//! For each non-terminal state the engine spawns a pool of
//! [`StateWorker`](crate::core::worker::StateWorker)s bound to that state's
//! dispatch channel. The dispatcher seeds the run's jobs, then loops on the
//! central return channel: free the prior state's slot (handing off the
//! oldest waiter, if any), fold the returned job and its kicks back in,
//! checkpoint, publish status, and stop once every job is terminal and
//! nothing is executing.
//!
//! Concentrating all counter and queue mutations in the dispatcher keeps the
//! bookkeeping consistent without locks and makes fairness a property of
//! admission order alone.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::bookkeeping::Bookkeeping;
use crate::core::checkpoint::{NoopSerializer, Serializer};
use crate::core::job::Job;
use crate::core::registry::StateRegistry;
use crate::core::run::Run;
use crate::core::state::State;
use crate::core::status::{NoopStatusListener, StatusListener};
use crate::core::worker::{Outcome, StateWorker};
use crate::error::{EngineError, EngineResult};

/// Drives every job of a run through the caller's state machine.
///
/// Construction validates the states; [`Engine::execute`] consumes the
/// engine, so each instance runs exactly once.
pub struct Engine<AC, OC, JC> {
    app_context: Arc<AC>,
    registry: StateRegistry<AC, OC, JC>,
    serializer: Arc<dyn Serializer<OC, JC>>,
    status_listener: Arc<dyn StatusListener>,
}

impl<AC, OC, JC> std::fmt::Debug for Engine<AC, OC, JC> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl<AC, OC, JC> Engine<AC, OC, JC>
where
    AC: Send + Sync + 'static,
    OC: Clone + Send + Sync + 'static,
    JC: Clone + Send + Sync + 'static,
{
    /// Validate the states and build an engine with no serializer and no
    /// status listener.
    pub fn new(app_context: AC, states: Vec<State<AC, OC, JC>>) -> EngineResult<Self> {
        Ok(Self {
            app_context: Arc::new(app_context),
            registry: StateRegistry::from_states(states)?,
            serializer: Arc::new(NoopSerializer),
            status_listener: Arc::new(NoopStatusListener),
        })
    }

    /// Checkpoint the run through `serializer` after every outcome.
    pub fn with_serializer(mut self, serializer: impl Serializer<OC, JC> + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Send status snapshots to `listener`.
    pub fn with_status_listener(mut self, listener: impl StatusListener + 'static) -> Self {
        self.status_listener = Arc::new(listener);
        self
    }

    /// Run until every job is terminal or the token is cancelled.
    /// Cancellation is not an error; the run keeps whatever state it
    /// reached.
    pub async fn execute(
        self,
        cancel: CancellationToken,
        run: &mut Run<OC, JC>,
    ) -> EngineResult<()> {
        let (mut books, mut receivers) = Bookkeeping::new(&self.registry);

        if books.all_terminal(run) {
            for job in run.jobs.values() {
                books.complete(job);
            }
            self.status_listener.status_update(books.snapshot());
            info!(run = %run.name, "all jobs already terminal");
            return Ok(());
        }

        let overall = Arc::new(run.overall.clone());
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome<JC>>(1);
        let mut workers = JoinSet::new();

        for state in self.registry.states() {
            if state.terminal {
                continue;
            }
            let Some(receiver) = receivers.remove(&state.name) else {
                return Err(EngineError::Internal(format!(
                    "no dispatch channel for state {}",
                    state.name
                )));
            };
            let Some(exec) = state.exec.clone() else {
                return Err(EngineError::Internal(format!(
                    "no exec function for state {}",
                    state.name
                )));
            };
            let jobs = Arc::new(Mutex::new(receiver));
            debug!(state = %state.name, workers = state.concurrency, "starting worker pool");
            for index in 0..state.concurrency {
                workers.spawn(
                    StateWorker {
                        index,
                        state_name: state.name.clone(),
                        exec: exec.clone(),
                        rate_limit: state.rate_limit.clone(),
                        app: Arc::clone(&self.app_context),
                        overall: Arc::clone(&overall),
                        jobs: Arc::clone(&jobs),
                        outcomes: outcome_tx.clone(),
                        cancel: cancel.clone(),
                    }
                    .run(),
                );
            }
        }
        // Workers hold the only senders from here on.
        drop(outcome_tx);

        // A hand-off can fail mid-iteration when cancellation has already
        // torn the workers down; that race is part of shutdown, not an error.
        let result = match self.dispatch(&mut books, &mut outcome_rx, &cancel, run).await {
            Err(EngineError::Internal(_)) if cancel.is_cancelled() => Ok(()),
            other => other,
        };

        // Closing the dispatch channels stops idle workers; dropping the
        // outcome receiver unblocks any worker still reporting. In-flight
        // executions run to completion before their worker exits.
        drop(books);
        drop(outcome_rx);
        while workers.join_next().await.is_some() {}

        result
    }

    async fn dispatch(
        &self,
        books: &mut Bookkeeping<JC>,
        outcomes: &mut mpsc::Receiver<Outcome<JC>>,
        cancel: &CancellationToken,
        run: &mut Run<OC, JC>,
    ) -> EngineResult<()> {
        let seeds: Vec<Job<JC>> = run.jobs.values().cloned().collect();
        for job in seeds {
            books.admit(job).await?;
        }
        self.status_listener.status_update(books.snapshot());

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                outcome = outcomes.recv() => match outcome {
                    Some(outcome) => outcome,
                    None => {
                        return Err(EngineError::Internal(
                            "outcome channel closed while jobs were in flight".into(),
                        ))
                    }
                },
            };
            let Outcome {
                prior_state,
                job,
                kick_requests,
            } = outcome;
            let had_kicks = !kick_requests.is_empty();

            // Capacity freed in the prior state; the oldest waiter there, if
            // any, is handed off before the returned job is routed.
            books.release(&prior_state).await?;

            let new_state = job.state.clone();
            let parent_id = job.id.clone();
            run.update_job(job.clone());
            books.admit(job).await?;

            for (index, kick) in kick_requests.into_iter().enumerate() {
                let kicked = Job::new(format!("{parent_id}->{index}"), kick.payload, kick.state);
                run.update_job(kicked.clone());
                books.admit(kicked).await?;
            }

            if let Err(err) = self.serializer.serialize(run).await {
                error!(error = %err, "checkpoint failed, aborting rather than continuing past the last durable snapshot");
                std::process::abort();
            }

            // A no-kick self-loop changes no totals; skip the identical
            // snapshot.
            if prior_state != new_state || had_kicks {
                self.status_listener.status_update(books.snapshot());
            }

            if books.all_terminal(run) && !books.has_executing() {
                debug!(run = %run.name, "run complete");
                return Ok(());
            }
        }
    }
}

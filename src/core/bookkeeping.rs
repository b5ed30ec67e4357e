//! Per-state counters, waiting queues, and dispatch channels.
//!
//! Only the dispatcher touches this. Admission, release, and the status
//! snapshot are all synchronous with respect to the dispatcher task, which
//! is what keeps the counters consistent without locks.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::job::Job;
use crate::core::registry::StateRegistry;
use crate::core::run::Run;
use crate::error::{EngineError, EngineResult};

/// Counters for one state, as delivered to the status listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub state: String,
    pub completed: usize,
    pub executing: usize,
    pub waiting: usize,
    pub terminal: bool,
}

struct StateBook<JC> {
    count: StatusCount,
    capacity: usize,
    waiting: Vec<Job<JC>>,
    slot: Option<mpsc::Sender<Job<JC>>>,
}

pub(crate) struct Bookkeeping<JC> {
    books: HashMap<String, StateBook<JC>>,
    sorted_names: Vec<String>,
}

impl<JC> Bookkeeping<JC> {
    /// Build the books and one dispatch channel per non-terminal state,
    /// returning the receivers for the worker pools to share.
    pub(crate) fn new<AC, OC>(
        registry: &StateRegistry<AC, OC, JC>,
    ) -> (Self, HashMap<String, mpsc::Receiver<Job<JC>>>) {
        let mut books = HashMap::new();
        let mut receivers = HashMap::new();

        for state in registry.states() {
            let slot = if state.terminal {
                None
            } else {
                let (tx, rx) = mpsc::channel(1);
                receivers.insert(state.name.clone(), rx);
                Some(tx)
            };
            books.insert(
                state.name.clone(),
                StateBook {
                    count: StatusCount {
                        state: state.name.clone(),
                        terminal: state.terminal,
                        ..Default::default()
                    },
                    capacity: state.concurrency,
                    waiting: Vec::new(),
                    slot,
                },
            );
        }

        (
            Self {
                books,
                sorted_names: registry.sorted_names().to_vec(),
            },
            receivers,
        )
    }

    /// Route a job by its current state: terminal states count it completed,
    /// states with spare capacity get it handed off to a worker, saturated
    /// states queue it.
    pub(crate) async fn admit(&mut self, job: Job<JC>) -> EngineResult<()> {
        let book = self
            .books
            .get_mut(&job.state)
            .ok_or_else(|| EngineError::UnknownState {
                job_id: job.id.clone(),
                state: job.state.clone(),
            })?;

        if book.count.terminal {
            book.count.completed += 1;
            return Ok(());
        }

        if book.count.executing < book.capacity {
            return Self::hand_off(book, job).await;
        }

        book.count.waiting += 1;
        // Dequeue is from the tail, so newcomers go to the front: the
        // longest-waiting job is always released first. The O(n) insert is
        // noise next to the user work a transition represents.
        book.waiting.insert(0, job);
        Ok(())
    }

    /// One execution in `prior_state` finished: free its slot and, if a job
    /// is waiting there, hand the oldest waiter off in its place.
    pub(crate) async fn release(&mut self, prior_state: &str) -> EngineResult<()> {
        let book = self
            .books
            .get_mut(prior_state)
            .ok_or_else(|| EngineError::Internal(format!("released unknown state {prior_state}")))?;

        book.count.executing -= 1;

        let Some(job) = book.waiting.pop() else {
            return Ok(());
        };
        book.count.waiting -= 1;
        Self::hand_off(book, job).await
    }

    async fn hand_off(book: &mut StateBook<JC>, job: Job<JC>) -> EngineResult<()> {
        book.count.executing += 1;
        let slot = book.slot.as_ref().ok_or_else(|| {
            EngineError::Internal(format!("state {} has no dispatch channel", book.count.state))
        })?;
        slot.send(job).await.map_err(|_| {
            EngineError::Internal(format!("workers for state {} are gone", book.count.state))
        })
    }

    /// Fold a job into its state's completed counter without dispatching.
    /// Used when a run is already fully terminal at startup.
    pub(crate) fn complete(&mut self, job: &Job<JC>) {
        if let Some(book) = self.books.get_mut(&job.state) {
            book.count.completed += 1;
        }
    }

    pub(crate) fn is_terminal(&self, state: &str) -> bool {
        self.books.get(state).is_some_and(|b| b.count.terminal)
    }

    pub(crate) fn all_terminal<OC>(&self, run: &Run<OC, JC>) -> bool {
        run.jobs.values().all(|job| self.is_terminal(&job.state))
    }

    pub(crate) fn has_executing(&self) -> bool {
        self.books.values().any(|b| b.count.executing > 0)
    }

    /// Status counters for every state, in sorted-name order.
    pub(crate) fn snapshot(&self) -> Vec<StatusCount> {
        self.sorted_names
            .iter()
            .map(|name| self.books[name].count.clone())
            .collect()
    }
}

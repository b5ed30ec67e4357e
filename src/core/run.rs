use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::job::Job;
use crate::core::state::TRIGGER_STATE_NEW;

/// The aggregate for one execution: an overall context shared read-only with
/// every worker, and the map of all jobs by id. The run is the unit of
/// checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run<OC, JC> {
    pub name: String,
    pub overall: OC,
    pub jobs: HashMap<String, Job<JC>>,
}

impl<OC, JC> Run<OC, JC> {
    pub fn new(name: impl Into<String>, overall: OC) -> Self {
        Self {
            name: name.into(),
            overall,
            jobs: HashMap::new(),
        }
    }

    /// Add a job in the trigger state [`TRIGGER_STATE_NEW`], returning its id.
    pub fn add_job(&mut self, payload: JC) -> String {
        self.add_job_with_state(payload, TRIGGER_STATE_NEW)
    }

    /// Add a job in an explicit starting state, returning its id.
    pub fn add_job_with_state(&mut self, payload: JC, state: impl Into<String>) -> String {
        let id = format!("{}-{}", self.name, self.jobs.len());
        self.jobs
            .insert(id.clone(), Job::new(id.clone(), payload, state));
        id
    }

    /// Insert or replace a job by its id.
    pub fn update_job(&mut self, job: Job<JC>) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An addressable unit of work: an opaque payload plus the name of the state
/// it currently sits in.
///
/// `state_errors` accumulates, per state name, the error messages observed
/// while the job was in that state, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<JC> {
    pub id: String,
    pub payload: JC,
    pub state: String,
    #[serde(default)]
    pub state_errors: HashMap<String, Vec<String>>,
}

impl<JC> Job<JC> {
    pub fn new(id: impl Into<String>, payload: JC, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload,
            state: state.into(),
            state_errors: HashMap::new(),
        }
    }

    pub(crate) fn record_error(&mut self, state: &str, message: String) {
        self.state_errors
            .entry(state.to_string())
            .or_default()
            .push(message);
    }
}

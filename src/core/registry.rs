use std::collections::HashMap;

use crate::core::state::State;
use crate::error::{EngineError, EngineResult};

/// The validated, immutable set of states for one engine. Built once at
/// construction; lookups and sorted iteration only after that.
pub(crate) struct StateRegistry<AC, OC, JC> {
    states: HashMap<String, State<AC, OC, JC>>,
    sorted_names: Vec<String>,
}

impl<AC, OC, JC> std::fmt::Debug for StateRegistry<AC, OC, JC> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("sorted_names", &self.sorted_names)
            .finish_non_exhaustive()
    }
}

impl<AC, OC, JC> StateRegistry<AC, OC, JC> {
    pub(crate) fn from_states(states: Vec<State<AC, OC, JC>>) -> EngineResult<Self> {
        let mut map = HashMap::with_capacity(states.len());
        for state in states {
            if !state.terminal {
                if state.concurrency < 1 {
                    return Err(EngineError::NonPositiveConcurrency(state.name));
                }
                if state.exec.is_none() {
                    return Err(EngineError::MissingExec(state.name));
                }
            }
            if map.contains_key(&state.name) {
                return Err(EngineError::DuplicateState(state.name));
            }
            map.insert(state.name.clone(), state);
        }

        let mut sorted_names: Vec<String> = map.keys().cloned().collect();
        sorted_names.sort();

        Ok(Self {
            states: map,
            sorted_names,
        })
    }

    pub(crate) fn states(&self) -> impl Iterator<Item = &State<AC, OC, JC>> {
        self.states.values()
    }

    pub(crate) fn sorted_names(&self) -> &[String] {
        &self.sorted_names
    }
}

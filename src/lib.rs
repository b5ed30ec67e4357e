pub mod core;
pub mod error;

pub use crate::core::{
    CheckpointError, Engine, Job, JsonSerializer, KickRequest, NoopSerializer,
    NoopStatusListener, RateLimiter, Run, Serializer, State, StatusCount, StatusListener,
    StepFn, StepFuture, StepResult, TracingStatusListener, WaitCancelled, TRIGGER_STATE_NEW,
};
pub use crate::error::{EngineError, EngineResult};

pub mod bookkeeping;
pub mod checkpoint;
pub mod engine;
pub mod job;
pub mod rate_limit;
pub(crate) mod registry;
pub mod run;
pub mod state;
pub mod status;
pub(crate) mod worker;

pub use bookkeeping::StatusCount;
pub use checkpoint::{CheckpointError, JsonSerializer, NoopSerializer, Serializer};
pub use engine::Engine;
pub use job::Job;
pub use rate_limit::{RateLimiter, WaitCancelled};
pub use run::Run;
pub use state::{KickRequest, State, StepFn, StepFuture, StepResult, TRIGGER_STATE_NEW};
pub use status::{NoopStatusListener, StatusListener, TracingStatusListener};

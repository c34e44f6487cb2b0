//! Controller implementations for conduit CRDs
//!
//! Pipeline reconciles of all three kinds funnel into one synthesis actor
//! per signal type, which is the only writer of that signal type's collector
//! configuration. The Telemetry controller owns gateway scaling.

mod actor;
mod context;
pub mod pipeline;
mod state;
pub mod telemetry;
mod workload;

pub use actor::{ActorDeps, SignalRound, SynthesisActor, SynthesisHandle};
pub use context::{Context, ContextBuilder};
pub use pipeline::{
    error_policy, reconcile, secret_dependents, PipelineSnapshot, PipelineStore, PipelineStoreImpl,
};
pub use state::{conditions_changed, ConfigVerdict, PipelineEvaluation, PipelinePhase, Readiness};
pub use telemetry::{TelemetryStore, TelemetryStoreImpl};
pub use workload::{
    daemon_set_readiness, deployment_readiness, ReplicaTargets, WorkloadClient, WorkloadClientImpl,
};

pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, PipelineFlow};
pub use states::{RunAction, RunContext, RunEvent, RunState, TransitionOutcome};

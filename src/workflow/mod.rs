//! Generic staged-workflow engine shared by every agent.

mod engine;
mod state;

pub use engine::{Stage, StageError, Target, Workflow, WorkflowError};
pub use state::{StateUpdate, WorkflowState};

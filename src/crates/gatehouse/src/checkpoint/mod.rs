//! Checkpoints: human decisions that gate a workflow run

pub mod gate;
pub mod model;

pub use gate::{CheckpointGate, HookToken, ResolutionHook};
pub use model::{
    Checkpoint, CheckpointResponse, CheckpointStatus, Decision, NewCheckpoint, Priority,
    ResponseSubmission,
};

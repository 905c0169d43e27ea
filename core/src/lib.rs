//! Buildlog document model and the in-memory recording session manager.

pub mod document;
pub mod error;
pub mod feed;
pub mod recording;

pub use document::{
    ActionStep, CheckpointStep, DocumentMetadata, ErrorStep, NoteCategory, NoteStep, Outcome,
    OutcomeStatus, PromptStep, SourceAttribution, Step, StepBody, StepKind, TerminalStep,
    WorkflowDocument,
};
pub use error::RecordingError;
pub use feed::{AgentFeedFile, NoopFeed, StepFeed};
pub use recording::{RecordingConfig, RecordingManager, RecordingStats, StartOutcome};

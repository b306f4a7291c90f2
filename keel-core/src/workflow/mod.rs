//! Session-based workflow engine
//!
//! A [`WorkflowEngine`] drives each session through an ordered pipeline of
//! [`Stage`]s, one at a time:
//!
//! - **Sessions** live in an in-memory store keyed by id, each behind its own
//!   lock so concurrent sessions never block each other
//! - **Stages** read the session input and earlier outputs through a
//!   [`StageContext`] and return a [`StageOutput`] or a classified
//!   [`StageError`]
//! - **Continuation**: a failed first stage or a fatal failure ends the
//!   session; other failures are recorded and the pipeline moves on
//! - **Events**: lifecycle changes are broadcast as [`WorkflowEvent`]s
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_core::prelude::*;
//!
//! let engine = WorkflowEngine::from_config(KeelConfig::load()?)?;
//!
//! // Run to completion
//! let input = SessionInput::manual(ManualEntry::new("Boston Whaler", "Outrage 23"));
//! let session = engine.start_and_run(input).await?;
//! assert_eq!(session.step_results.len(), session.current_step);
//!
//! // Or one stage at a time
//! let id = engine.start(SessionInput::image(photo, "image/jpeg")).await?;
//! let record = engine.step(&id).await?;
//! println!("{} -> {:?}", record.stage_name, record.status);
//! ```

mod engine;
mod events;
mod result;
mod session;
mod stage;
mod store;

pub use engine::WorkflowEngine;
pub use events::{WorkflowEvent, WorkflowEventKind};
pub use result::{ErrorCode, StageError, StageFailure, StageOutput, StageResult};
pub use session::{
    InputSource, ManualEntry, Progress, Session, SessionInput, SessionStatus, StepRecord,
    StepStatus, UsageAnswers,
};
pub use stage::{Stage, StageContext, StageServices};

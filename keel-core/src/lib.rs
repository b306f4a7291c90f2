//! # Keel - Vessel Baseline Profiling
//!
//! Keel turns a boat photo or a manual description, plus optional GPS/engine
//! telemetry, into a baseline vessel profile:
//! - Vessel attributes extracted by a vision model, or entered by hand
//! - A normalized profile with explicit `"not specified"` gaps
//! - Estimated speed/power/fuel performance curves
//! - Voyage and dwell segmentation of telemetry
//! - Fuel, emissions and refuel analytics
//! - A final report with rendered charts and CSV exports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keel_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = WorkflowEngine::from_config(KeelConfig::load()?)?;
//!
//!     let input = SessionInput::manual(ManualEntry::new("Boston Whaler", "Outrage 23"));
//!     let session = engine.start_and_run(input).await?;
//!
//!     for step in &session.step_results {
//!         println!("{}: {:?}", step.stage_name, step.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The [`workflow::WorkflowEngine`] owns a store of sessions and an ordered
//! pipeline of [`workflow::Stage`]s. Stages talk to the outside world only
//! through [`workflow::StageServices`]: an [`llm::LLMProvider`], a
//! [`render::ChartRenderer`] and a [`render::CsvExporter`].
//!
//! ## Feature Flags
//!
//! - `llm-openai` (default): OpenAI-compatible chat completions provider

pub mod config;
pub mod error;
pub mod llm;
pub mod parsing;
pub mod render;
pub mod stages;
pub mod telemetry;
pub mod vessel;
pub mod workflow;

pub use error::{KeelError, Result};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        AnalyticsConfig, ContinuationPolicy, CurveConfig, KeelConfig, LLMProviderConfig,
        LLMProviderKind, TelemetryConfig, WorkflowConfig,
    };
    pub use crate::error::{KeelError, Result};
    pub use crate::llm::{
        InferenceError, LLMProvider, LLMProviderFactory, LLMRequest, LLMResponse, Message,
        MessageRole, ScriptedProvider, ScriptedReply, StubLLMProvider,
    };
    pub use crate::parsing::{JsonParser, OutputParser, ParseError};
    pub use crate::render::{
        ChartRenderer, ChartSpec, CsvExporter, CsvTableExporter, RenderError, RenderedChart,
        SvgChartRenderer, Table,
    };
    pub use crate::stages::{
        BaselineReport, BoatAnalysis, BoatSpecifications, PerformanceCurves, TelemetryAnalysis,
        VesselProfile, VoyageAnalytics, default_pipeline,
    };
    pub use crate::telemetry::TelemetryRecord;
    pub use crate::vessel::{FuelType, HullType, NOT_SPECIFIED, Spec};
    pub use crate::workflow::{
        ErrorCode, InputSource, ManualEntry, Progress, Session, SessionInput, SessionStatus,
        Stage, StageContext, StageError, StageOutput, StageResult, StageServices, StepRecord,
        StepStatus, UsageAnswers, WorkflowEngine, WorkflowEvent, WorkflowEventKind,
    };
}

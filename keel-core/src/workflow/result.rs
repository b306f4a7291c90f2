//! Stage results and failure classification

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::llm::InferenceError;
use crate::parsing::ParseError;
use crate::render::RenderError;
use crate::stages::{
    BaselineReport, BoatAnalysis, PerformanceCurves, TelemetryAnalysis, VesselProfile,
    VoyageAnalytics,
};

/// Stable failure codes recorded with every failed stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InputInvalid,
    UpstreamMissing,
    InferenceFailure,
    InferenceMalformed,
    RenderFailure,
    ComputeInvalid,
    /// The stage panicked
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InputInvalid => "INPUT_INVALID",
            ErrorCode::UpstreamMissing => "UPSTREAM_MISSING",
            ErrorCode::InferenceFailure => "INFERENCE_FAILURE",
            ErrorCode::InferenceMalformed => "INFERENCE_MALFORMED",
            ErrorCode::RenderFailure => "RENDER_FAILURE",
            ErrorCode::ComputeInvalid => "COMPUTE_INVALID",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded stage failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub error: String,
    pub error_code: ErrorCode,
    /// Stops the session regardless of continuation policy
    pub fatal: bool,
}

/// Output of one successful stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    ImageAnalyzer(BoatAnalysis),
    ProfileBuilder(VesselProfile),
    PerformanceCurves(PerformanceCurves),
    TelemetryProcessor(TelemetryAnalysis),
    VoyageAnalytics(VoyageAnalytics),
    ReportGenerator(BaselineReport),
}

impl StageOutput {
    pub fn as_analysis(&self) -> Option<&BoatAnalysis> {
        match self {
            StageOutput::ImageAnalyzer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_profile(&self) -> Option<&VesselProfile> {
        match self {
            StageOutput::ProfileBuilder(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_curves(&self) -> Option<&PerformanceCurves> {
        match self {
            StageOutput::PerformanceCurves(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_telemetry(&self) -> Option<&TelemetryAnalysis> {
        match self {
            StageOutput::TelemetryProcessor(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_analytics(&self) -> Option<&VoyageAnalytics> {
        match self {
            StageOutput::VoyageAnalytics(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_report(&self) -> Option<&BaselineReport> {
        match self {
            StageOutput::ReportGenerator(v) => Some(v),
            _ => None,
        }
    }
}

/// Outcome of one stage attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success(StageOutput),
    Failed(StageFailure),
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success(_))
    }

    pub fn output(&self) -> Option<&StageOutput> {
        match self {
            StageResult::Success(output) => Some(output),
            StageResult::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            StageResult::Success(_) => None,
            StageResult::Failed(failure) => Some(failure),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.failure().map(|f| f.error_code)
    }
}

impl From<Result<StageOutput, StageError>> for StageResult {
    fn from(result: Result<StageOutput, StageError>) -> Self {
        match result {
            Ok(output) => StageResult::Success(output),
            Err(err) => StageResult::Failed(err.into()),
        }
    }
}

/// Error raised inside a stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    InputInvalid(String),

    #[error("missing upstream output: {0}")]
    UpstreamMissing(String),

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("model reply unusable: {0}")]
    Malformed(#[from] ParseError),

    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("{0}")]
    ComputeInvalid(String),

    /// Any error that must stop the session
    #[error("{0}")]
    Fatal(Box<StageError>),
}

impl StageError {
    /// Mark this error as session-ending
    pub fn fatal(self) -> Self {
        match self {
            StageError::Fatal(_) => self,
            other => StageError::Fatal(Box::new(other)),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Fatal(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            StageError::InputInvalid(_) => ErrorCode::InputInvalid,
            StageError::UpstreamMissing(_) => ErrorCode::UpstreamMissing,
            StageError::Inference(InferenceError::Malformed(_)) => ErrorCode::InferenceMalformed,
            StageError::Inference(_) => ErrorCode::InferenceFailure,
            StageError::Malformed(_) => ErrorCode::InferenceMalformed,
            StageError::Render(_) => ErrorCode::RenderFailure,
            StageError::ComputeInvalid(_) => ErrorCode::ComputeInvalid,
            StageError::Fatal(inner) => inner.code(),
        }
    }
}

impl From<StageError> for StageFailure {
    fn from(err: StageError) -> Self {
        StageFailure {
            error_code: err.code(),
            fatal: err.is_fatal(),
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            StageError::Inference(InferenceError::Timeout(Duration::from_secs(1))).code(),
            ErrorCode::InferenceFailure
        );
        assert_eq!(
            StageError::Inference(InferenceError::Malformed("x".into())).code(),
            ErrorCode::InferenceMalformed
        );
        assert_eq!(
            StageError::Malformed(ParseError::EmptyInput).code(),
            ErrorCode::InferenceMalformed
        );
        assert_eq!(
            StageError::Render(RenderError::Backend("x".into())).code(),
            ErrorCode::RenderFailure
        );
        assert_eq!(ErrorCode::UpstreamMissing.to_string(), "UPSTREAM_MISSING");
    }

    #[test]
    fn test_fatal_keeps_inner_code() {
        let failure: StageFailure = StageError::ComputeInvalid("negative fuel".into())
            .fatal()
            .into();
        assert!(failure.fatal);
        assert_eq!(failure.error_code, ErrorCode::ComputeInvalid);
        assert_eq!(failure.error, "negative fuel");
    }

    #[test]
    fn test_failed_result_serialization() {
        let result = StageResult::Failed(StageFailure {
            error: "Missing required fields: class_model".into(),
            error_code: ErrorCode::InputInvalid,
            fatal: false,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_code"], "INPUT_INVALID");
        assert_eq!(json["fatal"], false);
    }
}

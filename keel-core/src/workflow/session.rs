//! Session state owned by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::result::{StageOutput, StageResult};
use crate::render::base64_bytes;
use crate::telemetry::TelemetryRecord;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Whether the session accepts no further steps
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Outcome flag of a recorded step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
}

/// One attempted stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub stage_name: String,
    pub status: StepStatus,
    pub result: StageResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepRecord {
    pub(crate) fn new(
        stage_name: &str,
        result: StageResult,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let status = if result.is_success() {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            stage_name: stage_name.to_string(),
            status,
            result,
            started_at,
            finished_at,
            duration_ms,
        }
    }
}

/// Fields typed in by the user instead of supplying a photo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualEntry {
    pub builder_make: String,
    pub class_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mmsi: Option<String>,
    /// Free text such as `25 ft` or `7.6 m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boat_type: Option<String>,
}

impl ManualEntry {
    pub fn new(builder_make: impl Into<String>, class_model: impl Into<String>) -> Self {
        Self {
            builder_make: builder_make.into(),
            class_model: class_model.into(),
            ..Default::default()
        }
    }
}

/// Where the vessel description comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    Image {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        brand: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Manual(ManualEntry),
}

/// Answers to the usage questionnaire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageAnswers {
    pub primary_use: Option<String>,
    /// Hours per operating day
    pub operating_hours: Option<f64>,
    /// Months per year in service
    pub operating_season: Option<f64>,
    /// Percent of rated capacity
    pub typical_load: Option<f64>,
    pub operating_conditions: Option<String>,
}

/// Everything the caller supplies when starting a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInput {
    pub source: InputSource,
    #[serde(default)]
    pub telemetry: Vec<TelemetryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageAnswers>,
}

impl SessionInput {
    /// Photo of the vessel, optionally with the known brand and model
    pub fn image(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            source: InputSource::Image {
                bytes,
                media_type: media_type.into(),
                brand: None,
                model: None,
            },
            telemetry: Vec::new(),
            usage: None,
        }
    }

    pub fn manual(entry: ManualEntry) -> Self {
        Self {
            source: InputSource::Manual(entry),
            telemetry: Vec::new(),
            usage: None,
        }
    }

    /// Set brand and model hints on an image input; ignored for manual input
    pub fn with_brand_model(mut self, brand: Option<String>, model: Option<String>) -> Self {
        if let InputSource::Image {
            brand: b, model: m, ..
        } = &mut self.source
        {
            *b = brand;
            *m = model;
        }
        self
    }

    pub fn with_telemetry(mut self, telemetry: Vec<TelemetryRecord>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_usage(mut self, usage: UsageAnswers) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A single profiling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    /// Index of the next stage to run
    pub current_step: usize,
    pub input: SessionInput,
    /// Validated outputs keyed by stage name
    pub context: BTreeMap<String, StageOutput>,
    pub step_results: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Session {
    pub(crate) fn new(input: SessionInput) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Created,
            current_step: 0,
            input,
            context: BTreeMap::new(),
            step_results: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure_reason: None,
        }
    }

    /// Append a step record, storing the output on success
    pub(crate) fn record(&mut self, record: StepRecord) {
        if let StageResult::Success(output) = &record.result {
            self.context.insert(record.stage_name.clone(), output.clone());
        }
        self.updated_at = record.finished_at;
        self.step_results.push(record);
        self.current_step += 1;
    }

    /// Move a CREATED session to RUNNING. Returns false if it already left CREATED.
    pub(crate) fn begin(&mut self) -> bool {
        if self.status != SessionStatus::Created {
            return false;
        }
        self.status = SessionStatus::Running;
        self.updated_at = Utc::now();
        true
    }

    pub(crate) fn finish(&mut self, status: SessionStatus, reason: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.failure_reason = reason;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn output(&self, stage: &str) -> Option<&StageOutput> {
        self.context.get(stage)
    }

    pub fn last_step(&self) -> Option<&StepRecord> {
        self.step_results.last()
    }
}

/// Snapshot suitable for progress polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub session_id: String,
    pub status: SessionStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub percent_complete: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<String>,
}

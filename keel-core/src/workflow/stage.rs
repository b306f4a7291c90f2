//! Stage contract
//!
//! Every pipeline stage implements [`Stage`]. A stage reads the session input
//! and the outputs of earlier stages through a read-only [`StageContext`] and
//! returns its own output or a [`StageError`]. The engine records the result;
//! stages never touch the session directly.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::result::{StageError, StageOutput};
use super::session::SessionInput;
use crate::config::KeelConfig;
use crate::llm::{InferenceError, LLMProvider, LLMRequest};
use crate::render::{ChartRenderer, ChartSpec, CsvExporter, RenderError, RenderedChart, Table};
use crate::stages::{
    BoatAnalysis, PerformanceCurves, TelemetryAnalysis, VesselProfile, VoyageAnalytics,
};

/// Collaborators handed to every stage
#[derive(Clone)]
pub struct StageServices {
    pub provider: Arc<dyn LLMProvider>,
    pub renderer: Arc<dyn ChartRenderer>,
    pub exporter: Arc<dyn CsvExporter>,
    pub config: Arc<KeelConfig>,
}

impl StageServices {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        renderer: Arc<dyn ChartRenderer>,
        exporter: Arc<dyn CsvExporter>,
        config: KeelConfig,
    ) -> Self {
        Self {
            provider,
            renderer,
            exporter,
            config: Arc::new(config),
        }
    }
}

impl std::fmt::Debug for StageServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.provider.model_info();
        f.debug_struct("StageServices")
            .field("provider", &info.provider)
            .field("model", &info.model_name)
            .field("renderer", &self.renderer.media_type())
            .finish()
    }
}

/// Read-only view of a session handed to a stage
pub struct StageContext<'a> {
    pub session_id: &'a str,
    pub input: &'a SessionInput,
    pub outputs: &'a BTreeMap<String, StageOutput>,
    pub services: &'a StageServices,
}

impl<'a> StageContext<'a> {
    pub fn config(&self) -> &KeelConfig {
        &self.services.config
    }

    pub fn output(&self, stage: &str) -> Option<&'a StageOutput> {
        self.outputs.get(stage)
    }

    pub fn analysis(&self) -> Option<&'a BoatAnalysis> {
        self.outputs.values().find_map(StageOutput::as_analysis)
    }

    pub fn profile(&self) -> Option<&'a VesselProfile> {
        self.outputs.values().find_map(StageOutput::as_profile)
    }

    pub fn curves(&self) -> Option<&'a PerformanceCurves> {
        self.outputs.values().find_map(StageOutput::as_curves)
    }

    pub fn telemetry(&self) -> Option<&'a TelemetryAnalysis> {
        self.outputs.values().find_map(StageOutput::as_telemetry)
    }

    pub fn analytics(&self) -> Option<&'a VoyageAnalytics> {
        self.outputs.values().find_map(StageOutput::as_analytics)
    }

    pub fn require_analysis(&self) -> Result<&'a BoatAnalysis, StageError> {
        self.analysis()
            .ok_or_else(|| StageError::UpstreamMissing("boat specifications".into()))
    }

    pub fn require_profile(&self) -> Result<&'a VesselProfile, StageError> {
        self.profile()
            .ok_or_else(|| StageError::UpstreamMissing("vessel profile".into()))
    }

    pub fn require_curves(&self) -> Result<&'a PerformanceCurves, StageError> {
        self.curves()
            .ok_or_else(|| StageError::UpstreamMissing("performance curves".into()))
    }

    pub fn require_telemetry(&self) -> Result<&'a TelemetryAnalysis, StageError> {
        self.telemetry()
            .ok_or_else(|| StageError::UpstreamMissing("telemetry summary".into()))
    }

    /// Send a request and recover a JSON object, bounded by the configured
    /// inference timeout.
    pub async fn infer(&self, request: LLMRequest) -> Result<Map<String, Value>, StageError> {
        let llm = &self.config().llm;
        let request = request
            .with_temperature(llm.temperature)
            .with_max_tokens(llm.max_tokens);
        let timeout = self.config().workflow.inference_timeout;

        tracing::debug!(
            session_id = %self.session_id,
            images = request.images.len(),
            "Sending inference request"
        );

        match tokio::time::timeout(timeout, self.services.provider.generate_structured(&request)).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(InferenceError::Timeout(timeout).into()),
        }
    }

    /// Render a chart, bounded by the configured render timeout
    pub async fn render_chart(&self, spec: &ChartSpec) -> Result<RenderedChart, StageError> {
        let timeout = self.config().workflow.render_timeout;
        let data = tokio::time::timeout(timeout, self.services.renderer.render_chart(spec))
            .await
            .map_err(|_| RenderError::Timeout(timeout))??;

        Ok(RenderedChart {
            name: spec.name.clone(),
            title: spec.title.clone(),
            media_type: self.services.renderer.media_type().to_string(),
            data,
        })
    }

    pub fn export_csv(&self, table: &Table) -> Result<String, StageError> {
        Ok(self.services.exporter.to_csv(table)?)
    }
}

/// A unit of the profiling pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable name, also the key of the stage's output in the session context
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// Names of earlier stages whose outputs this stage needs
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;
}

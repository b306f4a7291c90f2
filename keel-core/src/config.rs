//! Configuration types for Keel

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{KeelError, Result};
use crate::vessel::FuelType;

/// Main configuration for the Keel workflow
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeelConfig {
    /// Model inference provider configuration
    pub llm: LLMProviderConfig,

    /// Engine timeouts, session expiry and continuation policy
    pub workflow: WorkflowConfig,

    /// Voyage segmentation thresholds
    pub telemetry: TelemetryConfig,

    /// Fuel and emission constants
    pub analytics: AnalyticsConfig,

    /// Performance curve sampling
    pub curves: CurveConfig,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: LLMProviderKind,

    /// Model name
    pub model: String,

    /// API key (if needed, prefer env vars)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Sampling temperature for every request
    pub temperature: f32,

    /// Completion token cap
    pub max_tokens: usize,

    /// Attempts per request, transient failures only
    pub retry_attempts: usize,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self {
            provider: LLMProviderKind::OpenAI,
            model: "gpt-4o".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.1,
            max_tokens: 500,
            retry_attempts: 3,
        }
    }
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProviderKind {
    /// OpenAI-compatible chat completions (OpenAI, GitHub Models, Azure inference)
    OpenAI,
    /// Offline provider answering with empty JSON objects
    Stub,
}

/// What the engine does after a stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    /// Only a failure of the first stage, or one the stage marks fatal, stops the session
    #[default]
    FirstStageOnly,
    /// Any stage failure stops the session
    Strict,
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Upper bound on a single inference call
    #[serde(with = "humantime_serde")]
    pub inference_timeout: Duration,

    /// Upper bound on a single chart render
    #[serde(with = "humantime_serde")]
    pub render_timeout: Duration,

    /// Sessions idle longer than this are evicted
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Failure handling between stages
    pub continuation: ContinuationPolicy,

    /// Lifecycle event channel capacity
    pub event_buffer: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            inference_timeout: Duration::from_secs(60),
            render_timeout: Duration::from_secs(15),
            session_ttl: Duration::from_secs(3600),
            continuation: ContinuationPolicy::FirstStageOnly,
            event_buffer: 256,
        }
    }
}

/// Telemetry segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Speed over ground at or above which a record counts as underway
    pub underway_speed_knots: f64,

    /// Runs with fewer records are discarded
    pub min_segment_points: usize,

    /// Runs spanning less time are discarded
    #[serde(with = "humantime_serde")]
    pub min_segment_duration: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            underway_speed_knots: 0.5,
            min_segment_points: 2,
            min_segment_duration: Duration::ZERO,
        }
    }
}

/// Fuel and emission constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Emission factors in pounds of CO2 per gallon
    pub emission_factors: EmissionFactors,

    /// Auxiliary fuel burn while docked when no fuel flow was observed, gal/h
    pub idle_aux_fuel_gph: f64,

    /// Estimated tank capacity per foot of hull length, gallons
    pub tank_gallons_per_foot: f64,

    /// Multiplier applied to dwell fuel when estimating a refuel
    pub refuel_buffer: f64,

    /// Fuel assumed when the profile does not name one
    pub default_fuel: FuelType,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            emission_factors: EmissionFactors::default(),
            idle_aux_fuel_gph: 0.5,
            tank_gallons_per_foot: 2.0,
            refuel_buffer: 1.1,
            default_fuel: FuelType::MarineDiesel,
        }
    }
}

/// Pounds of CO2 released per gallon burned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionFactors {
    pub gasoline: f64,
    pub diesel: f64,
    pub other: f64,
}

impl Default for EmissionFactors {
    fn default() -> Self {
        Self {
            gasoline: 19.59,
            diesel: 22.38,
            other: 22.38,
        }
    }
}

impl EmissionFactors {
    /// Factor for a fuel type; electric propulsion emits nothing on board
    pub fn for_fuel(&self, fuel: FuelType) -> f64 {
        match fuel {
            FuelType::Gasoline => self.gasoline,
            FuelType::MarineDiesel => self.diesel,
            FuelType::Hybrid | FuelType::Other => self.other,
            FuelType::Electric => 0.0,
        }
    }
}

/// Performance curve sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    /// Number of speed samples per curve
    pub sample_count: usize,

    /// Lowest sampled speed, knots
    pub min_speed_knots: f64,

    /// Top speed used when the model gives none, knots
    pub default_max_speed_knots: f64,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            sample_count: 13,
            min_speed_knots: 5.0,
            default_max_speed_knots: 30.0,
        }
    }
}

/// Builder for KeelConfig
pub struct ConfigBuilder {
    config: KeelConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: KeelConfig::default(),
        }
    }

    /// Set LLM configuration
    pub fn llm(mut self, config: LLMProviderConfig) -> Self {
        self.config.llm = config;
        self
    }

    /// Set workflow configuration
    pub fn workflow(mut self, config: WorkflowConfig) -> Self {
        self.config.workflow = config;
        self
    }

    /// Set telemetry configuration
    pub fn telemetry(mut self, config: TelemetryConfig) -> Self {
        self.config.telemetry = config;
        self
    }

    /// Set analytics configuration
    pub fn analytics(mut self, config: AnalyticsConfig) -> Self {
        self.config.analytics = config;
        self
    }

    /// Set curve configuration
    pub fn curves(mut self, config: CurveConfig) -> Self {
        self.config.curves = config;
        self
    }

    /// Set the continuation policy
    pub fn continuation(mut self, policy: ContinuationPolicy) -> Self {
        self.config.workflow.continuation = policy;
        self
    }

    /// Set the inference timeout
    pub fn inference_timeout(mut self, timeout: Duration) -> Self {
        self.config.workflow.inference_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> KeelConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeelConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `keel.toml` in the working directory
    /// 3. File named by `KEEL_CONFIG_PATH`
    /// 4. `KEEL_`-prefixed environment variables, `__` separating sections
    ///    (`KEEL_WORKFLOW__INFERENCE_TIMEOUT=30s`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(KeelConfig::default()))
            .merge(Toml::file("keel.toml"));

        if let Ok(path) = std::env::var("KEEL_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("KEEL_").ignore(&["CONFIG_PATH"]).split("__"));

        let config: KeelConfig = figment.extract().map_err(|e| {
            KeelError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: KeelConfig = Figment::from(Serialized::defaults(KeelConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                KeelError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for zero timeouts, negative thresholds or an empty
    /// curve sample range.
    pub fn validate(&self) -> Result<()> {
        let workflow = &self.workflow;
        if workflow.inference_timeout.is_zero() {
            return Err(KeelError::Configuration(
                "workflow.inference_timeout must be positive".to_string(),
            ));
        }
        if workflow.render_timeout.is_zero() {
            return Err(KeelError::Configuration(
                "workflow.render_timeout must be positive".to_string(),
            ));
        }
        if workflow.event_buffer == 0 {
            return Err(KeelError::Configuration(
                "workflow.event_buffer must be at least 1".to_string(),
            ));
        }

        let telemetry = &self.telemetry;
        if !telemetry.underway_speed_knots.is_finite() || telemetry.underway_speed_knots < 0.0 {
            return Err(KeelError::Configuration(
                "telemetry.underway_speed_knots must be a non-negative number".to_string(),
            ));
        }

        let analytics = &self.analytics;
        let factors = &analytics.emission_factors;
        for (name, value) in [
            ("analytics.emission_factors.gasoline", factors.gasoline),
            ("analytics.emission_factors.diesel", factors.diesel),
            ("analytics.emission_factors.other", factors.other),
            ("analytics.idle_aux_fuel_gph", analytics.idle_aux_fuel_gph),
            ("analytics.tank_gallons_per_foot", analytics.tank_gallons_per_foot),
            ("analytics.refuel_buffer", analytics.refuel_buffer),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(KeelError::Configuration(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }

        let curves = &self.curves;
        if curves.sample_count < 2 {
            return Err(KeelError::Configuration(
                "curves.sample_count must be at least 2".to_string(),
            ));
        }
        if !(curves.min_speed_knots > 0.0
            && curves.default_max_speed_knots > curves.min_speed_knots)
        {
            return Err(KeelError::Configuration(
                "curves speed range must satisfy 0 < min_speed_knots < default_max_speed_knots"
                    .to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(KeelError::Configuration(
                "llm.temperature must be within 0.0..=2.0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = KeelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workflow.continuation, ContinuationPolicy::FirstStageOnly);
        assert_eq!(config.analytics.emission_factors.diesel, 22.38);
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn test_from_file_partial_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[workflow]
inference_timeout = "5s"
continuation = "strict"

[telemetry]
underway_speed_knots = 1.5
"#
        )
        .unwrap();

        let config = KeelConfig::from_file(file.path()).unwrap();
        assert_eq!(config.workflow.inference_timeout, Duration::from_secs(5));
        assert_eq!(config.workflow.continuation, ContinuationPolicy::Strict);
        assert_eq!(config.telemetry.underway_speed_knots, 1.5);
        // untouched sections keep defaults
        assert_eq!(config.workflow.render_timeout, Duration::from_secs(15));
        assert_eq!(config.curves.sample_count, 13);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = KeelConfig::default();
        config.workflow.inference_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(KeelError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let mut config = KeelConfig::default();
        config.telemetry.underway_speed_knots = -1.0;
        assert!(config.validate().is_err());

        let mut config = KeelConfig::default();
        config.analytics.refuel_buffer = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .continuation(ContinuationPolicy::Strict)
            .inference_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(config.workflow.continuation, ContinuationPolicy::Strict);
        assert_eq!(config.workflow.inference_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_emission_factor_lookup() {
        let factors = EmissionFactors::default();
        assert_eq!(factors.for_fuel(FuelType::Gasoline), 19.59);
        assert_eq!(factors.for_fuel(FuelType::Electric), 0.0);
    }
}

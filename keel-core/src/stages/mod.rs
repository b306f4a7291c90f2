//! The six profiling stages
//!
//! Each stage implements [`crate::workflow::Stage`] and stores its output in
//! the session context under its name. [`default_pipeline`] returns them in
//! execution order:
//!
//! 1. [`ImageAnalyzer`] - vessel attributes from a photo or manual entry
//! 2. [`ProfileBuilder`] - normalized vessel profile
//! 3. [`PerformanceCurveGenerator`] - speed/power/fuel curves
//! 4. [`TelemetryProcessor`] - voyages and dwell periods
//! 5. [`VoyageAnalyticsEngine`] - fuel burn and emissions
//! 6. [`ReportGenerator`] - baseline report with charts

use std::sync::Arc;

use crate::workflow::Stage;

pub mod image_analyzer;
pub mod performance_curves;
pub mod profile_builder;
pub mod report_generator;
pub mod telemetry_processor;
pub mod voyage_analytics;

pub use image_analyzer::{AnalysisMethod, BoatAnalysis, BoatSpecifications, ImageAnalyzer};
pub use performance_curves::{
    Curve, CurvePoint, CurveSet, HullParameters, PerformanceCurveGenerator, PerformanceCurves,
};
pub use profile_builder::{
    OperationalProfile, PhysicalSpecifications, ProfileAttribute, ProfileBuilder, UsageQuestion,
    VesselIdentity, VesselProfile,
};
pub use report_generator::{BaselineReport, Deliverables, ExecutiveSummary, ReportGenerator};
pub use telemetry_processor::{SegmentStats, TelemetryAnalysis, TelemetryProcessor};
pub use voyage_analytics::{DwellFuel, EmissionsSummary, VoyageAnalytics, VoyageAnalyticsEngine, VoyageFuel};

pub const IMAGE_ANALYZER: &str = "image_analyzer";
pub const PROFILE_BUILDER: &str = "profile_builder";
pub const PERFORMANCE_CURVES: &str = "performance_curves";
pub const TELEMETRY_PROCESSOR: &str = "telemetry_processor";
pub const VOYAGE_ANALYTICS: &str = "voyage_analytics";
pub const REPORT_GENERATOR: &str = "report_generator";

/// The standard six-stage pipeline in execution order
pub fn default_pipeline() -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(ImageAnalyzer::new()),
        Arc::new(ProfileBuilder::new()),
        Arc::new(PerformanceCurveGenerator::new()),
        Arc::new(TelemetryProcessor::new()),
        Arc::new(VoyageAnalyticsEngine::new()),
        Arc::new(ReportGenerator::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order() {
        let names: Vec<_> = default_pipeline().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            [
                IMAGE_ANALYZER,
                PROFILE_BUILDER,
                PERFORMANCE_CURVES,
                TELEMETRY_PROCESSOR,
                VOYAGE_ANALYTICS,
                REPORT_GENERATOR
            ]
        );
    }

    #[test]
    fn test_requirements_point_backwards() {
        let pipeline = default_pipeline();
        for (idx, stage) in pipeline.iter().enumerate() {
            for required in stage.requires() {
                let pos = pipeline.iter().position(|s| s.name() == *required);
                assert!(
                    pos.is_some_and(|p| p < idx),
                    "{} requires {} which does not run earlier",
                    stage.name(),
                    required
                );
            }
        }
    }
}

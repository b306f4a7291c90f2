//! Stage 6: the baseline report
//!
//! Assembles whatever the earlier stages produced into an executive summary,
//! a deliverables checklist and a set of rendered charts. Only the vessel
//! profile is mandatory; every other section degrades to zeros or is left
//! out when its upstream stage failed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::render::{ChartKind, ChartSpec, DataPoint, RenderedChart, Series};
use crate::vessel::Spec;
use crate::workflow::{Stage, StageContext, StageError, StageOutput};

use super::{
    Curve, PROFILE_BUILDER, PerformanceCurves, REPORT_GENERATOR, TelemetryAnalysis,
    VesselProfile, VoyageAnalytics,
};

pub const REPORT_TITLE: &str = "Baseline Vessel Profile Report";

const UNNAMED_VESSEL: &str = "Unnamed Vessel";

/// Auxiliary share of fuel above which electrification is flagged
const AUX_SHARE_THRESHOLD: f64 = 20.0;

/// Fleet-typical efficiency floor in nautical miles per gallon
const LOW_EFFICIENCY_NMPG: f64 = 2.0;

const NEXT_STEPS: &[&str] = &[
    "Validate performance curves with naval architect review",
    "Implement real-time monitoring for continuous optimization",
    "Explore electrification opportunities based on operational patterns",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalSummary {
    pub total_operating_hours: f64,
    pub total_distance_nm: f64,
    pub voyage_count: usize,
    pub dwell_count: usize,
    pub average_fuel_efficiency_nmpg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalImpact {
    pub total_fuel_gallons: f64,
    pub total_co2_emissions_lbs: f64,
    pub total_co2_emissions_tons: f64,
    pub operational_percentage: f64,
    pub auxiliary_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub vessel_name: String,
    pub vessel_type: String,
    pub builder_make: String,
    pub class_model: String,
    pub length: String,
    pub beam: String,
    pub fuel_type: String,
    pub operational_summary: OperationalSummary,
    pub environmental_impact: EnvironmentalImpact,
    pub baseline_status: String,
}

/// What the pipeline actually produced for this session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverables {
    pub baseline_profile_complete: bool,
    pub performance_curves_generated: bool,
    pub telemetry_processed: bool,
    pub voyage_analytics_complete: bool,
    pub emissions_calculated: bool,
    pub charts_rendered: bool,
    pub json_compatible: bool,
}

impl Deliverables {
    fn checklist(&self) -> [(&'static str, bool); 7] {
        [
            ("baseline profile", self.baseline_profile_complete),
            ("performance curves", self.performance_curves_generated),
            ("telemetry", self.telemetry_processed),
            ("voyage analytics", self.voyage_analytics_complete),
            ("emissions", self.emissions_calculated),
            ("charts", self.charts_rendered),
            ("json", self.json_compatible),
        ]
    }

    pub fn missing(&self) -> Vec<&'static str> {
        self.checklist()
            .into_iter()
            .filter(|(_, done)| !done)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.checklist().iter().all(|(_, done)| *done)
    }
}

/// Output of the report generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineReport {
    pub report_title: String,
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub executive_summary: ExecutiveSummary,
    pub vessel_profile: VesselProfile,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
    pub deliverables: Deliverables,
    pub charts: Vec<RenderedChart>,
}

impl BaselineReport {
    pub fn chart(&self, name: &str) -> Option<&RenderedChart> {
        self.charts.iter().find(|c| c.name == name)
    }
}

fn operational_summary(
    telemetry: Option<&TelemetryAnalysis>,
    analytics: Option<&VoyageAnalytics>,
) -> OperationalSummary {
    match (analytics, telemetry) {
        (Some(a), _) => OperationalSummary {
            total_operating_hours: a.voyage_totals.total_operating_hours,
            total_distance_nm: a.voyage_totals.total_distance_nm,
            voyage_count: a.voyage_totals.voyage_count,
            dwell_count: a.dwell_totals.dwell_count,
            average_fuel_efficiency_nmpg: a.voyage_totals.average_fuel_efficiency_nmpg,
        },
        (None, Some(t)) => OperationalSummary {
            total_operating_hours: t.statistics.total_operating_hours,
            total_distance_nm: t.statistics.total_distance_nm,
            voyage_count: t.telemetry_summary.voyage_count,
            dwell_count: t.telemetry_summary.dwell_count,
            average_fuel_efficiency_nmpg: 0.0,
        },
        (None, None) => OperationalSummary::default(),
    }
}

fn environmental_impact(analytics: Option<&VoyageAnalytics>) -> EnvironmentalImpact {
    let Some(e) = analytics.map(|a| &a.emissions_summary) else {
        return EnvironmentalImpact::default();
    };
    EnvironmentalImpact {
        total_fuel_gallons: e.total_fuel_consumption_gallons,
        total_co2_emissions_lbs: e.total_co2_emissions_lbs,
        total_co2_emissions_tons: e.total_co2_emissions_tons,
        operational_percentage: e.operational_percentage,
        auxiliary_percentage: e.auxiliary_percentage,
    }
}

fn key_findings(
    summary: &ExecutiveSummary,
    curves: Option<&PerformanceCurves>,
    analytics: Option<&VoyageAnalytics>,
) -> Vec<String> {
    let ops = &summary.operational_summary;
    let env = &summary.environmental_impact;

    let curve_finding = match curves.and_then(|c| {
        let points = &c.performance_curves.speed_vs_fuel_rate.points;
        Some((points.first()?.x, points.last()?.x))
    }) {
        Some((low, high)) => format!(
            "Performance curves estimated from {:.0} to {:.0} knots",
            low, high
        ),
        None => "Performance curves could not be generated".to_string(),
    };

    let mut findings = vec![
        format!("Vessel identified as {} ({})", summary.vessel_name, summary.vessel_type),
        curve_finding,
        format!(
            "{} voyages and {} dwell periods identified from telemetry",
            ops.voyage_count, ops.dwell_count
        ),
        format!(
            "Estimated CO2 emissions of {:.2} tons over the recorded period",
            env.total_co2_emissions_tons
        ),
    ];

    if env.auxiliary_percentage > AUX_SHARE_THRESHOLD {
        findings.push(format!(
            "Auxiliary systems account for {:.1}% of fuel use, a candidate for electrification",
            env.auxiliary_percentage
        ));
    }
    let burned_fuel = analytics.is_some_and(|a| a.voyage_totals.total_fuel_gallons > 0.0);
    if burned_fuel && ops.average_fuel_efficiency_nmpg < LOW_EFFICIENCY_NMPG {
        findings.push(format!(
            "Average efficiency of {:.2} nm/gal is below {:.0} nm/gal",
            ops.average_fuel_efficiency_nmpg, LOW_EFFICIENCY_NMPG
        ));
    }
    findings
}

fn recommendations(profile: &VesselProfile, env: &EnvironmentalImpact) -> Vec<String> {
    let mut recs: Vec<String> = [
        "Confirm vessel attributes reported as not specified",
        "Collect additional telemetry to refine voyage patterns",
        "Inspect hull coating condition to limit frictional resistance",
        "Schedule periodic maintenance to preserve baseline efficiency",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if env.auxiliary_percentage > AUX_SHARE_THRESHOLD {
        recs.push("Evaluate shore power or battery storage to reduce auxiliary fuel use".to_string());
    }
    if profile.operational_profile.commercial_operation == Spec::Specified(true) {
        recs.push("Review emissions reporting obligations for commercial operation".to_string());
    }
    recs
}

fn curve_chart(name: &str, title: &str, curve: &Curve) -> ChartSpec {
    let points = curve.points.iter().map(|p| DataPoint::xy(p.x, p.y)).collect();
    ChartSpec::new(name, title, ChartKind::Line)
        .axes(curve.x_label.clone(), curve.y_label.clone())
        .series(Series::new(curve.y_label.clone(), points))
}

/// Describe every chart the available data supports
fn chart_specs(curves: Option<&PerformanceCurves>, analytics: Option<&VoyageAnalytics>) -> Vec<ChartSpec> {
    let mut specs = Vec::new();

    if let Some(c) = curves.map(|c| &c.performance_curves) {
        specs.push(curve_chart("speed_vs_fuel", "Speed vs Fuel Rate", &c.speed_vs_fuel_rate));
        specs.push(curve_chart("speed_vs_power", "Speed vs Shaft Power", &c.speed_vs_shaft_power));
        specs.push(curve_chart("speed_vs_thrust", "Speed vs Thrust", &c.speed_vs_thrust));
        specs.push(curve_chart(
            "acceleration_vs_power",
            "Acceleration vs Power",
            &c.acceleration_vs_power,
        ));
    }

    let Some(analytics) = analytics else {
        return specs;
    };

    if !analytics.voyages.is_empty() {
        let fuel = analytics
            .voyages
            .iter()
            .map(|v| DataPoint::labeled(format!("Voyage {}", v.voyage_id), v.fuel_consumed_gallons))
            .collect();
        specs.push(
            ChartSpec::new("fuel_by_voyage", "Fuel Consumption by Voyage", ChartKind::Bar)
                .axes("Voyage", "Fuel (gal)")
                .series(Series::new("Fuel", fuel)),
        );

        let efficiency = analytics
            .voyages
            .iter()
            .map(|v| DataPoint::xy(v.voyage_id as f64, v.fuel_efficiency_nmpg))
            .collect();
        specs.push(
            ChartSpec::new("efficiency_by_voyage", "Fuel Efficiency by Voyage", ChartKind::Line)
                .axes("Voyage", "Efficiency (nm/gal)")
                .series(Series::new("Efficiency", efficiency)),
        );
    }

    let e = &analytics.emissions_summary;
    if e.total_fuel_consumption_gallons > 0.0 {
        let slices = [
            ("Operational", e.operational_fuel_gallons),
            ("Auxiliary", e.auxiliary_fuel_gallons),
        ]
        .into_iter()
        .filter(|(_, gallons)| *gallons > 0.0)
        .map(|(label, gallons)| DataPoint::labeled(label, gallons))
        .collect();
        specs.push(
            ChartSpec::new("emissions_breakdown", "Fuel Use by Operating Mode", ChartKind::Pie)
                .series(Series::new("Fuel", slices)),
        );
    }
    specs
}

/// Compiles the final baseline report and its charts
#[derive(Debug, Default)]
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for ReportGenerator {
    fn name(&self) -> &'static str {
        REPORT_GENERATOR
    }

    fn description(&self) -> &'static str {
        "Compile the baseline report and render charts"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[PROFILE_BUILDER]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let profile = ctx.require_profile()?;
        let curves = ctx.curves();
        let telemetry = ctx.telemetry();
        let analytics = ctx.analytics();

        let mut charts = Vec::new();
        for spec in chart_specs(curves, analytics) {
            charts.push(ctx.render_chart(&spec).await?);
        }

        let deliverables = Deliverables {
            baseline_profile_complete: true,
            performance_curves_generated: curves.is_some(),
            telemetry_processed: telemetry.is_some(),
            voyage_analytics_complete: analytics.is_some(),
            emissions_calculated: analytics.is_some(),
            charts_rendered: !charts.is_empty(),
            json_compatible: true,
        };
        let baseline_status = if deliverables.is_complete() {
            "Complete - Ready for validation and optimization".to_string()
        } else {
            format!("Partial - missing {}", deliverables.missing().join(", "))
        };

        let phys = &profile.physical_specifications;
        let id = &profile.vessel_identity;
        let summary = ExecutiveSummary {
            vessel_name: profile.display_name().unwrap_or_else(|| UNNAMED_VESSEL.to_string()),
            vessel_type: phys.boat_type.display(),
            builder_make: id.builder_make.display(),
            class_model: id.class_model.display(),
            length: phys.length_ft.display_with_unit("ft"),
            beam: phys.beam_ft.display_with_unit("ft"),
            fuel_type: phys
                .fuel_type
                .clone()
                .or(curves.map_or(Spec::NotSpecified, |c| Spec::Specified(c.hull_parameters.fuel_type)))
                .display(),
            operational_summary: operational_summary(telemetry, analytics),
            environmental_impact: environmental_impact(analytics),
            baseline_status,
        };

        let key_findings = key_findings(&summary, curves, analytics);
        let recommendations = recommendations(profile, &summary.environmental_impact);

        tracing::info!(
            session_id = %ctx.session_id,
            charts = charts.len(),
            status = %summary.baseline_status,
            "Baseline report compiled"
        );

        Ok(StageOutput::ReportGenerator(BaselineReport {
            report_title: REPORT_TITLE.to_string(),
            session_id: ctx.session_id.to_string(),
            generated_at: Utc::now(),
            executive_summary: summary,
            vessel_profile: profile.clone(),
            key_findings,
            recommendations,
            next_steps: NEXT_STEPS.iter().map(|s| s.to_string()).collect(),
            deliverables,
            charts,
        }))
    }
}

//! Stage 5: fuel burn and emissions per voyage and dwell

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalyticsConfig;
use crate::render::Table;
use crate::vessel::FuelType;
use crate::workflow::{Stage, StageContext, StageError, StageOutput};

use super::{
    PERFORMANCE_CURVES, PerformanceCurves, TELEMETRY_PROCESSOR, TelemetryAnalysis,
    VOYAGE_ANALYTICS,
};

const LBS_PER_SHORT_TON: f64 = 2000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoyageFuel {
    pub voyage_id: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: f64,
    pub distance_nm: f64,
    pub avg_speed_knots: f64,
    pub fuel_rate_gph: f64,
    pub fuel_consumed_gallons: f64,
    pub co2_emissions_lbs: f64,
    /// Nautical miles per gallon; zero when no fuel was burned
    pub fuel_efficiency_nmpg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellFuel {
    pub dwell_id: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: f64,
    /// Observed mean fuel flow, or the configured idle rate
    pub fuel_rate_gph: f64,
    pub aux_fuel_gallons: f64,
    pub co2_emissions_lbs: f64,
    /// Dwell burn plus buffer, capped at tank capacity
    pub estimated_refuel_gallons: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoyageTotals {
    pub voyage_count: usize,
    pub total_fuel_gallons: f64,
    pub total_distance_nm: f64,
    pub total_operating_hours: f64,
    pub total_co2_lbs: f64,
    pub average_fuel_efficiency_nmpg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DwellTotals {
    pub dwell_count: usize,
    pub total_dwell_hours: f64,
    pub total_aux_fuel_gallons: f64,
    pub total_refuel_gallons: f64,
    pub total_co2_lbs: f64,
}

/// Operational (underway) versus auxiliary (dwell) split
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionsSummary {
    pub total_fuel_consumption_gallons: f64,
    pub total_co2_emissions_lbs: f64,
    pub total_co2_emissions_tons: f64,
    pub operational_fuel_gallons: f64,
    pub auxiliary_fuel_gallons: f64,
    pub operational_percentage: f64,
    pub auxiliary_percentage: f64,
}

/// Output of the voyage analytics engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoyageAnalytics {
    pub fuel_type: FuelType,
    pub emission_factor_lbs_per_gallon: f64,
    pub estimated_tank_capacity_gallons: f64,
    pub voyages: Vec<VoyageFuel>,
    pub dwells: Vec<DwellFuel>,
    pub voyage_totals: VoyageTotals,
    pub dwell_totals: DwellTotals,
    pub emissions_summary: EmissionsSummary,
    pub voyage_csv: String,
    pub dwell_csv: String,
}

impl VoyageAnalytics {
    pub fn voyage_table(&self) -> Table {
        let mut table = Table::new([
            "voyage_id",
            "start_time",
            "end_time",
            "duration_hours",
            "distance_nm",
            "avg_speed_knots",
            "fuel_rate_gph",
            "fuel_gallons",
            "co2_lbs",
            "efficiency_nmpg",
        ]);
        for v in &self.voyages {
            table.push_row(vec![
                v.voyage_id.to_string(),
                v.start_time.to_rfc3339(),
                v.end_time.to_rfc3339(),
                format!("{:.2}", v.duration_hours),
                format!("{:.2}", v.distance_nm),
                format!("{:.2}", v.avg_speed_knots),
                format!("{:.2}", v.fuel_rate_gph),
                format!("{:.2}", v.fuel_consumed_gallons),
                format!("{:.2}", v.co2_emissions_lbs),
                format!("{:.2}", v.fuel_efficiency_nmpg),
            ]);
        }
        table
    }

    pub fn dwell_table(&self) -> Table {
        let mut table = Table::new([
            "dwell_id",
            "start_time",
            "end_time",
            "duration_hours",
            "fuel_rate_gph",
            "aux_fuel_gallons",
            "co2_lbs",
            "estimated_refuel_gallons",
        ]);
        for d in &self.dwells {
            table.push_row(vec![
                d.dwell_id.to_string(),
                d.start_time.to_rfc3339(),
                d.end_time.to_rfc3339(),
                format!("{:.2}", d.duration_hours),
                format!("{:.2}", d.fuel_rate_gph),
                format!("{:.2}", d.aux_fuel_gallons),
                format!("{:.2}", d.co2_emissions_lbs),
                format!("{:.2}", d.estimated_refuel_gallons),
            ]);
        }
        table
    }

    /// Every derived number, labelled, for validation
    fn numbers(&self) -> Vec<(String, f64)> {
        let mut out = vec![
            ("emission_factor".to_string(), self.emission_factor_lbs_per_gallon),
            ("tank_capacity".to_string(), self.estimated_tank_capacity_gallons),
        ];
        for v in &self.voyages {
            let id = v.voyage_id;
            out.extend([
                (format!("voyage {} duration", id), v.duration_hours),
                (format!("voyage {} distance", id), v.distance_nm),
                (format!("voyage {} fuel rate", id), v.fuel_rate_gph),
                (format!("voyage {} fuel", id), v.fuel_consumed_gallons),
                (format!("voyage {} co2", id), v.co2_emissions_lbs),
                (format!("voyage {} efficiency", id), v.fuel_efficiency_nmpg),
            ]);
        }
        for d in &self.dwells {
            let id = d.dwell_id;
            out.extend([
                (format!("dwell {} duration", id), d.duration_hours),
                (format!("dwell {} fuel rate", id), d.fuel_rate_gph),
                (format!("dwell {} fuel", id), d.aux_fuel_gallons),
                (format!("dwell {} refuel", id), d.estimated_refuel_gallons),
            ]);
        }
        let e = &self.emissions_summary;
        out.extend([
            ("total fuel".to_string(), e.total_fuel_consumption_gallons),
            ("total co2".to_string(), e.total_co2_emissions_lbs),
            ("operational percentage".to_string(), e.operational_percentage),
            ("auxiliary percentage".to_string(), e.auxiliary_percentage),
        ]);
        out
    }
}

/// Derive fuel and emissions from curves and segmented telemetry
///
/// # Errors
///
/// Returns [`StageError::ComputeInvalid`] if any derived value is negative
/// or not finite.
pub fn compute(
    curves: &PerformanceCurves,
    telemetry: &TelemetryAnalysis,
    length_ft: f64,
    config: &AnalyticsConfig,
) -> Result<VoyageAnalytics, StageError> {
    let fuel_type = curves.hull_parameters.fuel_type;
    let factor = config.emission_factors.for_fuel(fuel_type);
    let tank = length_ft * config.tank_gallons_per_foot;

    let voyages: Vec<VoyageFuel> = telemetry
        .voyages
        .iter()
        .map(|v| {
            let rate = curves.fuel_rate_at(v.avg_speed_knots);
            let fuel = rate * v.duration_hours;
            VoyageFuel {
                voyage_id: v.id,
                start_time: v.start_time,
                end_time: v.end_time,
                duration_hours: v.duration_hours,
                distance_nm: v.distance_nm,
                avg_speed_knots: v.avg_speed_knots,
                fuel_rate_gph: rate,
                fuel_consumed_gallons: fuel,
                co2_emissions_lbs: fuel * factor,
                fuel_efficiency_nmpg: if fuel > 0.0 { v.distance_nm / fuel } else { 0.0 },
            }
        })
        .collect();

    let dwells: Vec<DwellFuel> = telemetry
        .dwells
        .iter()
        .map(|d| {
            let rate = d.avg_fuel_flow_gph.unwrap_or(config.idle_aux_fuel_gph);
            let fuel = rate * d.duration_hours;
            DwellFuel {
                dwell_id: d.id,
                start_time: d.start_time,
                end_time: d.end_time,
                duration_hours: d.duration_hours,
                fuel_rate_gph: rate,
                aux_fuel_gallons: fuel,
                co2_emissions_lbs: fuel * factor,
                estimated_refuel_gallons: (fuel * config.refuel_buffer).min(tank),
            }
        })
        .collect();

    let total_fuel: f64 = voyages.iter().map(|v| v.fuel_consumed_gallons).sum();
    let total_distance: f64 = voyages.iter().map(|v| v.distance_nm).sum();
    let voyage_totals = VoyageTotals {
        voyage_count: voyages.len(),
        total_fuel_gallons: total_fuel,
        total_distance_nm: total_distance,
        total_operating_hours: voyages.iter().map(|v| v.duration_hours).sum(),
        total_co2_lbs: voyages.iter().map(|v| v.co2_emissions_lbs).sum(),
        average_fuel_efficiency_nmpg: if total_fuel > 0.0 {
            total_distance / total_fuel
        } else {
            0.0
        },
    };

    let dwell_totals = DwellTotals {
        dwell_count: dwells.len(),
        total_dwell_hours: dwells.iter().map(|d| d.duration_hours).sum(),
        total_aux_fuel_gallons: dwells.iter().map(|d| d.aux_fuel_gallons).sum(),
        total_refuel_gallons: dwells.iter().map(|d| d.estimated_refuel_gallons).sum(),
        total_co2_lbs: dwells.iter().map(|d| d.co2_emissions_lbs).sum(),
    };

    let operational = voyage_totals.total_fuel_gallons;
    let auxiliary = dwell_totals.total_aux_fuel_gallons;
    let combined = operational + auxiliary;
    let co2 = voyage_totals.total_co2_lbs + dwell_totals.total_co2_lbs;
    let (operational_percentage, auxiliary_percentage) = if combined > 0.0 {
        (operational / combined * 100.0, auxiliary / combined * 100.0)
    } else {
        (0.0, 0.0)
    };

    let analytics = VoyageAnalytics {
        fuel_type,
        emission_factor_lbs_per_gallon: factor,
        estimated_tank_capacity_gallons: tank,
        voyages,
        dwells,
        voyage_totals,
        dwell_totals,
        emissions_summary: EmissionsSummary {
            total_fuel_consumption_gallons: combined,
            total_co2_emissions_lbs: co2,
            total_co2_emissions_tons: co2 / LBS_PER_SHORT_TON,
            operational_fuel_gallons: operational,
            auxiliary_fuel_gallons: auxiliary,
            operational_percentage,
            auxiliary_percentage,
        },
        voyage_csv: String::new(),
        dwell_csv: String::new(),
    };

    if let Some((name, value)) = analytics
        .numbers()
        .into_iter()
        .find(|(_, v)| !v.is_finite() || *v < 0.0)
    {
        return Err(StageError::ComputeInvalid(format!("{} is {}", name, value)));
    }
    Ok(analytics)
}

/// Computes fuel use and emissions from curves and telemetry
#[derive(Debug, Default)]
pub struct VoyageAnalyticsEngine;

impl VoyageAnalyticsEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for VoyageAnalyticsEngine {
    fn name(&self) -> &'static str {
        VOYAGE_ANALYTICS
    }

    fn description(&self) -> &'static str {
        "Estimate fuel consumption and emissions per voyage"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[PERFORMANCE_CURVES, TELEMETRY_PROCESSOR]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let curves = ctx.require_curves()?;
        let telemetry = ctx.require_telemetry()?;
        let length_ft = ctx
            .profile()
            .and_then(|p| p.physical_specifications.length_ft.value().copied())
            .unwrap_or(curves.hull_parameters.length_ft);

        let mut analytics = compute(curves, telemetry, length_ft, &ctx.config().analytics)?;
        analytics.voyage_csv = ctx.export_csv(&analytics.voyage_table())?;
        analytics.dwell_csv = ctx.export_csv(&analytics.dwell_table())?;

        tracing::debug!(
            session_id = %ctx.session_id,
            fuel_gallons = analytics.emissions_summary.total_fuel_consumption_gallons,
            co2_lbs = analytics.emissions_summary.total_co2_emissions_lbs,
            "Voyage analytics computed"
        );
        Ok(StageOutput::VoyageAnalytics(analytics))
    }
}

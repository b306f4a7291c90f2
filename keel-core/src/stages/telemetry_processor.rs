//! Stage 4: segment telemetry into voyages and dwell periods

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TelemetryConfig;
use crate::telemetry::TelemetryRecord;
use crate::workflow::{Stage, StageContext, StageError, StageOutput};

use super::TELEMETRY_PROCESSOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub total_data_points: usize,
    pub voyage_count: usize,
    pub dwell_count: usize,
    pub date_range: Option<DateRange>,
}

/// Statistics for one contiguous run of underway or stationary records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub id: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: f64,
    pub data_points: usize,
    pub distance_nm: f64,
    pub avg_speed_knots: f64,
    pub max_speed_knots: f64,
    /// Mean of the records that carried a fuel flow reading
    pub avg_fuel_flow_gph: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatistics {
    pub total_operating_hours: f64,
    pub total_dwell_hours: f64,
    pub total_distance_nm: f64,
    pub avg_voyage_duration_hours: f64,
    pub avg_voyage_distance_nm: f64,
    pub avg_speed_knots: f64,
    pub avg_dwell_duration_hours: f64,
}

/// Output of the telemetry processor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryAnalysis {
    pub telemetry_summary: TelemetrySummary,
    pub voyages: Vec<SegmentStats>,
    pub dwells: Vec<SegmentStats>,
    pub statistics: AggregateStatistics,
}

impl SegmentStats {
    fn from_run(id: usize, run: &[&TelemetryRecord]) -> Option<Self> {
        let first = run.first()?;
        let last = run.last()?;
        let n = run.len() as f64;

        let duration_hours = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 3_600_000.0;
        let distance_nm = run.windows(2).map(|w| w[0].distance_nm(w[1])).sum();
        let avg_speed_knots = run.iter().map(|r| r.speed_over_ground).sum::<f64>() / n;
        let max_speed_knots = run
            .iter()
            .map(|r| r.speed_over_ground)
            .fold(0.0_f64, f64::max);

        let flows: Vec<f64> = run.iter().filter_map(|r| r.fuel_flow_gph).collect();
        let avg_fuel_flow_gph =
            (!flows.is_empty()).then(|| flows.iter().sum::<f64>() / flows.len() as f64);

        Some(Self {
            id,
            start_time: first.timestamp,
            end_time: last.timestamp,
            duration_hours,
            data_points: run.len(),
            distance_nm,
            avg_speed_knots,
            max_speed_knots,
            avg_fuel_flow_gph,
        })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Sort, classify and segment telemetry.
///
/// # Errors
///
/// Returns [`StageError::InputInvalid`] naming the first record with a
/// non-finite or out-of-range value.
pub fn analyze(records: &[TelemetryRecord], config: &TelemetryConfig) -> Result<TelemetryAnalysis, StageError> {
    if let Some((idx, field)) = records
        .iter()
        .enumerate()
        .find_map(|(idx, r)| r.invalid_field().map(|f| (idx, f)))
    {
        return Err(StageError::InputInvalid(format!(
            "telemetry record {} has invalid {}",
            idx, field
        )));
    }

    let mut sorted: Vec<&TelemetryRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    let min_duration = chrono::Duration::from_std(config.min_segment_duration)
        .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
    let underway = |r: &TelemetryRecord| r.speed_over_ground >= config.underway_speed_knots;

    let mut voyages = Vec::new();
    let mut dwells = Vec::new();
    for run in sorted.chunk_by(|a, b| underway(*a) == underway(*b)) {
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            continue;
        };
        if run.len() < config.min_segment_points || last.timestamp - first.timestamp < min_duration {
            continue;
        }

        let target = if underway(*first) { &mut voyages } else { &mut dwells };
        if let Some(stats) = SegmentStats::from_run(target.len() + 1, run) {
            target.push(stats);
        }
    }

    let statistics = AggregateStatistics {
        total_operating_hours: voyages.iter().map(|v| v.duration_hours).sum(),
        total_dwell_hours: dwells.iter().map(|d| d.duration_hours).sum(),
        total_distance_nm: voyages.iter().map(|v| v.distance_nm).sum(),
        avg_voyage_duration_hours: mean(voyages.iter().map(|v| v.duration_hours)),
        avg_voyage_distance_nm: mean(voyages.iter().map(|v| v.distance_nm)),
        avg_speed_knots: mean(voyages.iter().map(|v| v.avg_speed_knots)),
        avg_dwell_duration_hours: mean(dwells.iter().map(|d| d.duration_hours)),
    };

    let date_range = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => Some(DateRange {
            start: first.timestamp,
            end: last.timestamp,
        }),
        _ => None,
    };

    Ok(TelemetryAnalysis {
        telemetry_summary: TelemetrySummary {
            total_data_points: records.len(),
            voyage_count: voyages.len(),
            dwell_count: dwells.len(),
            date_range,
        },
        voyages,
        dwells,
        statistics,
    })
}

/// Splits the session's telemetry into voyages and dwell periods
#[derive(Debug, Default)]
pub struct TelemetryProcessor;

impl TelemetryProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for TelemetryProcessor {
    fn name(&self) -> &'static str {
        TELEMETRY_PROCESSOR
    }

    fn description(&self) -> &'static str {
        "Segment telemetry into voyages and dwell periods"
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let analysis = analyze(&ctx.input.telemetry, &ctx.config().telemetry)?;

        tracing::debug!(
            session_id = %ctx.session_id,
            points = analysis.telemetry_summary.total_data_points,
            voyages = analysis.telemetry_summary.voyage_count,
            dwells = analysis.telemetry_summary.dwell_count,
            "Telemetry segmented"
        );
        Ok(StageOutput::TelemetryProcessor(analysis))
    }
}

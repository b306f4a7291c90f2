//! Stage 3: estimated performance curves
//!
//! The model supplies naval-architecture parameters the owner rarely knows
//! (block coefficient, propulsive efficiency, top speed). Resistance is then
//! estimated semi-empirically:
//!
//! - friction from the ITTC-57 correlation line, `Cf = 0.075 / (log10 Rn - 2)^2`,
//!   scaled by the hull's form factor `1 + k`
//! - a residuary term growing with Froude number, `Rr = W * cr * exp(-0.4 / Fn^2)`,
//!   which rises through hull speed and levels off once planing
//!
//! Shaft power, required thrust and fuel burn follow from total resistance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::CurveConfig;
use crate::llm::LLMRequest;
use crate::parsing::number_field;
use crate::render::Table;
use crate::vessel::{FuelType, HullType};
use crate::workflow::{Stage, StageContext, StageError, StageOutput};

use super::{PERFORMANCE_CURVES, PROFILE_BUILDER, VesselProfile};

const RHO_SEAWATER: f64 = 1025.0;
/// Kinematic viscosity of seawater at 15 °C, m²/s
const NU_SEAWATER: f64 = 1.19e-6;
const GRAVITY: f64 = 9.81;
const MS_PER_KNOT: f64 = 0.514_444;
const M_PER_FT: f64 = 0.3048;
const KG_PER_LB: f64 = 0.453_592;
const N_PER_LBF: f64 = 4.448_22;
const W_PER_HP: f64 = 745.7;
const WATERLINE_RATIO: f64 = 0.9;
const THRUST_DEDUCTION: f64 = 0.1;
const ADDED_MASS: f64 = 1.1;
/// Cruise speed as a fraction of top speed for the acceleration curve
const CRUISE_FRACTION: f64 = 0.6;
/// ft/s²
const ACCELERATIONS: &[f64] = &[0.5, 1.0, 1.5, 2.0, 2.5, 3.0];

const LENGTH_RANGE: (f64, f64) = (8.0, 300.0);
const BEAM_RANGE: (f64, f64) = (3.0, 80.0);
const DISPLACEMENT_RANGE: (f64, f64) = (300.0, 2_000_000.0);
const BLOCK_COEFFICIENT_RANGE: (f64, f64) = (0.30, 0.85);
const PROPULSIVE_EFFICIENCY_RANGE: (f64, f64) = (0.30, 0.75);
const MAX_SPEED_CEILING: f64 = 60.0;
const DEFAULT_LENGTH_FT: f64 = 25.0;
const DEFAULT_PROPULSIVE_EFFICIENCY: f64 = 0.55;

const SYSTEM_PROMPT: &str = "You are a naval architect estimating hull parameters for small craft. \
Answer with a single JSON object of numbers and nothing else.";

const VALIDATION_NOTES: &[&str] = &[
    "Resistance estimated with a Holtrop-Mennen style semi-empirical method \
     (ITTC-57 friction, form factor, Froude-scaled residuary resistance); \
     values are estimates, not measurements",
    "These curves are AI-generated estimates based on vessel specifications",
    "Validation by naval architects is recommended for precise applications",
    "Curves will be updated upon validation completion",
];

/// Where a hull parameter came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    Profile,
    Model,
    Default,
}

/// Inputs to the resistance estimate, after clamping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HullParameters {
    pub length_ft: f64,
    pub beam_ft: f64,
    pub displacement_lbs: f64,
    pub block_coefficient: f64,
    pub propulsive_efficiency: f64,
    pub max_speed_knots: f64,
    pub hull_type: HullType,
    pub fuel_type: FuelType,
    pub sources: BTreeMap<String, ParameterSource>,
}

impl HullParameters {
    /// Merge profile values, model estimates and defaults, in that order of
    /// preference, clamping everything to physical ranges.
    fn resolve(
        profile: &VesselProfile,
        estimates: &Map<String, Value>,
        curves: &CurveConfig,
        default_fuel: FuelType,
    ) -> Self {
        let phys = &profile.physical_specifications;
        let hull_type = phys.boat_type.value().cloned().unwrap_or(HullType::VBottom);
        let fuel_type = phys.fuel_type.value().copied().unwrap_or(default_fuel);
        let mut sources = BTreeMap::new();

        let mut pick = |name: &str, known: Option<f64>, default: f64, range: (f64, f64)| {
            let (value, source) = match (known, number_field(estimates, name)) {
                (Some(v), _) => (v, ParameterSource::Profile),
                (None, Some(v)) => (v, ParameterSource::Model),
                (None, None) => (default, ParameterSource::Default),
            };
            sources.insert(name.to_string(), source);
            value.clamp(range.0, range.1)
        };

        let length_ft = pick(
            "length_ft",
            phys.length_ft.value().copied(),
            DEFAULT_LENGTH_FT,
            LENGTH_RANGE,
        );
        let beam_ft = pick(
            "beam_ft",
            phys.beam_ft.value().copied(),
            length_ft / 3.0,
            BEAM_RANGE,
        );
        let block_coefficient = pick(
            "block_coefficient",
            None,
            default_block_coefficient(&hull_type),
            BLOCK_COEFFICIENT_RANGE,
        );
        let displacement_lbs = pick(
            "displacement_lbs",
            phys.weight_lbs.value().copied(),
            estimated_displacement_lbs(length_ft, beam_ft, block_coefficient),
            DISPLACEMENT_RANGE,
        );
        let propulsive_efficiency = pick(
            "propulsive_efficiency",
            None,
            DEFAULT_PROPULSIVE_EFFICIENCY,
            PROPULSIVE_EFFICIENCY_RANGE,
        );
        let speed_floor = curves.min_speed_knots + 1.0;
        let max_speed_knots = pick(
            "max_speed_knots",
            None,
            default_max_speed(&hull_type, length_ft, curves),
            (speed_floor, MAX_SPEED_CEILING.max(speed_floor)),
        );

        Self {
            length_ft,
            beam_ft,
            displacement_lbs,
            block_coefficient,
            propulsive_efficiency,
            max_speed_knots,
            hull_type,
            fuel_type,
            sources,
        }
    }
}

fn default_block_coefficient(hull: &HullType) -> f64 {
    match hull {
        HullType::Displacement => 0.55,
        HullType::SemiDisplacement => 0.50,
        HullType::FlatBottom | HullType::Pontoon => 0.60,
        HullType::MultiHull | HullType::Rhib => 0.40,
        HullType::VBottom | HullType::Other(_) => 0.42,
    }
}

/// Seawater weighs about 64 lb/ft³; draft guessed at a sixth of the beam
fn estimated_displacement_lbs(length_ft: f64, beam_ft: f64, cb: f64) -> f64 {
    64.0 * length_ft * WATERLINE_RATIO * beam_ft * (beam_ft / 6.0) * cb
}

fn default_max_speed(hull: &HullType, length_ft: f64, curves: &CurveConfig) -> f64 {
    match hull {
        HullType::Displacement => 1.34 * (length_ft * WATERLINE_RATIO).sqrt(),
        _ => curves.default_max_speed_knots,
    }
}

/// Total calm-water resistance as a function of speed
struct ResistanceModel {
    lwl_m: f64,
    wetted_area_m2: f64,
    mass_kg: f64,
    form_factor: f64,
    residuary_coefficient: f64,
    propulsive_efficiency: f64,
}

impl ResistanceModel {
    fn new(p: &HullParameters) -> Self {
        let lwl_m = p.length_ft * M_PER_FT * WATERLINE_RATIO;
        let beam_m = p.beam_ft * M_PER_FT;
        let mass_kg = p.displacement_lbs * KG_PER_LB;
        let volume_m3 = mass_kg / RHO_SEAWATER;
        let draft_m = (volume_m3 / (p.block_coefficient * lwl_m * beam_m)).clamp(0.1, 0.5 * beam_m.max(0.2));
        // Mumford's approximation
        let wetted_area_m2 = 1.7 * lwl_m * draft_m + volume_m3 / draft_m;

        Self {
            lwl_m,
            wetted_area_m2,
            mass_kg,
            form_factor: p.hull_type.form_factor(),
            residuary_coefficient: 0.15 * p.block_coefficient.sqrt() * p.hull_type.fuel_factor(),
            propulsive_efficiency: p.propulsive_efficiency,
        }
    }

    /// Newtons
    fn resistance(&self, speed_knots: f64) -> f64 {
        let v = speed_knots * MS_PER_KNOT;
        if v <= 0.0 {
            return 0.0;
        }

        let reynolds = v * self.lwl_m / NU_SEAWATER;
        let cf = 0.075 / (reynolds.log10() - 2.0).powi(2);
        let friction = 0.5 * RHO_SEAWATER * v * v * self.wetted_area_m2 * cf * self.form_factor;

        let froude = v / (GRAVITY * self.lwl_m).sqrt();
        let residuary = self.mass_kg * GRAVITY * self.residuary_coefficient * (-0.4 / (froude * froude)).exp();

        friction + residuary
    }

    fn shaft_power_hp(&self, speed_knots: f64) -> f64 {
        self.resistance(speed_knots) * speed_knots * MS_PER_KNOT / self.propulsive_efficiency / W_PER_HP
    }

    fn thrust_lbf(&self, speed_knots: f64) -> f64 {
        self.resistance(speed_knots) / (1.0 - THRUST_DEDUCTION) / N_PER_LBF
    }

    /// Power to accelerate at `accel_ft_s2` while passing through `speed_knots`
    fn acceleration_power_hp(&self, speed_knots: f64, accel_ft_s2: f64) -> f64 {
        let force = ADDED_MASS * self.mass_kg * accel_ft_s2 * M_PER_FT + self.resistance(speed_knots);
        force * speed_knots * MS_PER_KNOT / self.propulsive_efficiency / W_PER_HP
    }
}

/// Gallons per hour to deliver `shaft_hp`; electric boats burn none
fn fuel_rate_gph(shaft_hp: f64, fuel: FuelType) -> f64 {
    let hp_hours = fuel.hp_hours_per_gallon();
    if hp_hours > 0.0 { shaft_hp / hp_hours } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

/// One sampled curve; x strictly increasing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub curve_type: String,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<CurvePoint>,
}

impl Curve {
    fn sample(
        curve_type: &str,
        x_label: &str,
        y_label: &str,
        xs: &[f64],
        f: impl Fn(f64) -> f64,
    ) -> Self {
        Self {
            curve_type: curve_type.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            points: xs
                .iter()
                .map(|&x| CurvePoint {
                    x,
                    y: (f(x) * 1000.0).round() / 1000.0,
                })
                .collect(),
        }
    }

    /// Linear interpolation, clamped to the end points
    pub fn interpolate(&self, x: f64) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if x <= first.x {
            return Some(first.y);
        }
        if x >= last.x {
            return Some(last.y);
        }

        self.points.windows(2).find_map(|w| {
            let (a, b) = (w[0], w[1]);
            (x >= a.x && x <= b.x).then(|| a.y + (b.y - a.y) * (x - a.x) / (b.x - a.x))
        })
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.points.windows(2).all(|w| w[1].x > w[0].x)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveSet {
    pub speed_vs_fuel_rate: Curve,
    pub speed_vs_shaft_power: Curve,
    pub speed_vs_thrust: Curve,
    pub acceleration_vs_power: Curve,
}

impl CurveSet {
    pub fn iter(&self) -> impl Iterator<Item = &Curve> {
        [
            &self.speed_vs_fuel_rate,
            &self.speed_vs_shaft_power,
            &self.speed_vs_thrust,
            &self.acceleration_vs_power,
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveMetadata {
    pub generation_method: String,
    pub validation_status: String,
    pub confidence_level: String,
    pub generated_at: DateTime<Utc>,
}

/// Output of the performance curve generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCurves {
    pub performance_curves: CurveSet,
    pub hull_parameters: HullParameters,
    pub curve_metadata: CurveMetadata,
    pub validation_notes: Vec<String>,
    pub download_available: bool,
}

impl PerformanceCurves {
    /// Fuel rate at a speed, clamped to the sampled range
    pub fn fuel_rate_at(&self, speed_knots: f64) -> f64 {
        self.performance_curves
            .speed_vs_fuel_rate
            .interpolate(speed_knots)
            .unwrap_or(0.0)
    }

    /// The speed curves side by side, one row per sampled speed
    pub fn table(&self) -> Table {
        let curves = &self.performance_curves;
        let mut table = Table::new(["speed_knots", "fuel_rate_gph", "shaft_power_hp", "thrust_lbf"]);
        let rows = curves
            .speed_vs_fuel_rate
            .points
            .iter()
            .zip(&curves.speed_vs_shaft_power.points)
            .zip(&curves.speed_vs_thrust.points);

        for ((fuel, power), thrust) in rows {
            table.push_row(vec![
                format!("{:.2}", fuel.x),
                format!("{:.3}", fuel.y),
                format!("{:.3}", power.y),
                format!("{:.3}", thrust.y),
            ]);
        }
        table
    }
}

/// Compute the curve set for resolved hull parameters
pub fn generate_curves(params: &HullParameters, config: &CurveConfig) -> CurveSet {
    let model = ResistanceModel::new(params);
    let n = config.sample_count.max(2);
    let (lo, hi) = (config.min_speed_knots, params.max_speed_knots);
    let speeds: Vec<f64> = (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
        .collect();
    let cruise = params.max_speed_knots * CRUISE_FRACTION;
    let fuel = params.fuel_type;

    CurveSet {
        speed_vs_fuel_rate: Curve::sample(
            "speed_vs_fuel_rate",
            "Speed (knots)",
            "Fuel Rate (gal/h)",
            &speeds,
            |v| fuel_rate_gph(model.shaft_power_hp(v), fuel),
        ),
        speed_vs_shaft_power: Curve::sample(
            "speed_vs_shaft_power",
            "Speed (knots)",
            "Shaft Power (hp)",
            &speeds,
            |v| model.shaft_power_hp(v),
        ),
        speed_vs_thrust: Curve::sample(
            "speed_vs_thrust",
            "Speed (knots)",
            "Thrust (lbf)",
            &speeds,
            |v| model.thrust_lbf(v),
        ),
        acceleration_vs_power: Curve::sample(
            "acceleration_vs_power",
            "Acceleration (ft/s²)",
            "Power (hp)",
            ACCELERATIONS,
            |a| model.acceleration_power_hp(cruise, a),
        ),
    }
}

fn estimation_prompt(profile: &VesselProfile) -> String {
    let phys = &profile.physical_specifications;
    let ops = &profile.operational_profile;
    format!(
        "Estimate hull parameters for this vessel.\n\n\
         Vessel: {name}\n\
         Hull type: {hull}\n\
         Length: {length}\n\
         Beam: {beam}\n\
         Weight: {weight}\n\
         Fuel: {fuel}\n\
         Commercial: {commercial}\n\n\
         Return a JSON object with numeric values for:\n\
         - \"block_coefficient\" (0.30-0.85)\n\
         - \"propulsive_efficiency\" (0.30-0.75)\n\
         - \"max_speed_knots\"\n\
         - \"length_ft\", \"beam_ft\", \"displacement_lbs\" (only if not given above)",
        name = profile.display_name().unwrap_or_else(|| "unknown".to_string()),
        hull = phys.boat_type.display(),
        length = phys.length_ft.display_with_unit("ft"),
        beam = phys.beam_ft.display_with_unit("ft"),
        weight = phys.weight_lbs.display_with_unit("lbs"),
        fuel = phys.fuel_type.display(),
        commercial = ops.commercial_operation.display(),
    )
}

/// Generates speed/power/fuel curves from the vessel profile
#[derive(Debug, Default)]
pub struct PerformanceCurveGenerator;

impl PerformanceCurveGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for PerformanceCurveGenerator {
    fn name(&self) -> &'static str {
        PERFORMANCE_CURVES
    }

    fn description(&self) -> &'static str {
        "Estimate hull parameters and generate performance curves"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[PROFILE_BUILDER]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let profile = ctx.require_profile()?;
        let config = ctx.config();

        let request = LLMRequest::with_system_prompt(SYSTEM_PROMPT, estimation_prompt(profile));
        let estimates = ctx.infer(request).await?;

        let params = HullParameters::resolve(
            profile,
            &estimates,
            &config.curves,
            config.analytics.default_fuel,
        );
        tracing::debug!(
            session_id = %ctx.session_id,
            cb = params.block_coefficient,
            efficiency = params.propulsive_efficiency,
            max_speed = params.max_speed_knots,
            "Hull parameters resolved"
        );

        let curves = generate_curves(&params, &config.curves);
        for curve in curves.iter() {
            if !curve.is_strictly_increasing() {
                return Err(StageError::ComputeInvalid(format!(
                    "{} samples are not increasing",
                    curve.curve_type
                )));
            }
            if curve.points.iter().any(|p| !p.y.is_finite() || p.y < 0.0) {
                return Err(StageError::ComputeInvalid(format!(
                    "{} contains invalid values",
                    curve.curve_type
                )));
            }
        }

        let mut output = PerformanceCurves {
            performance_curves: curves,
            hull_parameters: params,
            curve_metadata: CurveMetadata {
                generation_method: "holtrop_mennen_estimate".to_string(),
                validation_status: "unvalidated".to_string(),
                confidence_level: "preliminary".to_string(),
                generated_at: Utc::now(),
            },
            validation_notes: VALIDATION_NOTES.iter().map(|s| s.to_string()).collect(),
            download_available: false,
        };
        output.download_available = ctx.export_csv(&output.table()).is_ok();

        Ok(StageOutput::PerformanceCurves(output))
    }
}

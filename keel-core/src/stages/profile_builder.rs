//! Stage 2: normalize raw attributes into a structured vessel profile
//!
//! Free-text values such as `25' 6"`, `7.6 m`, `2,300 kg` or `yes` are
//! converted to feet, pounds and booleans. Normalization is idempotent:
//! [`VesselProfile::to_specifications`] followed by [`normalize`] yields the
//! same profile.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::vessel::{FuelType, HullType, NOT_SPECIFIED, Spec};
use crate::workflow::{Stage, StageContext, StageError, StageOutput, UsageAnswers};

use super::{BoatSpecifications, IMAGE_ANALYZER, PROFILE_BUILDER};

const FEET_PER_METRE: f64 = 1.0 / 0.3048;
const LBS_PER_KG: f64 = 2.204_62;

static LENGTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(\d+(?:\.\d+)?)\s*(feet|foot|ft|metres|meters|metre|meter|m\b|')?(?:\s*(\d+(?:\.\d+)?)\s*(?:inches|in\b|"|''))?"#,
    )
    .expect("valid length pattern")
});

static WEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(pounds|pound|lbs|lb|kilograms|kilogram|kgs|kg|tonnes|tonne|tons|ton|t\b)?")
        .expect("valid weight pattern")
});

/// Who the vessel is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VesselIdentity {
    pub builder_make: Spec<String>,
    pub class_model: Spec<String>,
    pub name: Spec<String>,
    pub mmsi: Spec<String>,
}

/// Dimensions and hull, in feet and pounds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSpecifications {
    pub length_ft: Spec<f64>,
    pub beam_ft: Spec<f64>,
    pub weight_lbs: Spec<f64>,
    pub boat_type: Spec<HullType>,
    pub hull_coating: Spec<String>,
    pub fuel_type: Spec<FuelType>,
}

/// How the vessel is used and equipped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalProfile {
    pub commercial_operation: Spec<bool>,
    pub auxiliary_systems: Spec<bool>,
    pub energy_producers: Spec<String>,
    pub energy_consumers: Spec<String>,
    pub vessel_age: Spec<String>,
    pub equipment_age: Spec<String>,
    pub equipment_condition: Spec<String>,
    pub primary_use: Spec<String>,
    pub daily_operating_hours: Spec<f64>,
    pub seasonal_months: Spec<f64>,
    pub typical_load_percentage: Spec<f64>,
    pub operating_conditions: Spec<String>,
}

/// One row of the flattened profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileAttribute {
    pub category: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Choice,
    Number,
}

/// A question the owner is asked about how the vessel is used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageQuestion {
    pub id: String,
    pub question: String,
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

const PRIMARY_USES: &[&str] = &[
    "Recreation",
    "Commercial Fishing",
    "Transportation",
    "Research",
    "Other",
];

const OPERATING_CONDITIONS: &[&str] = &[
    "Calm waters",
    "Moderate seas",
    "Rough conditions",
    "Variable",
];

/// The usage questionnaire shown after the profile is built
pub fn usage_questions() -> Vec<UsageQuestion> {
    let choice = |id: &str, question: &str, options: &[&str]| UsageQuestion {
        id: id.to_string(),
        question: question.to_string(),
        kind: QuestionKind::Choice,
        options: options.iter().map(|s| s.to_string()).collect(),
        min: None,
        max: None,
    };
    let number = |id: &str, question: &str, min: f64, max: f64| UsageQuestion {
        id: id.to_string(),
        question: question.to_string(),
        kind: QuestionKind::Number,
        options: Vec::new(),
        min: Some(min),
        max: Some(max),
    };

    vec![
        choice("primary_use", "What is the primary use of this vessel?", PRIMARY_USES),
        number("operating_hours", "How many hours per day is the vessel typically operated?", 0.0, 24.0),
        number("operating_season", "How many months per year is the vessel in service?", 1.0, 12.0),
        number("typical_load", "What is the typical load as a percentage of capacity?", 0.0, 100.0),
        choice(
            "operating_conditions",
            "What conditions does the vessel usually operate in?",
            OPERATING_CONDITIONS,
        ),
    ]
}

/// Output of the profile builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselProfile {
    pub vessel_identity: VesselIdentity,
    pub physical_specifications: PhysicalSpecifications,
    pub operational_profile: OperationalProfile,
    pub profile_attributes: Vec<ProfileAttribute>,
    pub usage_questions: Vec<UsageQuestion>,
}

impl VesselProfile {
    /// Display name, falling back to builder and model
    pub fn display_name(&self) -> Option<String> {
        let id = &self.vessel_identity;
        if let Some(name) = id.name.value() {
            return Some(name.clone());
        }
        match (id.builder_make.value(), id.class_model.value()) {
            (Some(make), Some(model)) => Some(format!("{} {}", make, model)),
            (Some(one), None) | (None, Some(one)) => Some(one.clone()),
            (None, None) => None,
        }
    }

    /// Write the profile back as raw attribute text
    pub fn to_specifications(&self) -> BoatSpecifications {
        let id = &self.vessel_identity;
        let phys = &self.physical_specifications;
        let ops = &self.operational_profile;
        let flag = |v: &Spec<bool>| v.map_ref(|b| (if *b { "YES" } else { "NO" }).to_string());

        BoatSpecifications {
            builder_make: id.builder_make.clone(),
            class_model: id.class_model.clone(),
            name: id.name.clone(),
            mmsi: id.mmsi.clone(),
            boat_type: phys.boat_type.clone().map(|h| h.to_string()),
            length: phys.length_ft.clone().map(|v| format!("{} ft", v)),
            beam: phys.beam_ft.clone().map(|v| format!("{} ft", v)),
            weight: phys.weight_lbs.clone().map(|v| format!("{} lbs", v)),
            hull_coating: phys.hull_coating.clone(),
            aux: flag(&ops.auxiliary_systems),
            commercial: flag(&ops.commercial_operation),
            fuel_type: phys.fuel_type.map_ref(|f| f.to_string()),
            energy_producers: ops.energy_producers.clone(),
            energy_consumers: ops.energy_consumers.clone(),
            vessel_age: ops.vessel_age.clone(),
            equipment_age: ops.equipment_age.clone(),
            equipment_condition: ops.equipment_condition.clone(),
        }
    }
}

/// Build a profile from raw attributes and optional usage answers
///
/// # Errors
///
/// Returns [`StageError::InputInvalid`] for usage answers outside the
/// questionnaire's ranges.
pub fn normalize(
    specs: &BoatSpecifications,
    usage: Option<&UsageAnswers>,
) -> Result<VesselProfile, StageError> {
    let vessel_identity = VesselIdentity {
        builder_make: clean_text(&specs.builder_make),
        class_model: clean_text(&specs.class_model),
        name: clean_text(&specs.name),
        mmsi: clean_text(&specs.mmsi),
    };

    let physical_specifications = PhysicalSpecifications {
        length_ft: and_then(&specs.length, parse_length_ft),
        beam_ft: and_then(&specs.beam, parse_length_ft),
        weight_lbs: and_then(&specs.weight, parse_weight_lbs),
        boat_type: clean_text(&specs.boat_type).map(|s| HullType::parse(&s)),
        hull_coating: clean_text(&specs.hull_coating),
        fuel_type: and_then(&specs.fuel_type, FuelType::parse),
    };

    let mut operational_profile = OperationalProfile {
        commercial_operation: and_then(&specs.commercial, parse_flag),
        auxiliary_systems: and_then(&specs.aux, parse_flag),
        energy_producers: clean_text(&specs.energy_producers),
        energy_consumers: clean_text(&specs.energy_consumers),
        vessel_age: clean_text(&specs.vessel_age),
        equipment_age: clean_text(&specs.equipment_age),
        equipment_condition: clean_text(&specs.equipment_condition),
        ..Default::default()
    };
    if let Some(answers) = usage {
        apply_usage(&mut operational_profile, answers)?;
    }

    let profile_attributes =
        flatten(&vessel_identity, &physical_specifications, &operational_profile);

    Ok(VesselProfile {
        vessel_identity,
        physical_specifications,
        operational_profile,
        profile_attributes,
        usage_questions: usage_questions(),
    })
}

fn apply_usage(ops: &mut OperationalProfile, answers: &UsageAnswers) -> Result<(), StageError> {
    let ranged = |name: &str, value: Option<f64>, min: f64, max: f64| -> Result<Spec<f64>, StageError> {
        match value {
            None => Ok(Spec::NotSpecified),
            Some(v) if v.is_finite() && (min..=max).contains(&v) => Ok(Spec::Specified(v)),
            Some(v) => Err(StageError::InputInvalid(format!(
                "{} must be between {} and {}, got {}",
                name, min, max, v
            ))),
        }
    };

    ops.primary_use = choice(answers.primary_use.as_deref(), PRIMARY_USES);
    ops.daily_operating_hours = ranged("operating_hours", answers.operating_hours, 0.0, 24.0)?;
    ops.seasonal_months = ranged("operating_season", answers.operating_season, 1.0, 12.0)?;
    ops.typical_load_percentage = ranged("typical_load", answers.typical_load, 0.0, 100.0)?;
    ops.operating_conditions = choice(answers.operating_conditions.as_deref(), OPERATING_CONDITIONS);
    Ok(())
}

/// Canonical option label when the answer matches one, cleaned text otherwise
fn choice(answer: Option<&str>, options: &[&str]) -> Spec<String> {
    let Some(text) = normalize_text(answer.unwrap_or_default()) else {
        return Spec::NotSpecified;
    };
    let canonical = options
        .iter()
        .find(|opt| opt.eq_ignore_ascii_case(&text))
        .map(|opt| opt.to_string());
    Spec::Specified(canonical.unwrap_or(text))
}

fn flatten(
    id: &VesselIdentity,
    phys: &PhysicalSpecifications,
    ops: &OperationalProfile,
) -> Vec<ProfileAttribute> {
    let attr = |category: &str, name: &str, value: String| ProfileAttribute {
        category: category.to_string(),
        name: name.to_string(),
        value,
    };
    let flag = |v: &Spec<bool>| v.map_ref(|b| if *b { "Yes" } else { "No" }).display();

    vec![
        attr("identity", "builder_make", id.builder_make.display()),
        attr("identity", "class_model", id.class_model.display()),
        attr("identity", "name", id.name.display()),
        attr("identity", "mmsi", id.mmsi.display()),
        attr("physical", "length", phys.length_ft.display_with_unit("ft")),
        attr("physical", "beam", phys.beam_ft.display_with_unit("ft")),
        attr("physical", "weight", phys.weight_lbs.display_with_unit("lbs")),
        attr("physical", "boat_type", phys.boat_type.display()),
        attr("physical", "hull_coating", phys.hull_coating.display()),
        attr("physical", "fuel_type", phys.fuel_type.display()),
        attr("operational", "commercial_operation", flag(&ops.commercial_operation)),
        attr("operational", "auxiliary_systems", flag(&ops.auxiliary_systems)),
        attr("operational", "energy_producers", ops.energy_producers.display()),
        attr("operational", "energy_consumers", ops.energy_consumers.display()),
        attr("operational", "vessel_age", ops.vessel_age.display()),
        attr("operational", "equipment_age", ops.equipment_age.display()),
        attr("operational", "equipment_condition", ops.equipment_condition.display()),
        attr("operational", "primary_use", ops.primary_use.display()),
        attr("operational", "daily_operating_hours", ops.daily_operating_hours.display_with_unit("h")),
        attr("operational", "seasonal_months", ops.seasonal_months.display()),
        attr("operational", "typical_load_percentage", ops.typical_load_percentage.display_with_unit("%")),
        attr("operational", "operating_conditions", ops.operating_conditions.display()),
    ]
}

fn and_then<T>(raw: &Spec<String>, parse: impl Fn(&str) -> Option<T>) -> Spec<T> {
    Spec::from_option(clean_text(raw).into_option().and_then(|s| parse(&s)))
}

fn clean_text(raw: &Spec<String>) -> Spec<String> {
    Spec::from_option(raw.value().and_then(|s| normalize_text(s)))
}

/// Collapse whitespace; blanks and placeholder words become `None`
fn normalize_text(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let placeholder = text.is_empty()
        || text.eq_ignore_ascii_case(NOT_SPECIFIED)
        || text.eq_ignore_ascii_case("unknown")
        || text.eq_ignore_ascii_case("n/a");
    (!placeholder).then_some(text)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse a length to feet: `25`, `25 ft`, `25' 6"`, `7.6 m`
pub fn parse_length_ft(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', "");
    let caps = LENGTH_RE.captures(&cleaned)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());

    let feet = match unit.as_deref() {
        Some(u) if u.starts_with('m') => value * FEET_PER_METRE,
        _ => {
            let inches = caps
                .get(3)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .unwrap_or(0.0);
            value + inches / 12.0
        }
    };

    let feet = round2(feet);
    (feet.is_finite() && feet > 0.0).then_some(feet)
}

/// Parse a weight to pounds: `5000`, `5,000 lbs`, `2300 kg`, `3 tons`
pub fn parse_weight_lbs(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', "");
    let caps = WEIGHT_RE.captures(&cleaned)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());

    let pounds = match unit.as_deref() {
        Some("kg" | "kgs" | "kilogram" | "kilograms") => value * LBS_PER_KG,
        Some("t" | "tonne" | "tonnes") => value * 1000.0 * LBS_PER_KG,
        Some("ton" | "tons") => value * 2000.0,
        _ => value,
    };

    let pounds = round2(pounds);
    (pounds.is_finite() && pounds > 0.0).then_some(pounds)
}

/// Parse YES/NO style flags, looking only at the first word
pub fn parse_flag(raw: &str) -> Option<bool> {
    let word: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    match word.as_str() {
        "yes" | "y" | "true" | "1" => Some(true),
        "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Normalizes the raw attributes from stage 1
#[derive(Debug, Default)]
pub struct ProfileBuilder;

impl ProfileBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for ProfileBuilder {
    fn name(&self) -> &'static str {
        PROFILE_BUILDER
    }

    fn description(&self) -> &'static str {
        "Normalize vessel attributes into a structured profile"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[IMAGE_ANALYZER]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let analysis = ctx.require_analysis()?;
        let profile = normalize(&analysis.boat_specifications, ctx.input.usage.as_ref())?;

        tracing::debug!(
            session_id = %ctx.session_id,
            specified = profile
                .profile_attributes
                .iter()
                .filter(|a| a.value != NOT_SPECIFIED)
                .count(),
            "Profile normalized"
        );
        Ok(StageOutput::ProfileBuilder(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> BoatSpecifications {
        BoatSpecifications {
            builder_make: Spec::Specified("  Boston   Whaler ".into()),
            class_model: Spec::Specified("Outrage 23".into()),
            boat_type: Spec::Specified("deep v".into()),
            length: Spec::Specified("23' 6\"".into()),
            beam: Spec::Specified("2.59 m".into()),
            weight: Spec::Specified("2,300 kg".into()),
            commercial: Spec::Specified("no".into()),
            aux: Spec::Specified("YES - generator".into()),
            fuel_type: Spec::Specified("Gasoline".into()),
            vessel_age: Spec::Specified("unknown".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_length_parsing() {
        assert_eq!(parse_length_ft("25"), Some(25.0));
        assert_eq!(parse_length_ft("25 ft"), Some(25.0));
        assert_eq!(parse_length_ft("25 feet"), Some(25.0));
        assert_eq!(parse_length_ft("25'"), Some(25.0));
        assert_eq!(parse_length_ft("25' 6\""), Some(25.5));
        assert_eq!(parse_length_ft("7.62 m"), Some(25.0));
        assert_eq!(parse_length_ft("about 10 meters"), Some(32.81));
        assert_eq!(parse_length_ft("not visible"), None);
        assert_eq!(parse_length_ft("0 ft"), None);
    }

    #[test]
    fn test_weight_parsing() {
        assert_eq!(parse_weight_lbs("5000"), Some(5000.0));
        assert_eq!(parse_weight_lbs("5,000 lbs"), Some(5000.0));
        assert_eq!(parse_weight_lbs("1000 kg"), Some(2204.62));
        assert_eq!(parse_weight_lbs("3 tons"), Some(6000.0));
        assert_eq!(parse_weight_lbs("heavy"), None);
    }

    #[test]
    fn test_overflowing_numbers_are_rejected() {
        let huge = "9".repeat(400);
        assert_eq!(parse_length_ft(&format!("{} ft", huge)), None);
        assert_eq!(parse_length_ft(&format!("{} m", huge)), None);
        assert_eq!(parse_weight_lbs(&format!("{} lbs", huge)), None);
        assert_eq!(parse_weight_lbs(&format!("{} tons", huge)), None);
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag("No, private use"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_normalize() {
        let profile = normalize(&specs(), None).unwrap();
        let phys = &profile.physical_specifications;

        assert_eq!(
            profile.vessel_identity.builder_make,
            Spec::Specified("Boston Whaler".to_string())
        );
        assert_eq!(phys.length_ft, Spec::Specified(23.5));
        assert_eq!(phys.beam_ft, Spec::Specified(8.5));
        assert_eq!(phys.boat_type, Spec::Specified(HullType::VBottom));
        assert_eq!(phys.fuel_type, Spec::Specified(FuelType::Gasoline));
        assert_eq!(profile.operational_profile.auxiliary_systems, Spec::Specified(true));
        assert_eq!(profile.operational_profile.commercial_operation, Spec::Specified(false));
        assert_eq!(profile.operational_profile.vessel_age, Spec::NotSpecified);
        assert_eq!(profile.display_name().as_deref(), Some("Boston Whaler Outrage 23"));
    }

    #[test]
    fn test_missing_fields_become_sentinel() {
        let profile = normalize(&BoatSpecifications::default(), None).unwrap();
        assert_eq!(profile.profile_attributes.len(), 22);
        assert!(profile.profile_attributes.iter().all(|a| a.value == NOT_SPECIFIED));

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["physical_specifications"]["length_ft"], NOT_SPECIFIED);
        assert_eq!(json["operational_profile"]["primary_use"], NOT_SPECIFIED);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let usage = UsageAnswers {
            primary_use: Some("commercial fishing".into()),
            operating_hours: Some(8.0),
            operating_season: Some(6.0),
            typical_load: Some(75.0),
            operating_conditions: Some("Choppy near the ledges".into()),
        };

        for answers in [None, Some(&usage)] {
            let profile = normalize(&specs(), answers).unwrap();
            let again = normalize(&profile.to_specifications(), answers).unwrap();
            assert_eq!(again, profile);
        }
    }

    #[test]
    fn test_usage_answers() {
        let usage = UsageAnswers {
            primary_use: Some("commercial fishing".into()),
            operating_hours: Some(8.0),
            ..Default::default()
        };
        let profile = normalize(&specs(), Some(&usage)).unwrap();
        let ops = &profile.operational_profile;
        assert_eq!(ops.primary_use, Spec::Specified("Commercial Fishing".to_string()));
        assert_eq!(ops.daily_operating_hours, Spec::Specified(8.0));
        assert_eq!(ops.seasonal_months, Spec::NotSpecified);
        assert_eq!(profile.usage_questions.len(), 5);

        let bad = UsageAnswers {
            operating_hours: Some(30.0),
            ..Default::default()
        };
        let err = normalize(&specs(), Some(&bad)).unwrap_err();
        assert!(err.to_string().contains("operating_hours"));
    }
}

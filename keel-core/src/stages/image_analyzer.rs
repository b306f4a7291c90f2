//! Stage 1: identify the vessel from a photo or from typed-in fields

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::{ImageAttachment, LLMRequest};
use crate::parsing::{ParseError, text_field};
use crate::vessel::{NOT_SPECIFIED, Spec};
use crate::workflow::{InputSource, ManualEntry, Stage, StageContext, StageError, StageOutput};

use super::IMAGE_ANALYZER;

const SYSTEM_PROMPT: &str = "You are an expert marine surveyor who identifies boats from photographs. \
Answer with a single JSON object and nothing else.";

const VISION_PROMPT: &str = r#"Examine the boat in the attached photo and report what you can determine.

Return a JSON object with exactly these keys:
- "BUILDER_MAKE": the builder or brand, if visible
- "CLASS_MODEL": the model or class, if visible
- "HULL_TYPE": one of Flat Bottom, Multi-hull, Pontoon, RHIB, Semi-Displacement, V-Bottom, Displacement
- "LENGTH": overall length with unit, e.g. "23 ft"
- "BEAM": beam with unit
- "WEIGHT": dry weight with unit
- "HULL_COATING": condition of the bottom paint or coating
- "AUX": "YES" if auxiliary systems (generator, inverter, air conditioning) are visible, else "NO"
- "COMMERCIAL": "YES" if the boat appears to be in commercial service, else "NO"
- "FUEL_TYPE": gasoline, marineDiesel, hybrid or electric
- "ENERGY_PRODUCERS": engines, generators, solar panels
- "ENERGY_CONSUMERS": electronics, pumps, winches, lighting
- "VESSEL_AGE": approximate age in years
- "EQUIPMENT_AGE": approximate age of engines and electronics
- "EQUIPMENT_CONDITION": overall condition of visible equipment
- "SUGGESTIONS": list of things the owner should double-check

Use "not specified" for anything you cannot determine.
If the image does not show a boat, return {"ERROR": "<reason>", "CODE": "NOT_A_BOAT"}."#;

/// Keys a vision reply must contain to be usable
const REQUIRED_KEYS: &[&str] = &["HULL_TYPE", "LENGTH", "BEAM"];

const BASE_SUGGESTIONS: &[&str] = &[
    "Please review the identified boat specifications",
    "Confirm the boat type classification is correct",
    "Verify the dimensions match your vessel",
];

/// How the boat specifications were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    ImageAnalysis,
    ManualInput,
}

/// Raw vessel attributes as reported by the user or the vision model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoatSpecifications {
    #[serde(rename = "Builder/Make")]
    pub builder_make: Spec<String>,
    #[serde(rename = "Class/Model")]
    pub class_model: Spec<String>,
    #[serde(rename = "Name")]
    pub name: Spec<String>,
    #[serde(rename = "MMSI")]
    pub mmsi: Spec<String>,
    #[serde(rename = "Boat Type")]
    pub boat_type: Spec<String>,
    #[serde(rename = "Length")]
    pub length: Spec<String>,
    #[serde(rename = "Beam")]
    pub beam: Spec<String>,
    #[serde(rename = "Weight")]
    pub weight: Spec<String>,
    #[serde(rename = "Hull Coating")]
    pub hull_coating: Spec<String>,
    #[serde(rename = "Aux")]
    pub aux: Spec<String>,
    #[serde(rename = "Commercial")]
    pub commercial: Spec<String>,
    #[serde(rename = "Fuel Type")]
    pub fuel_type: Spec<String>,
    #[serde(rename = "Energy Producers")]
    pub energy_producers: Spec<String>,
    #[serde(rename = "Energy Consumers")]
    pub energy_consumers: Spec<String>,
    #[serde(rename = "Vessel Age")]
    pub vessel_age: Spec<String>,
    #[serde(rename = "Equipment Age")]
    pub equipment_age: Spec<String>,
    #[serde(rename = "Equipment Condition")]
    pub equipment_condition: Spec<String>,
}

impl BoatSpecifications {
    fn from_manual(entry: &ManualEntry) -> Self {
        Self {
            builder_make: text(Some(&entry.builder_make)),
            class_model: text(Some(&entry.class_model)),
            name: text(entry.name.as_ref()),
            mmsi: text(entry.mmsi.as_ref()),
            boat_type: text(entry.boat_type.as_ref()),
            length: text(entry.length.as_ref()),
            beam: text(entry.beam.as_ref()),
            ..Default::default()
        }
    }

    fn from_vision(reply: &Map<String, Value>, brand: Option<&String>, model: Option<&String>) -> Self {
        let field = |key: &str| text(text_field(reply, key).as_ref());

        Self {
            builder_make: text(brand).or(field("BUILDER_MAKE")),
            class_model: text(model).or(field("CLASS_MODEL")),
            name: Spec::NotSpecified,
            mmsi: Spec::NotSpecified,
            boat_type: field("HULL_TYPE"),
            length: field("LENGTH"),
            beam: field("BEAM"),
            weight: field("WEIGHT"),
            hull_coating: field("HULL_COATING"),
            aux: field("AUX"),
            commercial: field("COMMERCIAL"),
            fuel_type: field("FUEL_TYPE"),
            energy_producers: field("ENERGY_PRODUCERS"),
            energy_consumers: field("ENERGY_CONSUMERS"),
            vessel_age: field("VESSEL_AGE"),
            equipment_age: field("EQUIPMENT_AGE"),
            equipment_condition: field("EQUIPMENT_CONDITION"),
        }
    }
}

/// Trimmed text, treating blanks and the sentinel as unknown
fn text(value: Option<&String>) -> Spec<String> {
    match value.map(|s| s.trim()) {
        Some(s) if !s.is_empty() && !s.eq_ignore_ascii_case(NOT_SPECIFIED) => {
            Spec::Specified(s.to_string())
        }
        _ => Spec::NotSpecified,
    }
}

/// Output of the image/data analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoatAnalysis {
    pub boat_specifications: BoatSpecifications,
    pub analysis_method: AnalysisMethod,
    pub suggestions_for_review: Vec<String>,
}

/// Extracts raw vessel attributes from a photo, or takes them from manual
/// entry without calling the model.
#[derive(Debug, Default)]
pub struct ImageAnalyzer;

impl ImageAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn analyze_manual(&self, entry: &ManualEntry) -> Result<BoatAnalysis, StageError> {
        let mut missing = Vec::new();
        if entry.builder_make.trim().is_empty() {
            missing.push("builder_make");
        }
        if entry.class_model.trim().is_empty() {
            missing.push("class_model");
        }
        if !missing.is_empty() {
            return Err(StageError::InputInvalid(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        Ok(BoatAnalysis {
            boat_specifications: BoatSpecifications::from_manual(entry),
            analysis_method: AnalysisMethod::ManualInput,
            suggestions_for_review: base_suggestions(),
        })
    }

    async fn analyze_image(
        &self,
        ctx: &StageContext<'_>,
        bytes: &[u8],
        media_type: &str,
        brand: Option<&String>,
        model: Option<&String>,
    ) -> Result<BoatAnalysis, StageError> {
        if bytes.is_empty() {
            return Err(StageError::InputInvalid("image is empty".into()));
        }
        if !media_type.starts_with("image/") {
            return Err(StageError::InputInvalid(format!(
                "unsupported media type '{}'",
                media_type
            )));
        }

        let mut prompt = VISION_PROMPT.to_string();
        if let Some(brand) = brand {
            prompt.push_str(&format!("\n\nThe owner says the builder is {}.", brand));
        }
        if let Some(model) = model {
            prompt.push_str(&format!("\nThe owner says the model is {}.", model));
        }

        let request = LLMRequest::with_system_prompt(SYSTEM_PROMPT, prompt)
            .with_image(ImageAttachment::new(media_type, bytes.to_vec()));
        let reply = ctx.infer(request).await?;

        if let Some(reason) = text_field(&reply, "ERROR") {
            let code = text_field(&reply, "CODE").unwrap_or_else(|| "UNKNOWN".into());
            return Err(StageError::InputInvalid(format!("{} ({})", reason, code)));
        }

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| !reply.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::MissingFields(missing).into());
        }

        let mut suggestions = base_suggestions();
        if let Some(Value::Array(items)) = reply.get("SUGGESTIONS") {
            suggestions.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }

        Ok(BoatAnalysis {
            boat_specifications: BoatSpecifications::from_vision(&reply, brand, model),
            analysis_method: AnalysisMethod::ImageAnalysis,
            suggestions_for_review: suggestions,
        })
    }
}

fn base_suggestions() -> Vec<String> {
    BASE_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl Stage for ImageAnalyzer {
    fn name(&self) -> &'static str {
        IMAGE_ANALYZER
    }

    fn description(&self) -> &'static str {
        "Identify the vessel from a photo or manual entry"
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let analysis = match &ctx.input.source {
            InputSource::Manual(entry) => self.analyze_manual(entry)?,
            InputSource::Image {
                bytes,
                media_type,
                brand,
                model,
            } => {
                self.analyze_image(ctx, bytes, media_type, brand.as_ref(), model.as_ref())
                    .await?
            }
        };

        Ok(StageOutput::ImageAnalyzer(analysis))
    }
}

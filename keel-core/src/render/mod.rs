//! Artifact renderers
//!
//! Charts and CSV tables produced for the final report. Renderers reach the
//! stages through [`crate::workflow::StageServices`].

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

mod chart;
mod table;

pub use chart::{ChartKind, ChartRenderer, ChartSpec, DataPoint, Series, SvgChartRenderer};
pub use table::{CsvExporter, CsvTableExporter, Table};

/// Rendering failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("chart '{0}' has no data points")]
    EmptyChart(String),

    #[error("invalid chart data: {0}")]
    InvalidData(String),

    #[error("render backend failed: {0}")]
    Backend(String),

    #[error("render timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A rendered chart embedded in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedChart {
    pub name: String,
    pub title: String,
    pub media_type: String,
    /// Image bytes, base64 in serialized form
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Serde adapter writing byte buffers as standard base64 strings
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

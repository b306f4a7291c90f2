//! Tabular export

use serde::{Deserialize, Serialize};

use super::RenderError;

/// Headers plus rows, ready for export
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Serializes tables as delimited text
pub trait CsvExporter: Send + Sync {
    fn to_csv(&self, table: &Table) -> Result<String, RenderError>;
}

/// [`CsvExporter`] on top of the `csv` crate
#[derive(Debug, Clone)]
pub struct CsvTableExporter {
    delimiter: u8,
}

impl CsvTableExporter {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            delimiter: delimiter as u8,
        }
    }
}

impl Default for CsvTableExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvExporter for CsvTableExporter {
    fn to_csv(&self, table: &Table) -> Result<String, RenderError> {
        let width = table.headers.len();
        if let Some((idx, row)) = table
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != width)
        {
            return Err(RenderError::InvalidData(format!(
                "row {} has {} fields, expected {}",
                idx + 1,
                row.len(),
                width
            )));
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());

        writer
            .write_record(&table.headers)
            .map_err(|e: csv::Error| RenderError::Backend(e.to_string()))?;
        for row in &table.rows {
            writer
                .write_record(row)
                .map_err(|e: csv::Error| RenderError::Backend(e.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| RenderError::Backend(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| RenderError::Backend(e.to_string()))
    }
}

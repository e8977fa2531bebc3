//! Fixture data for data-driven load tests.
//!
//! A [`FixtureDataset`] is loaded once before any simulated client starts and
//! is shared read-only for the whole run. Each client is bound to exactly one
//! record, chosen round-robin from its 1-based client index.
//!
//! # Supported formats
//! - JSON: a top-level array of objects
//! - CSV: a header row followed by data rows (every value is a string)

use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur when loading fixture data.
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Failed to read fixture file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON fixture: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read CSV fixture: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON fixture must be an array of objects")]
    NotAnArray,

    #[error("JSON fixture entry {0} is not an object")]
    NotAnObject(usize),

    #[error("CSV fixture has no headers")]
    NoHeaders,

    #[error("Fixture file is empty or has no records")]
    Empty,
}

/// One fixture record: field name -> JSON value.
pub type Record = Map<String, Value>;

/// Immutable, ordered collection of fixture records.
#[derive(Debug, Clone)]
pub struct FixtureDataset {
    records: Arc<[Record]>,
}

impl FixtureDataset {
    /// Load a dataset from a file, picking the format from the extension
    /// (`.csv` is CSV, anything else is JSON).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FixtureError> {
        let path_ref = path.as_ref();
        info!(path = ?path_ref, "Loading fixture data file");

        let content = fs::read_to_string(path_ref).map_err(|source| FixtureError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;

        let is_csv = path_ref
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);

        let dataset = if is_csv {
            Self::from_csv_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };

        info!(
            path = ?path_ref,
            records = dataset.len(),
            "Fixture data loaded successfully"
        );

        Ok(dataset)
    }

    /// Parse a JSON array of objects.
    pub fn from_json_str(content: &str) -> Result<Self, FixtureError> {
        let value: Value = serde_json::from_str(content)?;
        let Value::Array(entries) = value else {
            return Err(FixtureError::NotAnArray);
        };

        let records = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| match entry {
                Value::Object(record) => Ok(record),
                _ => Err(FixtureError::NotAnObject(i)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_records(records)
    }

    /// Parse CSV content with a header row.
    pub fn from_csv_str(content: &str) -> Result<Self, FixtureError> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();

        if headers.is_empty() {
            return Err(FixtureError::NoHeaders);
        }

        debug!(headers = ?headers, "CSV headers loaded");

        let mut records = Vec::new();
        for result in reader.records() {
            let row = result?;
            let record = headers
                .iter()
                .zip(row.iter())
                .map(|(header, value)| (header.clone(), Value::String(value.to_string())))
                .collect::<Record>();
            records.push(record);
        }

        Self::from_records(records)
    }

    /// Build a dataset from records already in memory.
    pub fn from_records(records: Vec<Record>) -> Result<Self, FixtureError> {
        if records.is_empty() {
            return Err(FixtureError::Empty);
        }
        Ok(Self {
            records: records.into(),
        })
    }

    /// A dataset holding a single empty record, for query-only runs.
    pub fn single_empty() -> Self {
        Self {
            records: vec![Record::new()].into(),
        }
    }

    /// The record bound to a 1-based client index: `records[(index - 1) mod len]`.
    ///
    /// Index 0 is treated like index 1.
    pub fn record_for_client(&self, client_index: usize) -> &Record {
        let slot = client_index.saturating_sub(1) % self.records.len();
        &self.records[slot]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false; an empty dataset cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

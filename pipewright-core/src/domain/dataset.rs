//! Dataset types
//!
//! A dataset is the unit of data passed between pipeline nodes: an ordered
//! list of JSON records. Extractors produce one, transformers map one to
//! another, loaders consume one and report a side-effect summary.

use serde::{Deserialize, Serialize};

/// A single record: column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Ordered collection of records flowing between pipeline nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Concatenate several upstream datasets in order into one.
    pub fn concat<I: IntoIterator<Item = Dataset>>(parts: I) -> Self {
        let mut rows = Vec::new();
        for part in parts {
            rows.extend(part.rows);
        }
        Self { rows }
    }
}

/// What a loader reports back instead of a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSummary {
    pub destination: String,
    pub rows_written: u64,
    #[serde(default)]
    pub details: serde_json::Value,
}

//! Downstream sample importer
//!
//! An import is created once per run, receives record batches in any order,
//! and is either committed at the end or deleted on failure. Samples the
//! importer rejects come back as structured [`InvalidSample`] entries and are
//! not pipeline failures.

use async_trait::async_trait;
use import_common::{ImportId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::assembler::Record;

pub mod http;

pub use http::{HttpImporterConfig, HttpSampleImporter};

/// Unit suffix appended to age range values lacking one
const AGE_UNIT_SUFFIX: char = 'y';

/// Fields that carry an age unit; the first one decides whether to append it
pub const DEFAULT_UNIT_SUFFIXED_FIELDS: [&str; 2] =
    ["patient-age-range-from", "patient-age-range-to"];

/// Parameters of a new downstream import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateImport {
    #[serde(rename = "dataSetIdentifier")]
    pub dataset_id: String,
    #[serde(rename = "dataVersionIdentifier")]
    pub version_id: String,
    #[serde(rename = "dataVersionDescription")]
    pub description: String,
}

/// One failed field validation of a rejected sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedValidation {
    /// Failure reason, e.g. `unknown-value`
    #[serde(rename = "type")]
    pub failure_type: String,
    pub input_name: String,
    #[serde(default)]
    pub input_value: String,
    #[serde(default)]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidSample {
    #[serde(default)]
    pub failed_validation_data: Vec<FailedValidation>,
    /// Failures not tied to a single field
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidSample {
    #[serde(default)]
    pub original_values: BTreeMap<String, String>,
}

/// Outcome of one `store_records` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    #[serde(default)]
    pub imported_count: u64,
    #[serde(default)]
    pub duplicate_count: u64,
    #[serde(default)]
    pub valid_samples: Vec<ValidSample>,
    #[serde(default)]
    pub invalid_samples: Vec<InvalidSample>,
    /// Batch-level messages outside of any sample
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

#[async_trait]
pub trait SampleImporter: Send + Sync {
    async fn create_import(&self, request: &CreateImport) -> Result<ImportId>;

    async fn store_records(&self, import_id: &ImportId, records: &[Record]) -> Result<BatchResult>;

    /// Activate the import so its data becomes visible downstream
    async fn commit(&self, import_id: &ImportId) -> Result<()>;

    async fn delete(&self, import_id: &ImportId) -> Result<()>;
}

/// Append the age unit to unit-suffixed fields before submission
///
/// The first entry of `fields` is the trigger: when it is present, non-empty
/// and does not already end in `y`/`Y`, the suffix is appended to every listed
/// field present in the record. An empty `fields` list disables the rule.
pub fn normalize_records(records: &mut [Record], fields: &[String]) {
    let Some(trigger) = fields.first() else {
        return;
    };

    for record in records.iter_mut() {
        let needs_unit = record
            .get(trigger)
            .and_then(|value| value.chars().last())
            .is_some_and(|last| !last.eq_ignore_ascii_case(&AGE_UNIT_SUFFIX));

        if !needs_unit {
            continue;
        }

        for field in fields {
            if let Some(value) = record.get_mut(field) {
                value.push(AGE_UNIT_SUFFIX);
            }
        }
    }
}

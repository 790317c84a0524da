//! Import report
//!
//! [`ImportReport`] folds every batch result of one import into running
//! totals. Folding only adds to counters and creates missing map entries, so
//! the final report does not depend on the order batches complete in.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::importer::{BatchResult, InvalidSample};

/// failure type -> input field -> observed value -> count
pub type FailureTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>;

/// Token authorizing the publish/unpublish links of one data version
pub fn report_token(version_id: &str, secret: &str) -> String {
    hex::encode(Sha256::digest(format!("{}{}", version_id, secret).as_bytes()))
}

/// Where to publish the import result and how to sign the links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLinks {
    pub domain: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub import_name: String,
    pub version_id: String,
    pub imported: u64,
    pub duplicate: u64,
    pub invalid: u64,
    pub total: u64,
    pub failures: FailureTable,
    /// Validation messages not tied to one field
    pub messages: BTreeMap<String, u64>,
    /// tallied field -> value -> count over valid samples
    pub tallies: BTreeMap<String, BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "InvalidDataView::is_empty")]
    pub invalid_data: InvalidDataView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<ReportLinks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl ImportReport {
    pub fn new(import_name: impl Into<String>, version_id: impl Into<String>, tallied_fields: &[String]) -> Self {
        Self {
            import_name: import_name.into(),
            version_id: version_id.into(),
            imported: 0,
            duplicate: 0,
            invalid: 0,
            total: 0,
            failures: BTreeMap::new(),
            messages: BTreeMap::new(),
            tallies: tallied_fields
                .iter()
                .map(|field| (field.clone(), BTreeMap::new()))
                .collect(),
            invalid_data: InvalidDataView::default(),
            links: None,
            finalized_at: None,
        }
    }

    /// Attach publish links for `domain`, signed with `secret`
    pub fn with_links(mut self, domain: impl Into<String>, secret: &str) -> Self {
        self.links = Some(ReportLinks {
            domain: domain.into(),
            token: report_token(&self.version_id, secret),
        });
        self
    }

    /// Fold one batch result into the totals
    pub fn accumulate(&mut self, batch: &BatchResult) {
        let invalid = batch.invalid_samples.len() as u64;
        self.imported += batch.imported_count;
        self.duplicate += batch.duplicate_count;
        self.invalid += invalid;
        self.total += batch.imported_count + batch.duplicate_count + invalid;

        for sample in &batch.invalid_samples {
            for failure in &sample.failed_validation_data {
                *self
                    .failures
                    .entry(failure.failure_type.clone())
                    .or_default()
                    .entry(failure.input_name.clone())
                    .or_default()
                    .entry(failure.input_value.clone())
                    .or_default() += 1;
            }
            for message in &sample.validation_errors {
                *self.messages.entry(message.clone()).or_default() += 1;
            }
        }
        for message in &batch.validation_errors {
            *self.messages.entry(message.clone()).or_default() += 1;
        }
        self.invalid_data.extend(&batch.invalid_samples);

        for sample in &batch.valid_samples {
            for (field, counts) in self.tallies.iter_mut() {
                if let Some(value) = sample.original_values.get(field) {
                    *counts.entry(value.clone()).or_default() += 1;
                }
            }
        }
    }

    /// Stamp the completion time; later calls keep the first stamp
    pub fn finalize(&mut self, at: DateTime<Utc>) {
        self.finalized_at.get_or_insert(at);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn imported_percentage(&self) -> f64 {
        percentage(self.imported, self.total)
    }

    pub fn duplicate_percentage(&self) -> f64 {
        percentage(self.duplicate, self.total)
    }

    pub fn invalid_percentage(&self) -> f64 {
        percentage(self.invalid, self.total)
    }

    pub fn subject_line(&self) -> String {
        let at = self.finalized_at.unwrap_or_else(Utc::now);
        format!(
            "Import report for {} - {}",
            self.import_name,
            at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }

    /// Plain-text summary for logs and operators
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        // writing to a String cannot fail
        let _ = self.write_summary(&mut out);
        out
    }

    fn write_summary(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "{}", self.subject_line())?;
        writeln!(out)?;
        writeln!(out, "Import: {}", self.import_name)?;
        writeln!(out, "Data version: {}", self.version_id)?;
        writeln!(out, "Total samples: {}", self.total)?;
        writeln!(out, "Imported: {} ({:.1}%)", self.imported, self.imported_percentage())?;
        writeln!(out, "Duplicates: {} ({:.1}%)", self.duplicate, self.duplicate_percentage())?;
        writeln!(out, "Failed to import: {} ({:.1}%)", self.invalid, self.invalid_percentage())?;

        if let Some(links) = &self.links {
            writeln!(out)?;
            for (label, statuses) in [
                ("existing data only", "active"),
                ("new imported data only", "preview"),
                ("existing and new data mixed", "active,preview"),
            ] {
                writeln!(
                    out,
                    "{} - {}: https://{}?dataVersionStatusIdentifiers={}",
                    self.import_name, label, links.domain, statuses
                )?;
            }
            for (label, action) in [("publish", "activate"), ("unpublish", "deactivate")] {
                writeln!(
                    out,
                    "{} - {} newly imported data: https://api.{}/rda/v2/rda.dataVersionStatus?identifier={}&token={}&action={}",
                    self.import_name, label, links.domain, self.version_id, links.token, action
                )?;
            }
        }

        if !self.failures.is_empty() {
            writeln!(out, "\nMapping problems")?;
            for (problem, fields) in &self.failures {
                writeln!(out, "  {}", problem)?;
                for (field, values) in fields {
                    writeln!(out, "    Field {}", field)?;
                    for (value, count) in values {
                        writeln!(out, "      Value: {}, {}", value, count)?;
                    }
                }
            }
        }

        if !self.invalid_data.is_empty() {
            writeln!(out, "\nInvalid values per field")?;
            for (field, invalid) in &self.invalid_data.fields {
                match &invalid.output_name {
                    Some(output) => writeln!(out, "  {} -> {}", field, output)?,
                    None => writeln!(out, "  {}", field)?,
                }
                for (value, kinds) in &invalid.values {
                    let kinds: Vec<&str> = kinds.iter().map(String::as_str).collect();
                    writeln!(out, "    {}: {}", value, kinds.join(", "))?;
                }
            }
        }

        if !self.messages.is_empty() {
            writeln!(out, "\nOther problems")?;
            for (message, count) in &self.messages {
                writeln!(out, "  {}: {}", message, count)?;
            }
        }

        for (field, counts) in self.tallies.iter().filter(|(_, c)| !c.is_empty()) {
            writeln!(out, "\nImported values of {}", field)?;
            for (value, count) in counts {
                writeln!(out, "  {}: {}", value, count)?;
            }
        }

        Ok(())
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Failed values of one input field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidField {
    pub output_name: Option<String>,
    /// observed value -> distinct failure types
    pub values: BTreeMap<String, BTreeSet<String>>,
}

/// Invalid samples regrouped per input field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidDataView {
    pub fields: BTreeMap<String, InvalidField>,
}

impl InvalidDataView {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a InvalidSample>) -> Self {
        let mut view = Self::default();
        view.extend(samples);
        view
    }

    pub fn extend<'a>(&mut self, samples: impl IntoIterator<Item = &'a InvalidSample>) {
        for sample in samples {
            for failure in &sample.failed_validation_data {
                let field = self.fields.entry(failure.input_name.clone()).or_default();
                // greatest name wins so the result is independent of arrival order
                if failure.output_name > field.output_name {
                    field.output_name = failure.output_name.clone();
                }
                field
                    .values
                    .entry(failure.input_value.clone())
                    .or_default()
                    .insert(failure.failure_type.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

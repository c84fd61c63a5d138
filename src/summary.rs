//! Feature counts of a finished annotation run.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::TaxrefError;

pub const ACCEPTED_GFF: &str = "accept.gff";

#[derive(Debug, Clone, Serialize)]
pub struct FeatureSummary {
    pub gff: Utf8PathBuf,
    pub found: bool,
    pub counts: BTreeMap<String, usize>,
}

/// Counts GFF records by feature type (third column). Comments, blank lines
/// and lines with fewer than three fields are ignored.
pub fn count_features(text: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(kind) = line.split_whitespace().nth(2) {
            *counts.entry(kind.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Summarizes `accept.gff` under `output`. A run without one has no counts.
pub fn summarize(output: &Utf8Path) -> Result<FeatureSummary, TaxrefError> {
    let gff = output.join(ACCEPTED_GFF);
    let (found, counts) = match fs::read_to_string(&gff) {
        Ok(text) => (true, count_features(&text)),
        Err(err) if err.kind() == ErrorKind::NotFound => (false, BTreeMap::new()),
        Err(err) => return Err(TaxrefError::Filesystem(format!("{gff}: {err}"))),
    };
    Ok(FeatureSummary { gff, found, counts })
}

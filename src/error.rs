use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::TaxonId;

#[derive(Debug, Error, Diagnostic)]
pub enum TaxrefError {
    #[error("invalid taxon id: {0}")]
    InvalidTaxonId(String),

    #[error("lineage unavailable for taxon {0}")]
    LineageUnavailable(TaxonId),

    #[error("lineage store has no parent row for taxon {missing} while resolving {taxon}")]
    CorruptLineageStore { taxon: TaxonId, missing: TaxonId },

    #[error("lineage store error: {0}")]
    LineageDatabase(String),

    #[error("taxonomy request failed: {0}")]
    TaxonomyHttp(String),

    #[error("taxonomy service returned status {status}: {message}")]
    TaxonomyStatus { status: u16, message: String },

    #[error("unexpected taxonomy response: {0}")]
    TaxonomyParse(String),

    #[error("repository request failed: {0}")]
    RepositoryHttp(String),

    #[error("repository returned status {status}: {message}")]
    RepositoryStatus { status: u16, message: String },

    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(String),

    #[error("catalog line {line}: {message}")]
    CatalogParse { line: usize, message: String },

    #[error("failed to connect to {host}: {message}")]
    FtpConnect { host: String, message: String },

    #[error("failed to list {path}: {message}")]
    Listing { path: String, message: String },

    #[error("transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    #[error("malformed parameter string for key {key}: {reason}")]
    MalformedParameterString { key: String, reason: String },

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("no reference proteins found for taxon {0}; specify proteins explicitly")]
    NoProteins(TaxonId),

    #[error("either proteins or RNA-seq reads must be provided for annotation")]
    NoEvidence,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse YAML parameters: {0}")]
    ParamsParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

use crate::domain::{Lineage, TaxonId};
use crate::error::TaxrefError;

/// One reference resource indexed by its representative taxon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub taxon: TaxonId,
    /// Lineage ending in `taxon`, when the catalog carries one.
    pub lineage: Option<Lineage>,
    /// Logical repository path of the resource, without version.
    pub locator: String,
}

/// The two catalog flavors published in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Proteins,
    HmmParameters,
}

impl CatalogKind {
    pub fn subsystem(self) -> &'static str {
        match self {
            CatalogKind::Proteins => "target_proteins",
            CatalogKind::HmmParameters => "gnomon",
        }
    }

    /// Catalog file path inside the subsystem.
    pub fn list_file(self) -> &'static str {
        match self {
            CatalogKind::Proteins => "taxid.list",
            CatalogKind::HmmParameters => "hmm_parameters/taxid.list",
        }
    }

    /// Resource file path inside the subsystem for `taxon`.
    pub fn resource_file(self, taxon: TaxonId) -> String {
        match self {
            CatalogKind::Proteins => format!("{taxon}.faa.gz"),
            CatalogKind::HmmParameters => format!("hmm_parameters/{taxon}.params"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCatalog {
    pub kind: CatalogKind,
    pub entries: Vec<CatalogEntry>,
}

impl ReferenceCatalog {
    /// Parses a tab-separated `taxid.list`.
    ///
    /// The first column is the taxon. The HMM catalog may carry a second
    /// column with a space-separated lineage whose ids can end in `;`; the
    /// entry taxon is appended to it.
    pub fn parse(kind: CatalogKind, text: &str) -> Result<Self, TaxrefError> {
        let mut entries = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut columns = line.split('\t');
            let taxon = parse_id(columns.next().unwrap_or_default(), index + 1)?;
            let lineage = match (kind, columns.next()) {
                (CatalogKind::HmmParameters, Some(column)) => {
                    let mut ids = column
                        .split_whitespace()
                        .map(|token| parse_id(token.trim_end_matches(';'), index + 1))
                        .collect::<Result<Vec<_>, _>>()?;
                    ids.push(taxon);
                    Some(Lineage::new(ids))
                }
                _ => None,
            };
            entries.push(CatalogEntry {
                taxon,
                lineage,
                locator: format!("{}/{}", kind.subsystem(), kind.resource_file(taxon)),
            });
        }
        Ok(Self { kind, entries })
    }

    pub fn taxa(&self) -> Vec<TaxonId> {
        self.entries.iter().map(|entry| entry.taxon).collect()
    }

    pub fn get(&self, taxon: TaxonId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.taxon == taxon)
    }
}

fn parse_id(token: &str, line: usize) -> Result<TaxonId, TaxrefError> {
    token
        .trim()
        .parse::<TaxonId>()
        .map_err(|_| TaxrefError::CatalogParse {
            line,
            message: format!("invalid taxon id {token:?}"),
        })
}

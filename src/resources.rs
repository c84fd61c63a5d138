use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::catalog::{CatalogKind, ReferenceCatalog};
use crate::domain::{Lineage, PLANTS, TaxonId, VERTEBRATES};
use crate::error::TaxrefError;
use crate::manifest::{ResourceLocation, VersionedPaths};
use crate::repository::RepositoryClient;
use crate::selector::{Selection, select_by_position, select_by_prefix_overlap};
use crate::taxonomy::{LineageResolver, SqliteLineageStore, TaxonomyClient};

pub const TAXONOMY_SUBSYSTEM: &str = "taxonomy";
pub const TAXONOMY_DATABASE: &str = "taxonomy4blast.sqlite3";

const RNASEQ_KEYS: [&str; 3] = ["reads", "reads_ids", "reads_query"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntronLimits {
    pub max_intron: u64,
    pub genome_size_threshold: u64,
}

impl IntronLimits {
    pub const UNSET: Self = Self {
        max_intron: 0,
        genome_size_threshold: 0,
    };

    /// Limits for the clade `lineage` belongs to.
    pub fn for_lineage(lineage: &Lineage) -> Self {
        if lineage.contains(PLANTS) {
            Self {
                max_intron: 300_000,
                genome_size_threshold: 3_000_000_000,
            }
        } else if lineage.contains(VERTEBRATES) {
            Self {
                max_intron: 1_200_000,
                genome_size_threshold: 2_000_000_000,
            }
        } else {
            Self {
                max_intron: 600_000,
                genome_size_threshold: 500_000_000,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceChoice {
    pub taxon: TaxonId,
    pub location: ResourceLocation,
}

/// Opens the mirrored taxonomy database if the local cache has one.
/// A database that fails to open is logged and ignored.
pub fn local_lineage_store<R: RepositoryClient>(
    paths: &VersionedPaths<R>,
) -> Result<Option<SqliteLineageStore>, TaxrefError> {
    if paths.store().active_root().is_none() {
        return Ok(None);
    }
    let logical = paths.resolve(TAXONOMY_SUBSYSTEM, TAXONOMY_DATABASE)?;
    let Some(path) = paths.store().existing_path(&logical) else {
        return Ok(None);
    };
    match SqliteLineageStore::open(&path) {
        Ok(store) => Ok(Some(store)),
        Err(err) => {
            tracing::warn!(%path, "ignoring local taxonomy database: {err}");
            Ok(None)
        }
    }
}

/// Picks reference resources for a taxon.
pub struct ResourceResolver<R: RepositoryClient, C: TaxonomyClient> {
    paths: VersionedPaths<R>,
    lineages: LineageResolver<C>,
}

impl<R: RepositoryClient, C: TaxonomyClient> ResourceResolver<R, C> {
    pub fn new(paths: VersionedPaths<R>, lineages: LineageResolver<C>) -> Self {
        Self { paths, lineages }
    }

    pub fn paths(&self) -> &VersionedPaths<R> {
        &self.paths
    }

    pub fn lineages(&self) -> &LineageResolver<C> {
        &self.lineages
    }

    pub fn catalog(&self, kind: CatalogKind) -> Result<ReferenceCatalog, TaxrefError> {
        let text = self.paths.read_text(kind.subsystem(), kind.list_file())?;
        ReferenceCatalog::parse(kind, &text)
    }

    pub fn select_protein_set(&self, taxon: TaxonId) -> Result<Selection, TaxrefError> {
        if taxon.is_unset() {
            return Ok(Selection::NoMatch);
        }
        let catalog = self.catalog(CatalogKind::Proteins)?;
        let lineage = self.lineages.resolve(taxon)?;
        Ok(select_by_position(&lineage, &catalog.taxa()))
    }

    pub fn select_hmm(&self, taxon: TaxonId) -> Result<Selection, TaxrefError> {
        if taxon.is_unset() {
            return Ok(Selection::NoMatch);
        }
        let catalog = self.catalog(CatalogKind::HmmParameters)?;
        let lineage = self.lineages.resolve(taxon)?;
        Ok(select_by_prefix_overlap(&lineage, &catalog.entries))
    }

    pub fn closest_protein_set(
        &self,
        taxon: TaxonId,
    ) -> Result<Option<ReferenceChoice>, TaxrefError> {
        let selection = self.select_protein_set(taxon)?;
        self.choice(CatalogKind::Proteins, taxon, selection)
    }

    pub fn closest_hmm(&self, taxon: TaxonId) -> Result<Option<ReferenceChoice>, TaxrefError> {
        let selection = self.select_hmm(taxon)?;
        self.choice(CatalogKind::HmmParameters, taxon, selection)
    }

    fn choice(
        &self,
        kind: CatalogKind,
        query: TaxonId,
        selection: Selection,
    ) -> Result<Option<ReferenceChoice>, TaxrefError> {
        let Selection::Match { taxon, score } = selection else {
            tracing::debug!(%query, ?kind, "no reference matched");
            return Ok(None);
        };
        tracing::debug!(%query, %taxon, score, ?kind, "closest reference");
        let location = self
            .paths
            .locate(kind.subsystem(), &kind.resource_file(taxon))?;
        Ok(Some(ReferenceChoice { taxon, location }))
    }

    pub fn max_intron(&self, taxon: TaxonId) -> Result<IntronLimits, TaxrefError> {
        if taxon.is_unset() {
            return Ok(IntronLimits::UNSET);
        }
        let lineage = self.lineages.resolve(taxon)?;
        Ok(IntronLimits::for_lineage(&lineage))
    }

    /// Fills implicit annotation inputs (`proteins`, `hmm`, `hmm_taxid`,
    /// `max_intron`, `genome_size_threshold`) and validates that the run has
    /// some evidence to work with.
    pub fn expand_inputs(&self, inputs: &mut Mapping) -> Result<(), TaxrefError> {
        let taxon = match inputs.get("taxid") {
            Some(value) => taxon_from_value(value)?,
            None => return Err(TaxrefError::MissingParameter("taxid".to_string())),
        };
        if !inputs.contains_key("genome") {
            return Err(TaxrefError::MissingParameter("genome".to_string()));
        }

        let has_rnaseq = RNASEQ_KEYS.iter().any(|key| inputs.contains_key(*key));

        if !inputs.contains_key("proteins") {
            match self.closest_protein_set(taxon)? {
                Some(choice) => {
                    inputs.insert("proteins".into(), choice.location.to_string().into());
                }
                None if has_rnaseq => {
                    tracing::warn!(%taxon, "no reference proteins for this taxon, relying on RNA-seq only");
                    inputs.insert("proteins".into(), "".into());
                }
                None => return Err(TaxrefError::NoProteins(taxon)),
            }
        }

        if !has_rnaseq {
            if inputs.get("proteins").is_some_and(is_truthy) {
                tracing::warn!("no RNA-seq reads given; specifying 'reads' is strongly advised");
            } else {
                return Err(TaxrefError::NoEvidence);
            }
        }

        if inputs.contains_key("hmm") {
            inputs.insert("hmm_taxid".into(), taxon.get().into());
        } else {
            let (hmm_taxon, hmm) = match self.closest_hmm(taxon)? {
                Some(choice) => (choice.taxon.get(), choice.location.to_string()),
                None => (0, String::new()),
            };
            inputs.insert("hmm".into(), hmm.into());
            inputs.insert("hmm_taxid".into(), hmm_taxon.into());
        }

        if inputs.contains_key("max_intron") {
            inputs.insert("genome_size_threshold".into(), 0u64.into());
        } else {
            let limits = self.max_intron(taxon)?;
            inputs.insert("max_intron".into(), limits.max_intron.into());
            inputs.insert(
                "genome_size_threshold".into(),
                limits.genome_size_threshold.into(),
            );
        }
        Ok(())
    }
}

fn taxon_from_value(value: &Value) -> Result<TaxonId, TaxrefError> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .map(TaxonId::new)
            .ok_or_else(|| TaxrefError::InvalidTaxonId(number.to_string())),
        Value::String(text) => text.parse(),
        other => Err(TaxrefError::InvalidTaxonId(format!("{other:?}"))),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Sequence(items) => !items.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intron_limits_by_clade() {
        let plant = Lineage::from(vec![1, 2759, 33090, 3702]);
        let fish = Lineage::from(vec![1, 2759, 7742, 7955]);
        let yeast = Lineage::from(vec![1, 2759, 4932]);
        assert_eq!(IntronLimits::for_lineage(&plant).max_intron, 300_000);
        assert_eq!(IntronLimits::for_lineage(&fish).max_intron, 1_200_000);
        assert_eq!(
            IntronLimits::for_lineage(&yeast),
            IntronLimits {
                max_intron: 600_000,
                genome_size_threshold: 500_000_000
            }
        );
    }

    #[test]
    fn taxon_from_yaml_values() {
        assert_eq!(taxon_from_value(&Value::from(9606u32)).unwrap(), TaxonId::new(9606));
        assert_eq!(taxon_from_value(&Value::from("7955")).unwrap(), TaxonId::new(7955));
        assert!(taxon_from_value(&Value::from(-3i64)).is_err());
        assert!(taxon_from_value(&Value::Null).is_err());
    }
}

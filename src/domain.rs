use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaxrefError;

/// Root of the taxonomy tree; every lineage starts here.
pub const ROOT_TAXON: TaxonId = TaxonId(1);
/// Viridiplantae.
pub const PLANTS: TaxonId = TaxonId(33090);
/// Vertebrata.
pub const VERTEBRATES: TaxonId = TaxonId(7742);

/// Numeric taxon identifier. Zero stands for "no taxon given".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonId(u32);

impl TaxonId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    pub fn is_root(self) -> bool {
        self == ROOT_TAXON
    }
}

impl From<u32> for TaxonId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = TaxrefError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| TaxrefError::InvalidTaxonId(value.to_string()))
    }
}

/// Root-first ancestor chain of a taxon, ending with the taxon itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lineage(Vec<TaxonId>);

impl Lineage {
    pub fn new(ids: Vec<TaxonId>) -> Self {
        Self(ids)
    }

    pub fn as_slice(&self) -> &[TaxonId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn terminal(&self) -> Option<TaxonId> {
        self.0.last().copied()
    }

    pub fn contains(&self, taxon: TaxonId) -> bool {
        self.0.contains(&taxon)
    }

    pub fn position(&self, taxon: TaxonId) -> Option<usize> {
        self.0.iter().position(|id| *id == taxon)
    }
}

impl From<Vec<u32>> for Lineage {
    fn from(ids: Vec<u32>) -> Self {
        Self(ids.into_iter().map(TaxonId).collect())
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.0.iter().map(ToString::to_string).collect::<Vec<_>>();
        write!(f, "{}", parts.join(";"))
    }
}

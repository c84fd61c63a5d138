use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Deserialize;

use crate::domain::{Lineage, TaxonId};
use crate::error::TaxrefError;

/// Walks deeper than this are treated as a cycle in the parent table.
const MAX_LINEAGE_DEPTH: usize = 1024;

/// Parent lookup over a local taxonomy table.
pub trait LineageStore: Send {
    /// `Ok(None)` means the store has no row for `taxon`.
    fn parent_of(&self, taxon: TaxonId) -> Result<Option<TaxonId>, TaxrefError>;
}

pub struct SqliteLineageStore {
    conn: Connection,
}

impl SqliteLineageStore {
    pub fn open(path: &Utf8Path) -> Result<Self, TaxrefError> {
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| TaxrefError::LineageDatabase(format!("open {path}: {err}")))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl LineageStore for SqliteLineageStore {
    fn parent_of(&self, taxon: TaxonId) -> Result<Option<TaxonId>, TaxrefError> {
        self.conn
            .query_row(
                "SELECT parent FROM TaxidInfo WHERE taxid = ?1",
                params![taxon.get()],
                |row| row.get::<_, u32>(0),
            )
            .optional()
            .map(|parent| parent.map(TaxonId::new))
            .map_err(|err| TaxrefError::LineageDatabase(err.to_string()))
    }
}

/// Follows parent pointers from `taxon` up to the root and returns the
/// root-first lineage.
pub fn walk_lineage(store: &dyn LineageStore, taxon: TaxonId) -> Result<Lineage, TaxrefError> {
    let mut ids = vec![taxon];
    let mut current = taxon;
    while !current.is_root() {
        if ids.len() > MAX_LINEAGE_DEPTH {
            return Err(TaxrefError::CorruptLineageStore {
                taxon,
                missing: current,
            });
        }
        current = store
            .parent_of(current)?
            .ok_or(TaxrefError::CorruptLineageStore {
                taxon,
                missing: current,
            })?;
        ids.push(current);
    }
    ids.reverse();
    Ok(Lineage::new(ids))
}

pub trait TaxonomyClient: Send + Sync {
    fn fetch_lineage(&self, taxon: TaxonId) -> Result<Lineage, TaxrefError>;
}

#[derive(Clone)]
pub struct TaxonomyHttpClient {
    client: Client,
    base_url: String,
}

impl TaxonomyHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TaxrefError> {
        let client = crate::repository::build_client(timeout)
            .map_err(|err| TaxrefError::TaxonomyHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl TaxonomyClient for TaxonomyHttpClient {
    fn fetch_lineage(&self, taxon: TaxonId) -> Result<Lineage, TaxrefError> {
        let url = format!("{}/{taxon}", self.base_url);
        tracing::debug!(%url, "querying taxonomy service");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| TaxrefError::TaxonomyHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "taxonomy request failed".to_string());
            return Err(TaxrefError::TaxonomyStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| TaxrefError::TaxonomyHttp(err.to_string()))?;
        parse_taxonomy_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct TaxonomyResponse {
    #[serde(default)]
    taxonomy_nodes: Vec<TaxonomyNode>,
}

#[derive(Debug, Deserialize)]
struct TaxonomyNode {
    taxonomy: Option<TaxonomyRecord>,
}

#[derive(Debug, Deserialize)]
struct TaxonomyRecord {
    tax_id: TaxonId,
    #[serde(default)]
    lineage: Vec<TaxonId>,
}

/// Extracts the lineage of the first node. The service omits the leaf from
/// `lineage`, so `tax_id` is appended.
pub fn parse_taxonomy_response(body: &str) -> Result<Lineage, TaxrefError> {
    let response: TaxonomyResponse =
        serde_json::from_str(body).map_err(|err| TaxrefError::TaxonomyParse(err.to_string()))?;
    let record = response
        .taxonomy_nodes
        .into_iter()
        .next()
        .and_then(|node| node.taxonomy)
        .ok_or_else(|| TaxrefError::TaxonomyParse("no taxonomy node in response".to_string()))?;
    let mut ids = record.lineage;
    ids.push(record.tax_id);
    Ok(Lineage::new(ids))
}

struct LineageState {
    store: Option<Box<dyn LineageStore>>,
    memo: HashMap<TaxonId, Lineage>,
}

/// Resolves and memoizes lineages for the lifetime of the resolver.
pub struct LineageResolver<C: TaxonomyClient> {
    client: C,
    state: Mutex<LineageState>,
}

impl<C: TaxonomyClient> LineageResolver<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: Mutex::new(LineageState {
                store: None,
                memo: HashMap::new(),
            }),
        }
    }

    pub fn with_store(self, store: Box<dyn LineageStore>) -> Self {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.store = Some(store);
        }
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Root-first lineage of `taxon`; empty when `taxon` is unset.
    pub fn resolve(&self, taxon: TaxonId) -> Result<Lineage, TaxrefError> {
        if taxon.is_unset() {
            tracing::debug!("no taxon given, lineage is empty");
            return Ok(Lineage::default());
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lineage) = state.memo.get(&taxon) {
            return Ok(lineage.clone());
        }

        let lineage = match state.store.as_deref() {
            Some(store) => match walk_lineage(store, taxon) {
                Ok(lineage) => lineage,
                Err(
                    err @ (TaxrefError::CorruptLineageStore { .. }
                    | TaxrefError::LineageDatabase(_)),
                ) => {
                    tracing::warn!(%taxon, "local lineage lookup failed ({err}), asking taxonomy service");
                    self.client.fetch_lineage(taxon)?
                }
                Err(err) => return Err(err),
            },
            None => self.client.fetch_lineage(taxon)?,
        };

        tracing::debug!(%taxon, %lineage, "resolved lineage");
        Ok(state.memo.entry(taxon).or_insert(lineage).clone())
    }

    /// Like [`resolve`](Self::resolve) but an unset taxon is an error.
    pub fn require(&self, taxon: TaxonId) -> Result<Lineage, TaxrefError> {
        let lineage = self.resolve(taxon)?;
        if lineage.is_empty() {
            return Err(TaxrefError::LineageUnavailable(taxon));
        }
        Ok(lineage)
    }
}

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::config::RepositorySettings;
use crate::error::TaxrefError;
use crate::repository::RepositoryClient;
use crate::store::Store;

/// Subsystem → version map of one data release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    versions: HashMap<String, String>,
    entries: Vec<String>,
}

impl Manifest {
    /// Parses `subsystem/version` lines. Blank lines, `#` comments and lines
    /// that do not split into exactly two parts are dropped.
    pub fn parse(text: &str) -> Self {
        let mut manifest = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts = line.split('/').collect::<Vec<_>>();
            if let [subsystem, version] = parts.as_slice() {
                manifest
                    .versions
                    .insert(subsystem.to_string(), version.to_string());
                manifest.entries.push(line.to_string());
            }
        }
        manifest
    }

    pub fn version(&self, subsystem: &str) -> Option<&str> {
        self.versions.get(subsystem).map(String::as_str)
    }

    /// Accepted lines in file order, as persisted to the local cache.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn versioned_path(&self, subsystem: &str, filename: &str) -> String {
        match self.version(subsystem) {
            Some(version) => format!("{subsystem}/{version}/{filename}"),
            None => format!("{subsystem}/{filename}"),
        }
    }
}

/// Where a resource can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum ResourceLocation {
    Local(Utf8PathBuf),
    Remote(String),
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLocation::Local(path) => write!(f, "{path}"),
            ResourceLocation::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Maps logical `(subsystem, filename)` pairs to version-qualified paths.
///
/// The manifest is loaded on first use and kept for the lifetime of this
/// object; concurrent first callers wait on the same load.
pub struct VersionedPaths<R: RepositoryClient> {
    settings: RepositorySettings,
    store: Store,
    client: R,
    manifest: Mutex<Option<Arc<Manifest>>>,
}

impl<R: RepositoryClient> VersionedPaths<R> {
    pub fn new(settings: RepositorySettings, store: Store, client: R) -> Self {
        Self {
            settings,
            store,
            client,
            manifest: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &R {
        &self.client
    }

    pub fn manifest(&self) -> Result<Arc<Manifest>, TaxrefError> {
        let mut guard = self
            .manifest
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(manifest) = guard.as_ref() {
            return Ok(Arc::clone(manifest));
        }
        let manifest = Arc::new(self.load_manifest()?);
        *guard = Some(Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Fetches the manifest from the remote repository, bypassing any local copy.
    pub fn fetch_remote_manifest(&self) -> Result<Manifest, TaxrefError> {
        let name = self.settings.manifest_name();
        let text = self
            .client
            .fetch_text(&name)
            .map_err(|err| TaxrefError::ManifestUnavailable(format!("{name}: {err}")))?;
        Ok(Manifest::parse(&text))
    }

    pub fn resolve(&self, subsystem: &str, filename: &str) -> Result<String, TaxrefError> {
        Ok(self.manifest()?.versioned_path(subsystem, filename))
    }

    /// Local cache path when the resource is mirrored, remote URL otherwise.
    pub fn locate(&self, subsystem: &str, filename: &str) -> Result<ResourceLocation, TaxrefError> {
        let logical = self.resolve(subsystem, filename)?;
        Ok(match self.store.existing_path(&logical) {
            Some(path) => ResourceLocation::Local(path),
            None => ResourceLocation::Remote(self.settings.url_for(&logical)),
        })
    }

    pub fn read_text(&self, subsystem: &str, filename: &str) -> Result<String, TaxrefError> {
        let logical = self.resolve(subsystem, filename)?;
        match self.store.existing_path(&logical) {
            Some(path) => fs::read_to_string(path.as_std_path())
                .map_err(|err| TaxrefError::Filesystem(format!("read {path}: {err}"))),
            None => self.client.fetch_text(&logical),
        }
    }

    fn load_manifest(&self) -> Result<Manifest, TaxrefError> {
        let name = self.settings.manifest_name();
        if let Some(path) = self.store.manifest_path(&name) {
            if path.as_std_path().is_file() {
                tracing::debug!(%path, "using cached manifest");
                let text = fs::read_to_string(path.as_std_path())
                    .map_err(|err| TaxrefError::Filesystem(format!("read {path}: {err}")))?;
                return Ok(Manifest::parse(&text));
            }
        }

        let manifest = self.fetch_remote_manifest()?;
        tracing::info!(entries = manifest.entries().len(), "fetched manifest {name}");
        if let Some(path) = self.store.manifest_path(&name) {
            Store::write_lines(&path, manifest.entries())?;
        }
        Ok(manifest)
    }
}

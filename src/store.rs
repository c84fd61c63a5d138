use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::error::TaxrefError;

/// Local mirror of the support-data repository.
///
/// The cache root is optional: without one every resource resolves to its
/// remote location. A configured root only counts as active once it exists
/// on disk.
#[derive(Debug, Clone, Default)]
pub struct Store {
    cache_root: Option<Utf8PathBuf>,
}

impl Store {
    pub fn new(cache_root: Option<Utf8PathBuf>) -> Self {
        Self { cache_root }
    }

    pub fn default_cache_root() -> Result<Utf8PathBuf, TaxrefError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("taxref")).ok()
            })
            .ok_or_else(|| TaxrefError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn cache_root(&self) -> Option<&Utf8Path> {
        self.cache_root.as_deref()
    }

    pub fn active_root(&self) -> Option<&Utf8Path> {
        self.cache_root
            .as_deref()
            .filter(|root| root.as_std_path().is_dir())
    }

    pub fn manifest_path(&self, manifest_name: &str) -> Option<Utf8PathBuf> {
        self.cache_root.as_ref().map(|root| root.join(manifest_name))
    }

    /// Local path of a logical repository path, if it exists under the active root.
    pub fn existing_path(&self, logical: &str) -> Option<Utf8PathBuf> {
        let root = self.active_root()?;
        let path = root.join(logical);
        path.as_std_path().exists().then_some(path)
    }

    pub fn ensure_cache_root(&self) -> Result<&Utf8Path, TaxrefError> {
        let root = self
            .cache_root
            .as_deref()
            .ok_or_else(|| TaxrefError::Filesystem("local cache not set".to_string()))?;
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
        Ok(root)
    }

    pub fn write_lines(path: &Utf8Path, lines: &[String]) -> Result<(), TaxrefError> {
        let mut content = String::new();
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        Self::write_bytes_atomic(path, content.as_bytes())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TaxrefError> {
        let parent = path
            .parent()
            .ok_or_else(|| TaxrefError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("taxref-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(&mut temp, content)
            .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

use std::path::PathBuf;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::config::Settings;
use crate::domain::{Lineage, TaxonId};
use crate::error::TaxrefError;
use crate::manifest::ResourceLocation;
use crate::merge;
use crate::mirror::{MirrorSession, MirrorSynchronizer, SyncReport};
use crate::params;
use crate::repository::RepositoryClient;
use crate::resources::{IntronLimits, ReferenceChoice, ResourceResolver};
use crate::store::Store;
use crate::taxonomy::TaxonomyClient;

#[derive(Debug, Clone, Serialize)]
pub struct LineageResult {
    pub taxon: TaxonId,
    pub lineage: Lineage,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosestResult {
    pub taxon: TaxonId,
    pub proteins: Option<ReferenceChoice>,
    pub hmm: Option<ReferenceChoice>,
    pub intron: IntronLimits,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub subsystem: String,
    pub filename: String,
    pub versioned: String,
    pub location: ResourceLocation,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrefetchEntry {
    pub entry: String,
    pub local_path: String,
    pub report: SyncReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrefetchResult {
    pub cache_root: String,
    pub manifest_path: Option<String>,
    pub dry_run: bool,
    pub entries: Vec<PrefetchEntry>,
}

#[derive(Debug, Clone)]
pub struct PrefetchOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ParamsOptions {
    pub input: Utf8PathBuf,
    pub defaults: Option<Utf8PathBuf>,
    pub output: Option<Utf8PathBuf>,
    /// Directory relative input paths are resolved against.
    pub base_dir: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamsResult {
    pub output: String,
    pub params_file: Option<String>,
    pub params: Value,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<R: RepositoryClient, C: TaxonomyClient> {
    settings: Settings,
    resolver: ResourceResolver<R, C>,
}

impl<R: RepositoryClient, C: TaxonomyClient> App<R, C> {
    pub fn new(settings: Settings, resolver: ResourceResolver<R, C>) -> Self {
        Self { settings, resolver }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &ResourceResolver<R, C> {
        &self.resolver
    }

    fn store(&self) -> &Store {
        self.resolver.paths().store()
    }

    pub fn lineage(&self, taxon: TaxonId, sink: &dyn ProgressSink) -> Result<LineageResult, TaxrefError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; lineage of {taxon}"),
            elapsed: None,
        });
        let lineage = self.resolver.lineages().require(taxon)?;
        Ok(LineageResult {
            taxon,
            depth: lineage.len(),
            lineage,
        })
    }

    pub fn closest(&self, taxon: TaxonId, sink: &dyn ProgressSink) -> Result<ClosestResult, TaxrefError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; matching references for {taxon}"),
            elapsed: None,
        });
        let proteins = self.resolver.closest_protein_set(taxon)?;
        let hmm = self.resolver.closest_hmm(taxon)?;
        let intron = self.resolver.max_intron(taxon)?;
        sink.event(ProgressEvent {
            message: "phase=Done; references matched".to_string(),
            elapsed: Some(started.elapsed()),
        });
        Ok(ClosestResult {
            taxon,
            proteins,
            hmm,
            intron,
        })
    }

    pub fn path(&self, subsystem: &str, filename: &str) -> Result<PathResult, TaxrefError> {
        let paths = self.resolver.paths();
        Ok(PathResult {
            subsystem: subsystem.to_string(),
            filename: filename.to_string(),
            versioned: paths.resolve(subsystem, filename)?,
            location: paths.locate(subsystem, filename)?,
        })
    }

    /// Mirrors every manifest entry into the cache root, one fresh session per
    /// entry, then persists the manifest next to the mirrored trees.
    pub fn prefetch<S, F>(
        &self,
        mut connect: F,
        options: PrefetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PrefetchResult, TaxrefError>
    where
        S: MirrorSession,
        F: FnMut() -> Result<S, TaxrefError>,
    {
        let cache_root = match self.store().cache_root() {
            Some(root) => root.to_path_buf(),
            None => return Err(TaxrefError::MissingParameter("local_cache".to_string())),
        };
        let paths = self.resolver.paths();
        let manifest = paths.fetch_remote_manifest()?;
        if manifest.is_empty() {
            return Err(TaxrefError::ManifestUnavailable(format!(
                "{} lists no entries",
                paths.settings().manifest_name()
            )));
        }

        let mut entries = Vec::new();
        if options.dry_run {
            for entry in manifest.entries() {
                entries.push(PrefetchEntry {
                    entry: entry.clone(),
                    local_path: cache_root.join(entry).to_string(),
                    report: SyncReport::default(),
                });
            }
            return Ok(PrefetchResult {
                cache_root: cache_root.to_string(),
                manifest_path: None,
                dry_run: true,
                entries,
            });
        }

        self.store().ensure_cache_root()?;
        for entry in manifest.entries() {
            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Download; {entry}"),
                elapsed: None,
            });
            let local = cache_root.join(entry);
            let session = connect()?;
            let mut synchronizer = MirrorSynchronizer::new(session, self.settings.retry);
            let report = synchronizer.sync_tree(
                &paths.settings().ftp_path_for(entry),
                local.as_std_path(),
            )?;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Done; {entry}: {} downloaded, {} up to date, {} skipped",
                    report.downloaded,
                    report.up_to_date,
                    report.skipped.len()
                ),
                elapsed: Some(started.elapsed()),
            });
            entries.push(PrefetchEntry {
                entry: entry.clone(),
                local_path: local.to_string(),
                report,
            });
        }

        let manifest_path = paths.store().manifest_path(&paths.settings().manifest_name());
        if let Some(path) = &manifest_path {
            Store::write_lines(path, manifest.entries())?;
        }
        Ok(PrefetchResult {
            cache_root: cache_root.to_string(),
            manifest_path: manifest_path.map(|path| path.to_string()),
            dry_run: false,
            entries,
        })
    }

    /// Builds the run parameter tree: inputs are repackaged, expanded with the
    /// closest references, made absolute and merged over the defaults.
    pub fn prepare_params(
        &self,
        options: ParamsOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ParamsResult, TaxrefError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading {}", options.input),
            elapsed: None,
        });
        let defaults = match &options.defaults {
            Some(path) => params::load_yaml(path)?,
            None => Value::Mapping(Mapping::new()),
        };
        let mut run = params::repackage_inputs(params::load_yaml(&options.input)?)?;
        self.resolver
            .expand_inputs(params::input_section_mut(&mut run)?)?;

        if let Some(output) = &options.output {
            run.insert("output".into(), output.as_str().into());
        }
        params::absolutize_paths(&mut run, &options.base_dir)?;
        params::prepare_reads(&mut run, !options.dry_run)?;

        let merged = merge::merge(&defaults, &Value::Mapping(run))?;
        let Value::Mapping(mut merged) = merged else {
            return Err(TaxrefError::ParamsParse(
                "default parameters must be a mapping".to_string(),
            ));
        };
        let output = match merged.shift_remove("output") {
            Some(Value::String(output)) => output,
            Some(_) => {
                return Err(TaxrefError::ParamsParse(
                    "output must be a path".to_string(),
                ));
            }
            None => return Err(TaxrefError::MissingParameter("output".to_string())),
        };
        let params = Value::Mapping(merged);

        let params_file = if options.dry_run {
            None
        } else {
            let path = params::write_params_file(Utf8Path::new(&output), &params)?;
            tracing::info!(%path, "wrote run parameters");
            Some(path.to_string())
        };
        Ok(ParamsResult {
            output,
            params_file,
            params,
        })
    }
}

/// Current directory, used as the base for relative input paths.
pub fn current_dir() -> Result<PathBuf, TaxrefError> {
    std::env::current_dir().map_err(|err| TaxrefError::Filesystem(err.to_string()))
}

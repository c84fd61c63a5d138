use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use taxref::app::{App, ParamsOptions, PrefetchOptions};
use taxref::config::{Settings, SettingsLoader};
use taxref::domain::TaxonId;
use taxref::error::TaxrefError;
use taxref::manifest::VersionedPaths;
use taxref::mirror::FtpSession;
use taxref::output::{JsonOutput, OutputMode, TextOutput};
use taxref::repository::RepositoryHttpClient;
use taxref::resources::{ResourceResolver, local_lineage_store};
use taxref::store::Store;
use taxref::summary;
use taxref::taxonomy::{LineageResolver, TaxonomyHttpClient};

type HttpApp = App<RepositoryHttpClient, TaxonomyHttpClient>;

#[derive(Parser)]
#[command(name = "taxref")]
#[command(about = "Resolve closest-reference annotation resources for a taxon and mirror the support data")]
#[command(version, author)]
struct Cli {
    /// Settings file (defaults to ./taxref.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Local mirror of the support-data repository.
    #[arg(long, global = true)]
    local_cache: Option<Utf8PathBuf>,

    /// Use the per-user cache directory (~/.cache/taxref) as local cache.
    #[arg(long, global = true, conflicts_with = "local_cache")]
    default_cache: bool,

    /// Data release to use.
    #[arg(long, global = true)]
    data_version: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the root-to-leaf lineage of a taxon")]
    Lineage(TaxonArgs),
    #[command(about = "Show the closest protein set, HMM parameters and intron limits")]
    Closest(TaxonArgs),
    #[command(about = "Resolve a versioned repository path")]
    Path(PathArgs),
    #[command(about = "Mirror the support-data repository into the local cache")]
    Prefetch(PrefetchArgs),
    #[command(about = "Expand run inputs and write the merged run parameters")]
    Params(ParamsArgs),
    #[command(about = "Count annotated features by type in a finished run")]
    Summary(SummaryArgs),
}

#[derive(Args)]
struct TaxonArgs {
    taxid: String,
}

#[derive(Args)]
struct PathArgs {
    subsystem: String,
    filename: String,
}

#[derive(Args)]
struct PrefetchArgs {
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ParamsArgs {
    /// YAML file with run inputs.
    input: Utf8PathBuf,

    /// Output directory; overrides `output` from the input file.
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,

    /// YAML file with default task parameters.
    #[arg(long)]
    defaults: Option<Utf8PathBuf>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct SummaryArgs {
    /// Output directory of the run.
    output: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TaxrefError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TaxrefError) -> u8 {
    match error {
        TaxrefError::LineageUnavailable(_) | TaxrefError::NoProteins(_) => 2,
        TaxrefError::TaxonomyHttp(_)
        | TaxrefError::TaxonomyStatus { .. }
        | TaxrefError::RepositoryHttp(_)
        | TaxrefError::RepositoryStatus { .. }
        | TaxrefError::ManifestUnavailable(_)
        | TaxrefError::FtpConnect { .. }
        | TaxrefError::Listing { .. }
        | TaxrefError::Transfer { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let mut settings = SettingsLoader::resolve(cli.config.as_deref())?;
    if let Some(cache) = cli.local_cache {
        settings.local_cache = Some(cache);
    } else if cli.default_cache {
        settings.local_cache = Some(Store::default_cache_root()?);
    }
    if let Some(version) = cli.data_version {
        settings.repository.data_version = version;
    }

    match cli.command {
        Commands::Lineage(args) => {
            let taxon = args.taxid.parse::<TaxonId>()?;
            let app = build_app(&settings)?;
            match output_mode {
                OutputMode::Json => {
                    let result = app.lineage(taxon, &JsonOutput)?;
                    JsonOutput::print_lineage(&result).into_diagnostic()
                }
                OutputMode::Text => {
                    let result = app.lineage(taxon, &TextOutput)?;
                    TextOutput::print_lineage(&result).into_diagnostic()
                }
            }
        }
        Commands::Closest(args) => {
            let taxon = args.taxid.parse::<TaxonId>()?;
            let app = build_app(&settings)?;
            match output_mode {
                OutputMode::Json => {
                    let result = app.closest(taxon, &JsonOutput)?;
                    JsonOutput::print_closest(&result).into_diagnostic()
                }
                OutputMode::Text => {
                    let result = app.closest(taxon, &TextOutput)?;
                    TextOutput::print_closest(&result).into_diagnostic()
                }
            }
        }
        Commands::Path(args) => {
            let app = build_app(&settings)?;
            let result = app.path(&args.subsystem, &args.filename)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_path(&result).into_diagnostic(),
                OutputMode::Text => TextOutput::print_path(&result).into_diagnostic(),
            }
        }
        Commands::Prefetch(args) => run_prefetch(args, &settings, output_mode),
        Commands::Params(args) => run_params(args, &settings, output_mode),
        Commands::Summary(args) => {
            let result = summary::summarize(&args.output)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_summary(&result).into_diagnostic(),
                OutputMode::Text => TextOutput::print_summary(&result).into_diagnostic(),
            }
        }
    }
}

fn build_app(settings: &Settings) -> Result<HttpApp, TaxrefError> {
    let store = Store::new(settings.local_cache.clone());
    let repository =
        RepositoryHttpClient::new(&settings.repository.https_root, settings.http_timeout)?;
    let paths = VersionedPaths::new(settings.repository.clone(), store, repository);
    let taxonomy = TaxonomyHttpClient::new(&settings.taxonomy_url, settings.http_timeout)?;
    let mut lineages = LineageResolver::new(taxonomy);
    if let Some(local) = local_lineage_store(&paths)? {
        lineages = lineages.with_store(Box::new(local));
    }
    Ok(App::new(settings.clone(), ResourceResolver::new(paths, lineages)))
}

fn run_prefetch(
    args: PrefetchArgs,
    settings: &Settings,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if settings.local_cache.is_none() {
        return Err(miette::Report::msg(
            "local cache not set (use --local-cache, --default-cache or TAXREF_LOCAL_CACHE)",
        ));
    }
    // The mirror is rebuilt from the remote manifest, so no local lineage store.
    let store = Store::new(settings.local_cache.clone());
    let repository =
        RepositoryHttpClient::new(&settings.repository.https_root, settings.http_timeout)?;
    let paths = VersionedPaths::new(settings.repository.clone(), store, repository);
    let taxonomy = TaxonomyHttpClient::new(&settings.taxonomy_url, settings.http_timeout)?;
    let app = App::new(
        settings.clone(),
        ResourceResolver::new(paths, LineageResolver::new(taxonomy)),
    );

    let host = settings.repository.ftp_host.clone();
    let connect = move || FtpSession::connect(&host);
    let options = PrefetchOptions {
        dry_run: args.dry_run,
    };
    match output_mode {
        OutputMode::Json => {
            let result = app.prefetch(connect, options, &JsonOutput)?;
            JsonOutput::print_prefetch(&result).into_diagnostic()
        }
        OutputMode::Text => {
            let result = app.prefetch(connect, options, &TextOutput)?;
            TextOutput::print_prefetch(&result).into_diagnostic()
        }
    }
}

fn run_params(args: ParamsArgs, settings: &Settings, output_mode: OutputMode) -> miette::Result<()> {
    let app = build_app(settings)?;
    let options = ParamsOptions {
        input: args.input,
        defaults: args.defaults,
        output: args.output,
        base_dir: taxref::app::current_dir()?,
        dry_run: args.dry_run,
    };
    match output_mode {
        OutputMode::Json => {
            let result = app.prepare_params(options, &JsonOutput)?;
            JsonOutput::print_params(&result).into_diagnostic()
        }
        OutputMode::Text => {
            let result = app.prepare_params(options, &TextOutput)?;
            TextOutput::print_params(&result).into_diagnostic()
        }
    }
}

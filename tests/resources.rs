use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_yaml::{Mapping, Value};

use taxref::config::RepositorySettings;
use taxref::domain::{Lineage, TaxonId};
use taxref::error::TaxrefError;
use taxref::manifest::{ResourceLocation, VersionedPaths};
use taxref::repository::RepositoryClient;
use taxref::resources::{IntronLimits, ResourceResolver, local_lineage_store};
use taxref::selector::Selection;
use taxref::store::Store;
use taxref::taxonomy::{LineageResolver, TaxonomyClient};

const SUPPORT_DATA: &str = "https://ftp.ncbi.nlm.nih.gov/genomes/TOOLS/EGAP/support_data";

#[derive(Default)]
struct MockRepository {
    files: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MockRepository {
    fn standard() -> Self {
        let mut files = HashMap::new();
        files.insert(
            "current.mft".to_string(),
            "gnomon/3.0\ntarget_proteins/2\ntaxonomy/1\n".to_string(),
        );
        files.insert(
            "target_proteins/2/taxid.list".to_string(),
            "7742\tVertebrata\n33090\tViridiplantae\n9606\tHomo sapiens\n".to_string(),
        );
        files.insert(
            "gnomon/3.0/hmm_parameters/taxid.list".to_string(),
            "9606\t1; 131567; 2759; 7742; 9605;\n3702\t1; 131567; 2759; 33090; 3701;\n"
                .to_string(),
        );
        Self {
            files,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_for(&self, logical: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == logical)
            .count()
    }
}

impl RepositoryClient for MockRepository {
    fn fetch_text(&self, logical: &str) -> Result<String, TaxrefError> {
        self.calls.lock().unwrap().push(logical.to_string());
        self.files
            .get(logical)
            .cloned()
            .ok_or_else(|| TaxrefError::RepositoryStatus {
                status: 404,
                message: logical.to_string(),
            })
    }
}

#[derive(Default)]
struct MockTaxonomy {
    lineages: HashMap<u32, Vec<u32>>,
    calls: Mutex<usize>,
}

impl MockTaxonomy {
    fn standard() -> Self {
        let mut lineages = HashMap::new();
        lineages.insert(9598, vec![1, 131567, 2759, 7742, 9604, 9605, 9598]);
        lineages.insert(9606, vec![1, 131567, 2759, 7742, 9604, 9605, 9606]);
        lineages.insert(3702, vec![1, 131567, 2759, 33090, 3701, 3702]);
        lineages.insert(562, vec![1, 131567, 2, 1224, 562]);
        Self {
            lineages,
            calls: Mutex::new(0),
        }
    }
}

impl TaxonomyClient for MockTaxonomy {
    fn fetch_lineage(&self, taxon: TaxonId) -> Result<Lineage, TaxrefError> {
        *self.calls.lock().unwrap() += 1;
        self.lineages
            .get(&taxon.get())
            .map(|ids| Lineage::from(ids.clone()))
            .ok_or(TaxrefError::LineageUnavailable(taxon))
    }
}

fn resolver(cache: Option<Utf8PathBuf>) -> ResourceResolver<MockRepository, MockTaxonomy> {
    let paths = VersionedPaths::new(
        RepositorySettings::default(),
        Store::new(cache),
        MockRepository::standard(),
    );
    ResourceResolver::new(paths, LineageResolver::new(MockTaxonomy::standard()))
}

fn inputs(yaml: &str) -> Mapping {
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
fn closest_protein_set_prefers_deepest_ancestor() {
    let resolver = resolver(None);

    let chimp = resolver.closest_protein_set(TaxonId::new(9598)).unwrap().unwrap();
    assert_eq!(chimp.taxon, TaxonId::new(7742));
    assert_eq!(
        chimp.location,
        ResourceLocation::Remote(format!("{SUPPORT_DATA}/target_proteins/2/7742.faa.gz"))
    );

    let human = resolver.closest_protein_set(TaxonId::new(9606)).unwrap().unwrap();
    assert_eq!(human.taxon, TaxonId::new(9606));

    assert!(resolver.closest_protein_set(TaxonId::new(562)).unwrap().is_none());
    assert!(resolver.closest_protein_set(TaxonId::new(0)).unwrap().is_none());
}

#[test]
fn closest_hmm_uses_prefix_overlap() {
    let resolver = resolver(None);

    assert_eq!(
        resolver.select_hmm(TaxonId::new(9598)).unwrap(),
        Selection::Match {
            taxon: TaxonId::new(9606),
            score: 3
        }
    );
    let plant = resolver.closest_hmm(TaxonId::new(3702)).unwrap().unwrap();
    assert_eq!(plant.taxon, TaxonId::new(3702));
    assert_eq!(
        plant.location.to_string(),
        format!("{SUPPORT_DATA}/gnomon/3.0/hmm_parameters/3702.params")
    );
}

#[test]
fn max_intron_by_clade() {
    let resolver = resolver(None);
    assert_eq!(resolver.max_intron(TaxonId::new(3702)).unwrap().max_intron, 300_000);
    assert_eq!(
        resolver.max_intron(TaxonId::new(9606)).unwrap().genome_size_threshold,
        2_000_000_000
    );
    assert_eq!(resolver.max_intron(TaxonId::new(562)).unwrap().max_intron, 600_000);
    assert_eq!(resolver.max_intron(TaxonId::new(0)).unwrap(), IntronLimits::UNSET);
}

#[test]
fn manifest_is_fetched_once() {
    let resolver = resolver(None);
    resolver.closest_protein_set(TaxonId::new(9598)).unwrap();
    resolver.closest_protein_set(TaxonId::new(9606)).unwrap();
    resolver.max_intron(TaxonId::new(9598)).unwrap();

    let repository = resolver.paths().client();
    assert_eq!(repository.calls_for("current.mft"), 1);
    // Catalogs are read per lookup; only the manifest is cached.
    assert_eq!(repository.calls_for("target_proteins/2/taxid.list"), 2);
    assert_eq!(*resolver.lineages().client().calls.lock().unwrap(), 2);
}

#[test]
fn manifest_is_persisted_and_reused_from_cache() {
    let temp = tempfile::tempdir().unwrap();
    let cache = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

    let first = resolver(Some(cache.clone()));
    assert_eq!(
        first.paths().resolve("gnomon", "hmm_parameters/taxid.list").unwrap(),
        "gnomon/3.0/hmm_parameters/taxid.list"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("current.mft")).unwrap(),
        "gnomon/3.0\ntarget_proteins/2\ntaxonomy/1\n"
    );

    let second = resolver(Some(cache));
    assert_eq!(second.paths().resolve("taxonomy", "db").unwrap(), "taxonomy/1/db");
    assert_eq!(second.paths().client().calls_for("current.mft"), 0);
}

#[test]
fn mirrored_files_are_located_locally() {
    let temp = tempfile::tempdir().unwrap();
    let cache = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let proteins = temp.path().join("target_proteins/2");
    fs::create_dir_all(&proteins).unwrap();
    fs::write(proteins.join("taxid.list"), "9606\n").unwrap();
    fs::write(proteins.join("9606.faa.gz"), b"").unwrap();

    let resolver = resolver(Some(cache.clone()));
    let choice = resolver.closest_protein_set(TaxonId::new(9598)).unwrap();
    // The local catalog only lists 9606, which is not an ancestor of 9598.
    assert!(choice.is_none());

    let human = resolver.closest_protein_set(TaxonId::new(9606)).unwrap().unwrap();
    assert_eq!(
        human.location,
        ResourceLocation::Local(cache.join("target_proteins/2/9606.faa.gz"))
    );
    assert_eq!(
        resolver.paths().client().calls_for("target_proteins/2/taxid.list"),
        0
    );
}

#[test]
fn missing_local_taxonomy_database_is_not_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let cache = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let resolver = resolver(Some(cache));
    assert!(local_lineage_store(resolver.paths()).unwrap().is_none());

    let uncached = resolver_paths_without_cache();
    assert!(local_lineage_store(&uncached).unwrap().is_none());
    assert!(uncached.client().calls.lock().unwrap().is_empty());
}

fn resolver_paths_without_cache() -> VersionedPaths<MockRepository> {
    VersionedPaths::new(
        RepositorySettings::default(),
        Store::new(None),
        MockRepository::standard(),
    )
}

#[test]
fn expand_fills_references_and_limits() {
    let resolver = resolver(None);
    let mut run = inputs("taxid: 9598\ngenome: g.fa\nreads: [r1.fq]\n");
    resolver.expand_inputs(&mut run).unwrap();

    assert_eq!(
        run.get("proteins"),
        Some(&Value::from(format!("{SUPPORT_DATA}/target_proteins/2/7742.faa.gz")))
    );
    assert_eq!(
        run.get("hmm"),
        Some(&Value::from(format!("{SUPPORT_DATA}/gnomon/3.0/hmm_parameters/9606.params")))
    );
    assert_eq!(run.get("hmm_taxid").and_then(Value::as_u64), Some(9606));
    assert_eq!(run.get("max_intron").and_then(Value::as_u64), Some(1_200_000));
    assert_eq!(
        run.get("genome_size_threshold").and_then(Value::as_u64),
        Some(2_000_000_000)
    );
}

#[test]
fn expand_keeps_explicit_values() {
    let resolver = resolver(None);
    let mut run = inputs(
        "taxid: '3702'\ngenome: g.fa\nproteins: my.faa\nhmm: my.params\nmax_intron: 5000\n",
    );
    resolver.expand_inputs(&mut run).unwrap();

    assert_eq!(run.get("proteins"), Some(&Value::from("my.faa")));
    assert_eq!(run.get("hmm"), Some(&Value::from("my.params")));
    assert_eq!(run.get("hmm_taxid").and_then(Value::as_u64), Some(3702));
    assert_eq!(run.get("max_intron").and_then(Value::as_u64), Some(5000));
    assert_eq!(run.get("genome_size_threshold").and_then(Value::as_u64), Some(0));
}

#[test]
fn expand_requires_taxid_and_genome() {
    let resolver = resolver(None);
    let err = resolver.expand_inputs(&mut inputs("genome: g.fa\n")).unwrap_err();
    assert_matches!(err, TaxrefError::MissingParameter(key) if key == "taxid");

    let err = resolver.expand_inputs(&mut inputs("taxid: 9606\n")).unwrap_err();
    assert_matches!(err, TaxrefError::MissingParameter(key) if key == "genome");

    let err = resolver
        .expand_inputs(&mut inputs("taxid: human\ngenome: g.fa\n"))
        .unwrap_err();
    assert_matches!(err, TaxrefError::InvalidTaxonId(_));
}

#[test]
fn no_matching_proteins_fails_only_without_rnaseq() {
    let resolver = resolver(None);

    let err = resolver
        .expand_inputs(&mut inputs("taxid: 562\ngenome: g.fa\n"))
        .unwrap_err();
    assert_matches!(err, TaxrefError::NoProteins(taxon) if taxon == TaxonId::new(562));

    let mut run = inputs("taxid: 562\ngenome: g.fa\nreads_query: 'txid562[organism]'\n");
    resolver.expand_inputs(&mut run).unwrap();
    assert_eq!(run.get("proteins"), Some(&Value::from("")));
    assert_eq!(run.get("max_intron").and_then(Value::as_u64), Some(600_000));
}

#[test]
fn empty_proteins_without_reads_is_no_evidence() {
    let resolver = resolver(None);
    let err = resolver
        .expand_inputs(&mut inputs("taxid: 9606\ngenome: g.fa\nproteins: ''\n"))
        .unwrap_err();
    assert_matches!(err, TaxrefError::NoEvidence);

    // Proteins without reads is allowed with a warning.
    let mut run = inputs("taxid: 9606\ngenome: g.fa\n");
    resolver.expand_inputs(&mut run).unwrap();
    assert!(run.get("proteins").and_then(Value::as_str).is_some_and(|p| !p.is_empty()));
}

use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::error::TaxrefError;
use crate::store::Store;

/// Input keys whose values name files.
pub const PATH_INPUTS: [&str; 9] = [
    "genome",
    "hmm",
    "softmask",
    "reads_metadata",
    "organelles",
    "proteins",
    "reads",
    "rnaseq_alignments",
    "protein_alignments",
];

const URL_PATTERN: &str = r"^[a-z0-9]{2,5}://";
const SRA_RUN_PATTERN: &str = r"^[DES]RR[0-9]+$";

pub fn load_yaml(path: &Utf8Path) -> Result<Value, TaxrefError> {
    let text = fs::read_to_string(path)
        .map_err(|err| TaxrefError::Filesystem(format!("{path}: {err}")))?;
    parse_yaml(&text)
}

pub fn parse_yaml(text: &str) -> Result<Value, TaxrefError> {
    let value: Value =
        serde_yaml::from_str(text).map_err(|err| TaxrefError::ParamsParse(err.to_string()))?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Moves run inputs under an `input` key. `tasks` and `output` stay at the
/// top level; a document that already has `input` is returned as is.
pub fn repackage_inputs(document: Value) -> Result<Mapping, TaxrefError> {
    let Value::Mapping(document) = document else {
        return Err(TaxrefError::ParamsParse(
            "run parameters must be a mapping".to_string(),
        ));
    };
    if document.contains_key("input") {
        return Ok(document);
    }
    let mut packaged = Mapping::new();
    let mut input = Mapping::new();
    for (key, value) in document {
        match key.as_str() {
            Some("tasks" | "output") => {
                packaged.insert(key, value);
            }
            _ => {
                input.insert(key, value);
            }
        }
    }
    packaged.insert("input".into(), Value::Mapping(input));
    Ok(packaged)
}

pub fn input_section(run: &Mapping) -> Result<&Mapping, TaxrefError> {
    run.get("input")
        .and_then(Value::as_mapping)
        .ok_or_else(|| TaxrefError::MissingParameter("input".to_string()))
}

pub fn input_section_mut(run: &mut Mapping) -> Result<&mut Mapping, TaxrefError> {
    run.get_mut("input")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| TaxrefError::MissingParameter("input".to_string()))
}

/// Rewrites path-valued inputs and `output` to absolute paths relative to
/// `base`. Empty strings, URLs and paths that do not exist are left alone.
pub fn absolutize_paths(run: &mut Mapping, base: &Path) -> Result<(), TaxrefError> {
    let url = compile(URL_PATTERN)?;
    if let Some(input) = run.get_mut("input").and_then(Value::as_mapping_mut) {
        for (key, value) in input.iter_mut() {
            if key.as_str().is_some_and(|key| PATH_INPUTS.contains(&key)) {
                absolutize_value(value, base, &url);
            }
        }
    }
    if let Some(output) = run.get_mut("output") {
        absolutize_value(output, base, &url);
    }
    Ok(())
}

fn absolutize_value(value: &mut Value, base: &Path, url: &Regex) {
    match value {
        Value::Mapping(map) => {
            for (_, nested) in map.iter_mut() {
                absolutize_value(nested, base, url);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                absolutize_value(item, base, url);
            }
        }
        Value::String(text) => {
            if text.is_empty() || url.is_match(text.as_str()) {
                return;
            }
            let candidate = base.join(text.as_str());
            if candidate.exists() {
                *text = candidate.to_string_lossy().into_owned();
            }
        }
        _ => {}
    }
}

/// One sequencing sample and its read files.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSample {
    pub id: String,
    pub files: Vec<Value>,
}

/// Reshapes `input.reads` into the `[sample, [files]]` layout.
///
/// A plain string becomes `reads_query`, and so does a list of bare run
/// accessions (joined into an Entrez `[Accession]` query). Read files are
/// grouped by sample name. With `write_metadata`, a `reads_metadata` table
/// is written into the output directory and its path returned. Runs without
/// `reads` or `output` are left alone.
pub fn prepare_reads(
    run: &mut Mapping,
    write_metadata: bool,
) -> Result<Option<Utf8PathBuf>, TaxrefError> {
    let Some(output) = run.get("output").and_then(Value::as_str).map(Utf8PathBuf::from) else {
        return Ok(None);
    };
    let Some(input) = run.get_mut("input").and_then(Value::as_mapping_mut) else {
        return Ok(None);
    };
    let items = match input.get("reads") {
        Some(Value::String(query)) => {
            let query = query.clone();
            input.shift_remove("reads");
            input.insert("reads_query".into(), Value::String(query));
            return Ok(None);
        }
        Some(Value::Sequence(items)) => items.clone(),
        _ => return Ok(None),
    };

    let Some(samples) = group_read_files(&items)? else {
        let accessions: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
        if !accessions.is_empty() {
            input.shift_remove("reads");
            input.insert("reads_query".into(), accession_query(&accessions).into());
        }
        return Ok(None);
    };

    let metadata = if write_metadata {
        let path = write_reads_metadata(&output, &samples)?;
        tracing::debug!(%path, samples = samples.len(), "wrote reads metadata");
        input.insert("reads_metadata".into(), path.as_str().into());
        Some(path)
    } else {
        None
    };
    let pairs = samples
        .into_iter()
        .map(|sample| {
            Value::Sequence(vec![Value::String(sample.id), Value::Sequence(sample.files)])
        })
        .collect();
    input.insert("reads".into(), Value::Sequence(pairs));
    Ok(metadata)
}

/// Groups read files by sample, in first-seen order.
///
/// A string names one file; its sample is the file name up to the first `.`
/// or `_`. A string with no such suffix is an accession, not a file. A nested
/// list is one sample whose id is the common prefix of its file names.
/// `None` when the list holds no files at all.
pub fn group_read_files(items: &[Value]) -> Result<Option<Vec<ReadSample>>, TaxrefError> {
    let file_prefix = compile(r"^[^._]+")?;
    let stem = compile(r"^[^.]+")?;
    let mut samples: Vec<ReadSample> = Vec::new();
    let mut has_files = false;

    for item in items {
        match item {
            Value::String(path) => {
                let name = file_name(path);
                let Some(prefix) = file_prefix.find(name).map(|found| found.as_str()) else {
                    continue;
                };
                if prefix == name {
                    continue;
                }
                has_files = true;
                match samples.iter_mut().find(|sample| sample.id == prefix) {
                    Some(sample) => sample.files.push(item.clone()),
                    None => samples.push(ReadSample {
                        id: prefix.to_string(),
                        files: vec![item.clone()],
                    }),
                }
            }
            Value::Sequence(files) => {
                has_files = true;
                let mut names: Vec<String> = files
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|path| {
                        let name = file_name(path);
                        stem.find(name).map_or("", |found| found.as_str()).to_string()
                    })
                    .collect();
                let id = sample_id(&mut names);
                match samples.iter_mut().find(|sample| sample.id == id) {
                    Some(sample) => sample.files = files.clone(),
                    None => samples.push(ReadSample {
                        id,
                        files: files.clone(),
                    }),
                }
            }
            _ => {}
        }
    }
    Ok(has_files.then_some(samples))
}

/// Tab-separated metadata rows for samples named like SRA runs. Other
/// samples get no row.
pub fn reads_metadata_table(samples: &[ReadSample]) -> Result<String, TaxrefError> {
    let sra_run = compile(SRA_RUN_PATTERN)?;
    let mut table = String::new();
    for sample in samples.iter().filter(|sample| sra_run.is_match(&sample.id)) {
        let layout = if sample.files.len() == 2 {
            "paired"
        } else {
            "unpaired"
        };
        let mut row = vec![sample.id.as_str(), "NA", layout, "2", "2"];
        row.extend(["NA"; 7]);
        row.push("0");
        table.push_str(&row.join("\t"));
        table.push('\n');
    }
    Ok(table)
}

fn write_reads_metadata(
    output: &Utf8Path,
    samples: &[ReadSample],
) -> Result<Utf8PathBuf, TaxrefError> {
    let table = reads_metadata_table(samples)?;
    fs::create_dir_all(output)
        .map_err(|err| TaxrefError::Filesystem(format!("{output}: {err}")))?;
    let mut file = tempfile::Builder::new()
        .prefix("taxref_reads_metadata_")
        .suffix(".tsv")
        .tempfile_in(output.as_std_path())
        .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
    file.write_all(table.as_bytes())
        .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
    let (_, path) = file
        .keep()
        .map_err(|err| TaxrefError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(path)
        .map_err(|path| TaxrefError::Filesystem(format!("{} is not UTF-8", path.display())))
}

fn accession_query(accessions: &[&str]) -> String {
    format!("{}[Accession]", accessions.join("[Accession] OR "))
}

fn sample_id(names: &mut [String]) -> String {
    names.sort();
    let mut id: String = match names {
        [] => String::new(),
        [only] => only.clone(),
        [first, .., last] => first
            .chars()
            .zip(last.chars())
            .take_while(|(left, right)| left == right)
            .map(|(left, _)| left)
            .collect(),
    };
    while id.len() > 1 && id.ends_with(['.', '_']) {
        id.pop();
    }
    id
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

fn compile(pattern: &str) -> Result<Regex, TaxrefError> {
    Regex::new(pattern).map_err(|err| TaxrefError::ParamsParse(err.to_string()))
}

pub fn to_yaml_string(value: &Value) -> Result<String, TaxrefError> {
    serde_yaml::to_string(value).map_err(|err| TaxrefError::ParamsParse(err.to_string()))
}

/// Writes `params` as `run_params.yaml` under `output_dir` and returns its path.
pub fn write_params_file(output_dir: &Utf8Path, params: &Value) -> Result<Utf8PathBuf, TaxrefError> {
    fs::create_dir_all(output_dir)
        .map_err(|err| TaxrefError::Filesystem(format!("{output_dir}: {err}")))?;
    let path = output_dir.join("run_params.yaml");
    let text = to_yaml_string(params)?;
    Store::write_bytes_atomic(&path, text.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repackage_moves_inputs() {
        let document = parse_yaml("genome: g.fa\ntaxid: 9606\noutput: out\ntasks:\n  a: '-x 1'\n").unwrap();
        let run = repackage_inputs(document).unwrap();
        let input = input_section(&run).unwrap();
        assert_eq!(input.get("genome"), Some(&Value::from("g.fa")));
        assert!(input.get("output").is_none());
        assert_eq!(run.get("output"), Some(&Value::from("out")));
        assert!(run.get("tasks").is_some());
    }

    #[test]
    fn repackage_keeps_existing_input() {
        let document = parse_yaml("input:\n  genome: g.fa\nextra: 1\n").unwrap();
        let run = repackage_inputs(document).unwrap();
        assert_eq!(run.get("extra"), Some(&Value::from(1)));
    }

    #[test]
    fn repackage_rejects_scalars() {
        assert!(repackage_inputs(Value::from("text")).is_err());
    }

    #[test]
    fn absolutize_existing_paths_only() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("genome.fa"), ">chr1\nACGT\n").unwrap();
        let document = parse_yaml(
            "genome: genome.fa\nproteins: https://example.org/p.faa\nhmm: ''\nreads: [missing.fq, genome.fa]\ntaxid: genome.fa\n",
        )
        .unwrap();
        let mut run = repackage_inputs(document).unwrap();
        absolutize_paths(&mut run, temp.path()).unwrap();

        let input = input_section(&run).unwrap();
        let expected = temp.path().join("genome.fa").to_string_lossy().into_owned();
        assert_eq!(input.get("genome"), Some(&Value::from(expected.as_str())));
        assert_eq!(input.get("proteins"), Some(&Value::from("https://example.org/p.faa")));
        assert_eq!(input.get("hmm"), Some(&Value::from("")));
        assert_eq!(
            input.get("reads"),
            Some(&Value::Sequence(vec![
                Value::from("missing.fq"),
                Value::from(expected.as_str())
            ]))
        );
        assert_eq!(input.get("taxid"), Some(&Value::from("genome.fa")));
    }

    fn run_with_reads(reads: &str, output: &Path) -> Mapping {
        let text = format!("genome: g.fa\nreads: {reads}\noutput: {}\n", output.display());
        repackage_inputs(parse_yaml(&text).unwrap()).unwrap()
    }

    #[test]
    fn string_reads_become_query() {
        let temp = tempfile::tempdir().unwrap();
        let mut run = run_with_reads("'txid9606[Organism] AND biomol_rna[PROP]'", temp.path());
        assert_eq!(prepare_reads(&mut run, true).unwrap(), None);

        let input = input_section(&run).unwrap();
        assert!(input.get("reads").is_none());
        assert_eq!(
            input.get("reads_query"),
            Some(&Value::from("txid9606[Organism] AND biomol_rna[PROP]"))
        );
    }

    #[test]
    fn accession_list_becomes_query() {
        let temp = tempfile::tempdir().unwrap();
        let mut run = run_with_reads("[SRR8506572, SRR9005248]", temp.path());
        assert_eq!(prepare_reads(&mut run, true).unwrap(), None);

        let input = input_section(&run).unwrap();
        assert!(input.get("reads").is_none());
        assert_eq!(
            input.get("reads_query"),
            Some(&Value::from("SRR8506572[Accession] OR SRR9005248[Accession]"))
        );
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn read_files_are_grouped_by_sample() {
        let temp = tempfile::tempdir().unwrap();
        let mut run = run_with_reads(
            "[/data/SRR1_1.fq.gz, /data/SRR1_2.fq.gz, /data/SRR2.fq, [/data/sampleA_1.fq, /data/sampleA_2.fq]]",
            temp.path(),
        );
        let metadata = prepare_reads(&mut run, true).unwrap().unwrap();

        let input = input_section(&run).unwrap();
        let expected = parse_yaml(
            "- [SRR1, [/data/SRR1_1.fq.gz, /data/SRR1_2.fq.gz]]\n- [SRR2, [/data/SRR2.fq]]\n- [sampleA, [/data/sampleA_1.fq, /data/sampleA_2.fq]]\n",
        )
        .unwrap();
        assert_eq!(input.get("reads"), Some(&expected));
        assert_eq!(input.get("reads_metadata"), Some(&Value::from(metadata.as_str())));
        assert!(metadata.starts_with(Utf8Path::from_path(temp.path()).unwrap()));

        let table = fs::read_to_string(&metadata).unwrap();
        let rows: Vec<Vec<&str>> = table.lines().map(|line| line.split('\t').collect()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][..3], &["SRR1", "NA", "paired"]);
        assert_eq!(&rows[1][..3], &["SRR2", "NA", "unpaired"]);
        assert_eq!(rows[0].len(), 13);
        assert_eq!(rows[0][12], "0");
    }

    #[test]
    fn grouping_without_metadata_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let mut run = run_with_reads("[SRR1_1.fq, SRR1_2.fq]", temp.path());
        assert_eq!(prepare_reads(&mut run, false).unwrap(), None);

        let input = input_section(&run).unwrap();
        assert!(input.get("reads_metadata").is_none());
        assert_eq!(input["reads"][0][0].as_str(), Some("SRR1"));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn reads_need_an_output_directory() {
        let document = parse_yaml("genome: g.fa\nreads: [SRR1_1.fq]\n").unwrap();
        let mut run = repackage_inputs(document).unwrap();
        assert_eq!(prepare_reads(&mut run, true).unwrap(), None);
        assert!(input_section(&run).unwrap()["reads"][0].is_string());
    }
}

use assert_matches::assert_matches;
use serde_yaml::Value;

use taxref::error::TaxrefError;
use taxref::merge::{FlagBlob, merge};

fn yaml(text: &str) -> Value {
    serde_yaml::from_str(text).unwrap()
}

#[test]
fn empty_override_returns_base() {
    let base = yaml("tasks:\n  align:\n    params: '-a 1'\n  threads: 4\n");
    assert_eq!(merge(&base, &yaml("{}")).unwrap(), base);
    assert_eq!(merge(&base, &Value::Null).unwrap(), base);
}

#[test]
fn nested_mappings_merge_key_by_key() {
    let base = yaml(
        "tasks:\n  align:\n    params: '-a 1 -b'\n    cores: 2\n  chain:\n    params: '-x'\n",
    );
    let overrides = yaml("tasks:\n  align:\n    params: '-b 2 -c'\n  extra:\n    params: '-z'\n");
    let merged = merge(&base, &overrides).unwrap();

    assert_eq!(
        merged,
        yaml(
            "tasks:\n  align:\n    params: '-a 1 -b 2 -c'\n    cores: 2\n  chain:\n    params: '-x'\n  extra:\n    params: '-z'\n"
        )
    );
}

#[test]
fn override_is_left_untouched() {
    let base = yaml("params: '-a 1'\n");
    let overrides = yaml("params: '-a 2 -k'\n");
    let snapshot = overrides.clone();
    merge(&base, &overrides).unwrap();
    assert_eq!(overrides, snapshot);
}

#[test]
fn non_string_conflicts_take_override() {
    let base = yaml("cores: 2\nlist: [a, b]\nflag: '-x'\n");
    let overrides = yaml("cores: 8\nlist: [c]\nflag: {nested: true}\n");
    let merged = merge(&base, &overrides).unwrap();
    assert_eq!(merged, overrides);
}

#[test]
fn flag_blob_order_and_values() {
    let merged = merge(&yaml("p: '-a 1 -b'\n"), &yaml("p: '-b 2 -c'\n")).unwrap();
    let text = merged["p"].as_str().unwrap();
    let blob = FlagBlob::parse(text).unwrap();
    assert_eq!(blob.tokens(), vec!["-a", "1", "-b", "2", "-c"]);
}

#[test]
fn malformed_override_names_the_key() {
    let err = merge(
        &yaml("tasks:\n  align:\n    params: '-a 1'\n"),
        &yaml("tasks:\n  align:\n    params: \"-b 'unterminated\"\n"),
    )
    .unwrap_err();
    assert_matches!(
        err,
        TaxrefError::MalformedParameterString { key, .. } if key == "tasks.align.params"
    );
}

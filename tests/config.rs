use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use taxref::config::{Config, SettingsLoader};
use taxref::error::TaxrefError;

#[test]
fn settings_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taxref.json");
    fs::write(
        &path,
        r#"{
            "ftp_root": "/mirror/support_data/",
            "https_root": "https://mirror.example.org/support_data/",
            "data_version": "2024-06",
            "local_cache": "/var/cache/taxref",
            "http_timeout_secs": 5,
            "retry": { "max_attempts": 2 }
        }"#,
    )
    .unwrap();

    let settings = SettingsLoader::resolve(path.to_str()).unwrap();
    assert_eq!(settings.repository.ftp_host, "ftp.ncbi.nlm.nih.gov");
    assert_eq!(
        settings.repository.ftp_path_for("gnomon/3.0"),
        "mirror/support_data/gnomon/3.0"
    );
    assert_eq!(
        settings.repository.manifest_url(),
        "https://mirror.example.org/support_data/2024-06.mft"
    );
    assert_eq!(settings.http_timeout, Duration::from_secs(5));
    assert_eq!(settings.retry.max_attempts, 2);
    assert_eq!(settings.retry.delay, Duration::from_secs(1));
}

#[test]
fn blank_local_cache_is_ignored() {
    let config = Config {
        local_cache: Some("  ".to_string()),
        ..Config::default()
    };
    assert!(SettingsLoader::resolve_config(config).local_cache.is_none());
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = SettingsLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, TaxrefError::ConfigRead(_));
}

#[test]
fn invalid_json_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taxref.json");
    fs::write(&path, "{ not json").unwrap();
    let err = SettingsLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, TaxrefError::ConfigParse(_));
}

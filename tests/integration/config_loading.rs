//! Configuration loading from disk.

use std::io::Write;

use energy_data_harvester::config::{ConfigError, HarvesterConfig};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn loads_a_minimal_config_with_defaults() {
    let file = write_config(
        r#"{
            "influxdb": {
                "url": "http://influx:8086",
                "token": "secret",
                "org": "home",
                "bucket": "energy"
            },
            "esios": {"token": "api-token"}
        }"#,
    );
    let config = HarvesterConfig::load(file.path()).unwrap();

    assert_eq!(config.influxdb.bucket, "energy");
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.enabled_providers(), vec!["esios"]);
    let esios = config.esios.unwrap();
    assert_eq!(esios.base_url, "https://api.esios.ree.es");
    assert_eq!(esios.indicators, vec![1001, 1295, 1739]);
}

#[test]
fn loads_every_provider_block() {
    let file = write_config(
        r#"{
            "influxdb": {"url": "http://influx:8086", "token": "t", "org": "o", "bucket": "b"},
            "fusionsolar": {"username": "acc", "system_code": "code"},
            "aemet": {"api_key": "k", "base_url": "http://mock/api"},
            "ide": {"username": "u", "password": "p"},
            "esios": {"token": "x", "indicators": [600]},
            "concurrency": 8
        }"#,
    );
    let config = HarvesterConfig::load(file.path()).unwrap();

    assert_eq!(
        config.enabled_providers(),
        vec!["fusionsolar", "aemet", "ide", "esios"]
    );
    assert_eq!(config.concurrency, 8);
    assert_eq!(config.aemet.as_ref().unwrap().base_url, "http://mock/api");
    assert_eq!(config.esios.as_ref().unwrap().indicators, vec![600]);
    assert_eq!(
        config.fusionsolar.as_ref().unwrap().base_url,
        "https://eu5.fusionsolar.huawei.com/thirdData"
    );
}

#[test]
fn missing_file_reports_the_path() {
    let err = HarvesterConfig::load(std::path::Path::new("/nonexistent/harvester.json"))
        .unwrap_err();
    match err {
        ConfigError::Io { path, .. } => assert!(path.contains("harvester.json")),
        other => panic!("expected Io error, got {other}"),
    }
}

#[test]
fn malformed_json_is_a_parse_error() {
    let file = write_config(r#"{"influxdb": {"url": "x""#);
    assert!(matches!(
        HarvesterConfig::load(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn missing_sink_block_is_a_parse_error() {
    let file = write_config(r#"{"concurrency": 2}"#);
    assert!(matches!(
        HarvesterConfig::load(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}

use std::io::Write;

use plantlink_connector::ConnectorConfig;

#[test]
fn test_empty_file_gives_defaults() {
    let config = ConnectorConfig::from_toml_str("").unwrap();
    assert!(config.agent_id.starts_with("connector-"));
    assert_eq!(config.document.closing_marker, "</Cluster>");
    assert_eq!(config.timing.idle_margin_ms, 500);
    assert_eq!(config.timing.connecting_margin_ms, 100);
    assert_eq!(config.timing.default_accept_wait_ms, 10_000);
    assert_eq!(config.timing.ingester_join_grace_ms, 5_000);
}

#[test]
fn test_partial_override() {
    let config = ConnectorConfig::from_toml_str(
        r#"
        agent_id = "boiler-link"
        listen_addr = "0.0.0.0:7801"

        [document]
        value_tag = "Value"

        [timing]
        connect_timeout_ms = 750
        "#,
    )
    .unwrap();
    assert_eq!(config.agent_id, "boiler-link");
    assert_eq!(config.listen_addr, "0.0.0.0:7801");
    assert_eq!(config.document.value_tag, "Value");
    assert_eq!(config.document.name_tag, "Name");
    assert_eq!(config.timing.connect_timeout_ms, 750);
    assert_eq!(config.timing.idle_margin_ms, 500);
}

#[test]
fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "agent_id = \"from-file\"").unwrap();
    let config = ConnectorConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.agent_id, "from-file");
}

#[test]
fn test_missing_explicit_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(ConnectorConfig::load(Some(missing.as_path())).is_err());
}

#[test]
fn test_invalid_toml_is_error() {
    assert!(ConnectorConfig::from_toml_str("agent_id = [").is_err());
}

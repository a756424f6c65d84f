use std::io::Write;
use std::time::Duration;

use plantlink_monitor::{ConnectorRoute, MonitorConfig};

#[test]
fn test_empty_file_gives_defaults() {
    let config = MonitorConfig::from_toml_str("").unwrap();
    assert!(config.monitor_id.starts_with("monitor-"));
    assert!(config.connectors.is_empty());
    assert_eq!(config.timing.discovery_retry(), Duration::from_millis(2_000));
    assert_eq!(config.timing.cfp_reply(), Duration::from_millis(5_000));
    assert_eq!(config.timing.accept_reply(), Duration::from_millis(15_000));
    assert_eq!(config.timing.subscribe_reply(), Duration::from_millis(2_000));
    assert_eq!(config.timing.cancel_reply(), Duration::from_millis(2_000));
    assert_eq!(config.timing.connector_connect(), Duration::from_millis(3_000));
}

#[test]
fn test_connector_routes() {
    let config = MonitorConfig::from_toml_str(
        r#"
        monitor_id = "control-room"

        [[connectors]]
        id = "conn-a"
        addr = "10.1.0.10:7700"

        [[connectors]]
        id = "conn-b"
        addr = "10.1.0.11:7700"

        [timing]
        discovery_retry_ms = 500
        connector_connect_ms = 750
        "#,
    )
    .unwrap();
    assert_eq!(config.monitor_id, "control-room");
    assert_eq!(
        config.connectors,
        vec![
            ConnectorRoute {
                id: "conn-a".into(),
                addr: "10.1.0.10:7700".into(),
            },
            ConnectorRoute {
                id: "conn-b".into(),
                addr: "10.1.0.11:7700".into(),
            },
        ]
    );
    assert_eq!(config.timing.discovery_retry_ms, 500);
    assert_eq!(config.timing.accept_reply_ms, 15_000);
    assert_eq!(config.timing.connector_connect(), Duration::from_millis(750));
}

#[test]
fn test_route_requires_addr() {
    let result = MonitorConfig::from_toml_str(
        r#"
        [[connectors]]
        id = "conn-a"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "monitor_id = \"from-file\"").unwrap();
    let config = MonitorConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.monitor_id, "from-file");
}

#[test]
fn test_missing_explicit_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(MonitorConfig::load(Some(missing.as_path())).is_err());
}

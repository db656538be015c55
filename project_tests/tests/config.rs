//! Layered client configuration: defaults, then a JSON file.

use std::io::Write;
use std::time::Duration;

use signalr_client::{ClientConfig, ConfigError};

#[test]
fn defaults_match_the_documented_timings() {
    let config = ClientConfig::default();
    assert_eq!(config.sse_reconnect_delay(), Duration::from_secs(2));
    assert_eq!(config.sse_connection_timeout(), Duration::from_secs(2));
    assert_eq!(config.long_polling_reconnect_delay(), Duration::from_secs(5));
    assert_eq!(config.error_backoff(), Duration::from_secs(2));
    assert_eq!(config.abort_timeout(), Duration::from_secs(2));
    assert_eq!(config.groups_post_threshold, 20);
}

#[test]
fn file_overrides_only_what_it_names() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{"longPollingReconnectDelayMs": 750, "userAgent": "agent/2.0"}}"#
    )?;

    let config = ClientConfig::load(Some(file.path()))?;

    assert_eq!(config.long_polling_reconnect_delay(), Duration::from_millis(750));
    assert_eq!(config.user_agent(), "agent/2.0");
    assert_eq!(config.error_backoff_ms, 2000);
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClientConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::IoError(_)));
}

#[test]
fn malformed_file_is_a_json_error() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "{{ not json")?;

    let err = ClientConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::JsonError(_)));
    Ok(())
}

use std::path::PathBuf;

use palisade::config::{Config, DEFAULT_PORT, DEFAULT_ROOT};

#[test]
fn test_config_defaults() {
    let cfg = Config::from_parts(None, None);
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.root, PathBuf::from(DEFAULT_ROOT));
}

#[test]
fn test_config_custom_port() {
    let cfg = Config::from_parts(Some("8080"), None);
    assert_eq!(cfg.port, 8080);
}

#[test]
fn test_config_invalid_port_falls_back_to_default() {
    for bad in ["0", "70000", "-1", "http", ""] {
        let cfg = Config::from_parts(Some(bad), None);
        assert_eq!(cfg.port, DEFAULT_PORT, "port value {bad:?}");
    }
}

#[test]
fn test_config_custom_root() {
    let cfg = Config::from_parts(None, Some("www"));
    assert_eq!(cfg.root, PathBuf::from("www"));
}

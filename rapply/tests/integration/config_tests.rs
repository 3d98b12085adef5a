use rapply_common::{ApplyConfig, Protocol};

use super::common::init_test_logging;

#[test]
fn test_default_config_uses_sudo_over_ssh() {
    init_test_logging();
    crate::test_log!("TEST START: test_default_config_uses_sudo_over_ssh");

    let config = ApplyConfig::default();
    assert!(config.connection.sudo, "Expected sudo to be on by default");
    assert_eq!(config.connection.default_protocol, Protocol::Ssh);

    crate::test_log!("TEST PASS: test_default_config_uses_sudo_over_ssh");
}

#[test]
fn test_workspace_config_loads() {
    init_test_logging();
    crate::test_log!("TEST START: test_workspace_config_loads");

    let ws = crate::common::TestWorkspace::new();
    let config = ApplyConfig::load_from_path(&ws.config).expect("config should parse");
    assert_eq!(config.log.level, "info");
    assert_eq!(config.log.location, ws.log_file);
    assert!(config.cache.path.starts_with(ws.dir.path()));

    crate::test_log!("TEST PASS: test_workspace_config_loads");
}

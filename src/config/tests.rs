use super::*;

#[test]
fn default_config_validates() {
    let config = GatewayConfig::default();
    assert!(config.validate().is_ok());
}

#[test]
fn default_config_builds_proxy_options() {
    let config = GatewayConfig::default();
    let opts = config.proxy_options().unwrap();
    assert_eq!(opts.connect_timeout.as_millis(), 15_000);
    assert!(opts.trusted_ranges.is_empty());
}

#[test]
fn fixed_destination_requires_nonempty_host() {
    let mut config = GatewayConfig::default();
    config.destination = DestinationMode::Fixed {
        scheme: "http".to_string(),
        host: String::new(),
        port: 80,
    };
    assert!(config.validate().is_err());
}

#[test]
fn invalid_listen_address_rejected() {
    let mut config = GatewayConfig::default();
    config.server.listen = "not-an-address".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn invalid_trusted_range_rejected() {
    let mut config = GatewayConfig::default();
    config.proxy_options.trusted_ranges = vec!["not-a-cidr".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn invalid_regex_rejected() {
    let mut config = GatewayConfig::default();
    config.proxy_options.regex_replacements = vec![RegexReplacementConfig {
        pattern: "(".to_string(),
        replacement: "x".to_string(),
    }];
    assert!(config.validate().is_err());
    assert!(config.proxy_options().is_err());
}

#[test]
fn toml_round_trip_parses_destination_tag() {
    let toml_str = r#"
        [destination]
        mode = "fixed"
        scheme = "http"
        host = "origin.internal"
        port = 8080
    "#;
    let config: GatewayConfig = toml::from_str(toml_str).unwrap();
    match config.destination {
        DestinationMode::Fixed { host, port, .. } => {
            assert_eq!(host, "origin.internal");
            assert_eq!(port, 8080);
        }
        _ => panic!("expected fixed destination"),
    }
}

#[test]
fn env_override_changes_listen_address() {
    let mut config = GatewayConfig::default();
    std::env::set_var("PROXY_LISTEN", "127.0.0.1:1234");
    config.apply_env_overrides();
    std::env::remove_var("PROXY_LISTEN");
    assert_eq!(config.server.listen, "127.0.0.1:1234");
}

#[test]
fn out_of_range_connect_timeout_rejected() {
    let mut config = GatewayConfig::default();
    config.proxy_options.connect_timeout_ms = 500;
    assert!(config.validate().is_err());

    config.proxy_options.connect_timeout_ms = 60_001;
    assert!(config.validate().is_err());
}

#[test]
fn out_of_range_network_timeout_rejected() {
    let mut config = GatewayConfig::default();
    config.proxy_options.network_timeout_ms = 999;
    assert!(config.validate().is_err());

    config.proxy_options.network_timeout_ms = 600_001;
    assert!(config.validate().is_err());
}

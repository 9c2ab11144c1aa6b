use super::*;
use keysmith_provision::Protocol;

const SAMPLE: &str = r#"
[server]
bind = "0.0.0.0:9000"

[panel]
url = "https://127.0.0.1:2053/secret"
username = "admin"
password = "admin"
accept_invalid_certs = true

[limits]
max_keys_per_user = 2

[provisioning]
lock_retry_attempts = 3
lock_retry_delay_ms = 10

[[servers]]
id = 1
name = "VLESS Reality Server"
region = "Germany"
address = "203.0.113.10"
[servers.vless]
inbound_id = 1
public_key = "pbk"
sni = "example.com"
short_id = "c17ec0dffa"
flow = "xtls-rprx-vision"

[[servers]]
id = 2
name = "Outline"
region = "Finland"
[servers.outline]
api_url = "https://198.51.100.2:8443/abc"
[servers.ssh]
password = "pw"
"#;

#[test]
fn test_default_config() {
    let config = DaemonConfig::default();
    assert_eq!(config.server.bind.port(), 8088);
    assert_eq!(config.database.url, "sqlite://keysmith.db");
    assert_eq!(config.limits.max_keys_per_user, 4);
    assert_eq!(config.limits.key_lifetime_days, 36500);
    assert_eq!(config.provisioning.lock_retry_attempts, 5);
    assert!(!config.provisioning.compensate_orphans);
    assert!(config.servers.is_empty());
}

#[test]
fn test_parse_sample() {
    let config: DaemonConfig = toml::from_str(SAMPLE).unwrap();
    config.validate().unwrap();

    assert_eq!(config.server.bind.port(), 9000);
    assert_eq!(config.panel.request_timeout_secs, 20);
    assert!(config.panel.accept_invalid_certs);
    assert_eq!(config.limits.max_keys_per_user, 2);
    assert_eq!(config.limits.key_lifetime_days, 36500);

    let options = config.provisioner_options();
    assert_eq!(options.lock_retry.attempts, 3);
    assert_eq!(options.lock_retry.delay, Duration::from_millis(10));

    let registry = config.registry().unwrap();
    assert_eq!(registry.first_supporting(Protocol::Outline).unwrap().id, 2);
    let ssh = registry.find(2).unwrap().ssh.as_ref().unwrap();
    assert_eq!(ssh.port, 22);
    assert_eq!(ssh.user, "root");
}

#[test]
fn test_validate_rejects_incomplete() {
    let mut config: DaemonConfig = toml::from_str(SAMPLE).unwrap();
    config.panel.password.clear();
    assert!(config.validate().is_err());

    let mut config: DaemonConfig = toml::from_str(SAMPLE).unwrap();
    config.servers.clear();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_key_lifetime_bounds() {
    let mut config: DaemonConfig = toml::from_str(SAMPLE).unwrap();
    for days in [0, -1, MAX_KEY_LIFETIME_DAYS + 1, 100_000_000, i64::MAX] {
        config.limits.key_lifetime_days = days;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("key_lifetime_days"), "{}", err);
    }

    for days in [1, 30, MAX_KEY_LIFETIME_DAYS] {
        config.limits.key_lifetime_days = days;
        config.validate().unwrap();
    }
}

#[test]
fn test_duplicate_server_ids_rejected() {
    let mut config: DaemonConfig = toml::from_str(SAMPLE).unwrap();
    config.servers[1].id = 1;
    assert!(config.registry().is_err());
}

#[tokio::test]
async fn test_load_missing_file() {
    assert!(DaemonConfig::load("/nonexistent/keysmith.toml").await.is_err());
}

//! Unit tests for configuration loading and validation.

use hostvol::config::{ConfigError, DaemonConfig, IsilonConfig, Settings};
use hostvol::test_support::EnvGuard;
use rstest::*;

#[fixture]
fn valid_isilon() -> IsilonConfig {
    IsilonConfig {
        endpoint: String::from("https://isilon.example.com:8080"),
        insecure: false,
        user_name: String::from("admin"),
        password: String::from("secret"),
        volume_path: String::from("/ifs/volumes"),
        nfs_host: String::from("nas.example.com"),
        subnet: Some(String::from("10.0.0.0/24")),
    }
}

#[rstest]
fn valid_isilon_config_passes(valid_isilon: IsilonConfig) {
    assert_eq!(valid_isilon.validate(), Ok(()));
}

/// Validation errors name both the environment variable and the TOML key so
/// operators can fix the setting from either source.
#[rstest]
#[case::endpoint(|c: &mut IsilonConfig| c.endpoint.clear(), "HOSTVOL_ISILON_ENDPOINT", "endpoint")]
#[case::user(|c: &mut IsilonConfig| c.user_name.clear(), "HOSTVOL_ISILON_USER_NAME", "user_name")]
#[case::password(|c: &mut IsilonConfig| c.password.clear(), "HOSTVOL_ISILON_PASSWORD", "password")]
#[case::volume_path(
    |c: &mut IsilonConfig| c.volume_path = String::from("  "),
    "HOSTVOL_ISILON_VOLUME_PATH",
    "volume_path"
)]
#[case::nfs_host(|c: &mut IsilonConfig| c.nfs_host.clear(), "HOSTVOL_ISILON_NFS_HOST", "nfs_host")]
fn isilon_validation_errors_are_actionable(
    valid_isilon: IsilonConfig,
    #[case] mutate: fn(&mut IsilonConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_isilon;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains(env_var), "error should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "error should mention {toml_key}: {message}");
    assert!(message.contains("hostvol.toml"), "error should mention config file: {message}");
    assert!(message.contains("top-level"), "error should describe key placement: {message}");
}

#[rstest]
fn debug_output_hides_password(valid_isilon: IsilonConfig) {
    let rendered = format!("{valid_isilon:?}");
    assert!(!rendered.contains("secret"), "password leaked: {rendered}");
    assert!(rendered.contains("<redacted>"));
}

#[tokio::test]
async fn daemon_config_reads_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("HOSTVOL_PID_FILE", "/tmp/hostvol-env.pid"),
        ("HOSTVOL_STORAGE_DRIVERS", "Isilon, ceph,"),
        ("HOSTVOL_HANDSHAKE_TIMEOUT_SECS", "7"),
    ])
    .await;

    let cfg = DaemonConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("daemon config should load: {err}"));

    assert_eq!(cfg.pid_file_path().as_str(), "/tmp/hostvol-env.pid");
    assert_eq!(cfg.os_driver, "linux");
    assert_eq!(
        cfg.storage_driver_names(),
        vec![String::from("isilon"), String::from("ceph")]
    );
    assert_eq!(cfg.handshake_timeout().map(|t| t.as_secs()), Some(7));
    assert!(cfg.require_root);
}

#[tokio::test]
async fn config_file_supplies_top_level_keys() {
    let dir = tempfile::TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
    let path = dir.path().join("hostvol.toml");
    std::fs::write(
        &path,
        concat!(
            "pid_file = \"/tmp/hostvol-file.pid\"\n",
            "storage_drivers = [\"isilon\", \"Ceph\"]\n",
            "volume_root_path = \"/srv\"\n",
            "endpoint = \"https://isilon.example.com:8080\"\n",
            "nfs_host = \"nas.example.com\"\n",
        ),
    )
    .unwrap_or_else(|err| panic!("write config: {err}"));
    let config_path = path
        .to_str()
        .unwrap_or_else(|| panic!("temp path is not UTF-8"));
    let _guard = EnvGuard::set_vars(&[("HOSTVOL_CONFIG_PATH", config_path)]).await;

    let settings = Settings::load_without_cli_args()
        .unwrap_or_else(|err| panic!("settings should load: {err}"));

    assert_eq!(settings.daemon.pid_file_path().as_str(), "/tmp/hostvol-file.pid");
    assert_eq!(
        settings.daemon.storage_driver_names(),
        vec![String::from("isilon"), String::from("ceph")]
    );
    assert_eq!(settings.linux.volume_root_path, "/srv");
    assert_eq!(settings.isilon.endpoint, "https://isilon.example.com:8080");
    assert_eq!(settings.isilon.nfs_host, "nas.example.com");
}

#[tokio::test]
async fn settings_reject_zero_handshake_timeout() {
    let _guard = EnvGuard::set_vars(&[("HOSTVOL_HANDSHAKE_TIMEOUT_SECS", "0")]).await;

    let err = Settings::load_without_cli_args().expect_err("zero timeout is invalid");

    assert!(matches!(err, ConfigError::Invalid(ref message) if message.contains("handshake_timeout_secs")));
}

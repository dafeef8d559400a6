//! Tests for bootstrap configuration loading and root folder resolution
//!
//! Tests that manipulate FTR_* environment variables are marked with #[serial]
//! so they never run in parallel with each other.

use ftr_common::config::{
    database_path, default_root_folder, load_toml_config, resolve_root_folder, storage_path,
    TomlConfig, DEFAULT_PORT, ROOT_FOLDER_ENV_VAR,
};
use serial_test::serial;
use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

#[test]
fn test_empty_toml_uses_defaults() {
    let config = TomlConfig::from_toml_str("").unwrap();

    assert_eq!(config.server.port, DEFAULT_PORT);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.storage.bucket, "recoleccion_fotos");
    assert_eq!(config.pinning.api_url, "https://api.pinata.cloud");
    assert_eq!(config.anchoring.max_attempts, 8);
    assert_eq!(config.logging.level, "info");
    assert!(!config.pinning.is_enabled());
    assert!(!config.chain.is_enabled());
}

#[test]
fn test_partial_sections_keep_other_defaults() {
    let config = TomlConfig::from_toml_str(
        r#"
        root_folder = "/srv/ftr"

        [server]
        port = 8080

        [chain]
        rpc_url = "https://rpc.example"
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/ftr")));
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.chain.rpc_url.as_deref(), Some("https://rpc.example"));
    assert_eq!(
        config.chain.recipient,
        "0x2440783D1d86D91118E7e19F62889dDc96775868"
    );
    // Missing private key / contract keeps chain disabled
    assert!(!config.chain.is_enabled());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = TomlConfig::from_toml_str("[server\nport = ");
    assert!(matches!(result, Err(ftr_common::Error::Config(_))));
}

#[test]
fn test_env_overrides_fill_secrets() {
    let vars: HashMap<&str, &str> = [
        ("PINATA_JWT", "jwt-token"),
        ("GATEWAY_URL", "gateway.example.cloud"),
        ("RPC_URL", "https://rpc.example"),
        ("PRIVATE_KEY", "0xabc"),
        ("CONTRACT_ADDRESS", "0x4bb21533f7803BBce74421f6bdfc4B6c57706EA2"),
        ("FTR_PORT", "6000"),
    ]
    .into_iter()
    .collect();

    let mut config = TomlConfig::default();
    config.apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

    assert!(config.pinning.is_enabled());
    assert!(config.chain.is_enabled());
    assert_eq!(config.server.port, 6000);
}

#[test]
fn test_env_override_ignores_blank_and_invalid_values() {
    let mut config = TomlConfig::default();
    config.apply_env_overrides(|key| match key {
        "PINATA_JWT" => Some("   ".to_string()),
        "FTR_PORT" => Some("not-a-port".to_string()),
        _ => None,
    });

    assert!(config.pinning.jwt.is_none());
    assert_eq!(config.server.port, DEFAULT_PORT);
}

#[test]
fn test_public_base_url_defaults_to_own_route() {
    let config = TomlConfig::default();
    assert_eq!(
        config.storage.resolved_public_base_url(&config.server),
        format!("http://127.0.0.1:{}/storage/recoleccion_fotos", DEFAULT_PORT)
    );

    let config = TomlConfig::from_toml_str(
        r#"
        [storage]
        public_base_url = "https://cdn.example/fotos/"
        "#,
    )
    .unwrap();
    assert_eq!(
        config.storage.resolved_public_base_url(&config.server),
        "https://cdn.example/fotos"
    );
}

#[test]
fn test_load_explicit_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nport = 7100\n[logging]\nlevel = \"debug\"").unwrap();

    let config = load_toml_config(Some(file.path())).unwrap();
    assert_eq!(config.server.port, 7100);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_load_missing_explicit_config_fails() {
    let result = load_toml_config(Some(Path::new("/nonexistent/ftr-rc.toml")));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_root_folder_cli_has_priority() {
    env::set_var(ROOT_FOLDER_ENV_VAR, "/tmp/ftr-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/ftr-toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(Some(Path::new("/tmp/ftr-cli")), &toml);
    assert_eq!(resolved, PathBuf::from("/tmp/ftr-cli"));

    env::remove_var(ROOT_FOLDER_ENV_VAR);
}

#[test]
#[serial]
fn test_root_folder_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV_VAR, "/tmp/ftr-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/ftr-toml")),
        ..Default::default()
    };

    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/tmp/ftr-env"));

    env::remove_var(ROOT_FOLDER_ENV_VAR);
}

#[test]
#[serial]
fn test_root_folder_falls_back_to_toml_then_default() {
    env::remove_var(ROOT_FOLDER_ENV_VAR);

    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/ftr-toml")),
        ..Default::default()
    };
    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/tmp/ftr-toml"));

    let resolved = resolve_root_folder(None, &TomlConfig::default());
    assert_eq!(resolved, default_root_folder());
}

#[test]
fn test_derived_paths() {
    let root = Path::new("/srv/ftr");
    assert_eq!(database_path(root), PathBuf::from("/srv/ftr/ftr.db"));
    assert_eq!(
        storage_path(root, "recoleccion_fotos"),
        PathBuf::from("/srv/ftr/storage/recoleccion_fotos")
    );
}

//! Bootstrap configuration loading and root folder resolution
//!
//! Configuration sources, highest priority first:
//! 1. Command-line arguments (passed in by the binary)
//! 2. Environment variables (`FTR_*`, plus the integration secrets)
//! 3. TOML config file
//! 4. Compiled defaults

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port for ftr-rc
pub const DEFAULT_PORT: u16 = 5731;

/// Environment variable naming an explicit TOML file
pub const CONFIG_ENV_VAR: &str = "FTR_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "FTR_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "ftr.db";

/// Bootstrap configuration loaded from TOML file
///
/// Every section is optional; missing keys fall back to compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database and the local object store
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pinning: PinningConfig,
    pub chain: ChainConfig,
    pub anchoring: AnchoringConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Object storage for collection photos
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket name; also the directory name under `<root>/storage`
    pub bucket: String,
    /// Base URL under which stored objects are publicly reachable.
    /// Defaults to this service's own `/storage/<bucket>` route.
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "recoleccion_fotos".to_string(),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    /// Public base URL, falling back to the service's static route
    pub fn resolved_public_base_url(&self, server: &ServerConfig) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}/storage/{}", server.bind_address(), self.bucket),
        }
    }
}

/// IPFS pinning service (Pinata)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinningConfig {
    pub jwt: Option<String>,
    /// Dedicated gateway domain, without scheme
    pub gateway_domain: Option<String>,
    pub api_url: String,
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            jwt: None,
            gateway_domain: None,
            api_url: "https://api.pinata.cloud".to_string(),
        }
    }
}

impl PinningConfig {
    pub fn is_enabled(&self) -> bool {
        is_set(&self.jwt) && is_set(&self.gateway_domain)
    }
}

/// EVM chain used to mint the traceability NFTs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub contract_address: Option<String>,
    /// Address receiving every minted token
    pub recipient: String,
    pub explorer_base_url: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            private_key: None,
            contract_address: None,
            recipient: "0x2440783D1d86D91118E7e19F62889dDc96775868".to_string(),
            explorer_base_url: "https://shannon-explorer.somnia.network".to_string(),
        }
    }
}

impl ChainConfig {
    pub fn is_enabled(&self) -> bool {
        is_set(&self.rpc_url) && is_set(&self.private_key) && is_set(&self.contract_address)
    }
}

/// Retry policy for metadata publishing and chain anchoring
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnchoringConfig {
    pub poll_interval_secs: u64,
    pub backoff_base_secs: u64,
    pub max_attempts: u32,
}

impl Default for AnchoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            backoff_base_secs: 30,
            max_attempts: 8,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read TOML failed ({}): {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply environment overrides from the process environment
    pub fn apply_process_env(&mut self) {
        self.apply_env_overrides(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` to read variables
    ///
    /// Secrets keep their conventional names so existing deployments
    /// (`PINATA_JWT`, `PRIVATE_KEY`, ...) work unchanged.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PINATA_JWT") {
            self.pinning.jwt = Some(v);
        }
        if let Some(v) = get("GATEWAY_URL") {
            self.pinning.gateway_domain = Some(v);
        }
        if let Some(v) = get("RPC_URL") {
            self.chain.rpc_url = Some(v);
        }
        if let Some(v) = get("PRIVATE_KEY") {
            self.chain.private_key = Some(v);
        }
        if let Some(v) = get("CONTRACT_ADDRESS") {
            self.chain.contract_address = Some(v);
        }
        if let Some(v) = get("FTR_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid FTR_PORT value '{}'", v),
            }
        }
    }
}

/// Locate and load the TOML config file
///
/// An explicit path (CLI or `FTR_CONFIG`) must exist. Without one, the
/// platform config locations are tried and compiled defaults are used when
/// none is present.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        info!("Loading config from {}", path.display());
        return TomlConfig::from_file(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        info!("Loading config from {} ({})", path.display(), CONFIG_ENV_VAR);
        return TomlConfig::from_file(&path);
    }

    for candidate in default_config_locations() {
        if candidate.exists() {
            info!("Loading config from {}", candidate.display());
            return TomlConfig::from_file(&candidate);
        }
    }

    warn!("No config file found, using compiled defaults");
    Ok(TomlConfig::default())
}

/// Platform config file candidates, in lookup order
fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("ftr").join("ftr-rc.toml"));
    }
    if cfg!(unix) {
        locations.push(PathBuf::from("/etc/ftr/ftr-rc.toml"));
    }
    locations
}

/// Root folder resolution:
/// 1. Command-line argument (highest priority)
/// 2. `FTR_ROOT_FOLDER` environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ftr"))
        .unwrap_or_else(|| PathBuf::from("./ftr_data"))
}

/// Database file location inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}

/// Directory backing an object storage bucket inside a root folder
pub fn storage_path(root_folder: &Path, bucket: &str) -> PathBuf {
    root_folder.join("storage").join(bucket)
}

//! Configuration loading and run-size profile resolution
//!
//! Settings are resolved once at startup, in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The resolved [`RunSettings`] is handed to the pipeline; stages never read
//! the environment themselves.

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable selecting the run profile by name
pub const ENV_PROFILE: &str = "BGGFINNA_PROFILE";
/// Legacy test switch: "2" selects smoke, any other non-empty value reduced
pub const ENV_TEST: &str = "BGGFINNA_TEST";
/// Environment variable overriding the data root folder
pub const ENV_DATA_ROOT: &str = "BGGFINNA_DATA_ROOT";
/// Environment variable pointing at a TOML config file
pub const ENV_CONFIG: &str = "BGGFINNA_CONFIG";
pub const ENV_MAX_RETRIES: &str = "BGGFINNA_MAX_RETRIES";
pub const ENV_BASE_DELAY: &str = "BGGFINNA_BASE_DELAY";
pub const ENV_PENDING_DELAY: &str = "BGGFINNA_BGG_202_DELAY";

const DEFAULT_DATA_ROOT: &str = "data";
const DEFAULT_REDUCED_LIMIT: usize = 10;
const CONFIG_FILE_NAME: &str = "bggfinna.toml";

/// Run-size profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunProfile {
    /// Every catalog record, production output folder
    #[default]
    Full,
    /// Bounded record count, test output folder
    Reduced,
    /// Single record, smoke output folder
    Smoke,
}

impl RunProfile {
    /// Interpret the legacy `BGGFINNA_TEST` switch
    pub fn from_test_switch(value: &str) -> Option<Self> {
        match value.trim() {
            "" => None,
            "2" => Some(RunProfile::Smoke),
            _ => Some(RunProfile::Reduced),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunProfile::Full => "full",
            RunProfile::Reduced => "reduced",
            RunProfile::Smoke => "smoke",
        }
    }

    /// Resolve volume and output location for this profile
    pub fn resolve(self, data_root: &Path, reduced_limit: usize) -> RunSettings {
        let (record_limit, output_dir) = match self {
            RunProfile::Full => (None, data_root.to_path_buf()),
            RunProfile::Reduced => (Some(reduced_limit.max(1)), data_root.join("test")),
            RunProfile::Smoke => (Some(1), data_root.join("smoke")),
        };
        RunSettings {
            profile: self,
            record_limit,
            output_dir,
        }
    }
}

impl FromStr for RunProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "production" => Ok(RunProfile::Full),
            "reduced" | "test" => Ok(RunProfile::Reduced),
            "smoke" => Ok(RunProfile::Smoke),
            other => Err(Error::Config(format!(
                "Unknown run profile '{}' (expected full, reduced or smoke)",
                other
            ))),
        }
    }
}

impl fmt::Display for RunProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volume and output location for one run, resolved from the profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub profile: RunProfile,
    /// Maximum number of catalog records; None for no limit
    pub record_limit: Option<usize>,
    /// Folder receiving every artifact of the run
    pub output_dir: PathBuf,
}

impl RunSettings {
    pub fn database_path(&self) -> PathBuf {
        self.output_dir.join("boardgames.db")
    }

    /// Create the output folder (safe to call repeatedly)
    pub fn ensure_output_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

/// Bootstrap configuration loaded from TOML file
///
/// Every field is optional; a missing file means all defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Root folder for artifacts (profiles add their subfolder)
    #[serde(default)]
    pub data_root: Option<PathBuf>,

    /// Run profile name (full, reduced, smoke)
    #[serde(default)]
    pub profile: Option<String>,

    /// Record count for the reduced profile
    #[serde(default)]
    pub reduced_limit: Option<usize>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub matcher: MatcherConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Library catalog query settings
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Catalog API base URL
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    /// Holding-location filter (Finna building code)
    #[serde(default = "default_building")]
    pub building: String,
    /// Free-text query; empty lists everything in the building
    #[serde(default)]
    pub lookfor: String,
    /// Records per page (Finna allows up to 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            building: default_building(),
            lookfor: String::new(),
            page_size: default_page_size(),
        }
    }
}

fn default_catalog_url() -> String {
    "https://api.finna.fi/v1".to_string()
}

fn default_building() -> String {
    "0/Keski/".to_string()
}

fn default_page_size() -> usize {
    100
}

/// Title matching tunables
#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    /// Minimum similarity (0.0-1.0) for accepting a fuzzy candidate
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
        }
    }
}

fn default_acceptance_threshold() -> f64 {
    0.85
}

/// Ranking API access and retry tunables
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_bgg_url")]
    pub base_url: String,
    /// Maximum ids per detail request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Attempts per batch before it times out
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff after a "not ready" response
    #[serde(default = "default_pending_delay_ms")]
    pub pending_delay_ms: u64,
    /// Backoff cap
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total backoff budget per batch
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Fixed wait after a rate-limited request
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    /// Minimum spacing between consecutive ranking API requests
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_bgg_url(),
            max_batch_size: default_max_batch_size(),
            max_attempts: default_max_attempts(),
            pending_delay_ms: default_pending_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_wait_ms: default_max_wait_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

fn default_bgg_url() -> String {
    "https://boardgamegeek.com/xmlapi2".to_string()
}

fn default_max_batch_size() -> usize {
    20
}

fn default_max_attempts() -> u32 {
    6
}

fn default_pending_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_wait_ms() -> u64 {
    120_000
}

fn default_rate_limit_delay_ms() -> u64 {
    5000
}

fn default_min_request_interval_ms() -> u64 {
    2000
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load config from an explicit path, `BGGFINNA_CONFIG`, or the default
    /// locations. A missing file yields defaults; a malformed one is an error.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from));

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Some(path)
            }
            None => default_config_locations().into_iter().find(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply retry tunables from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Some(attempts) = env_parse::<u32>(ENV_MAX_RETRIES) {
            self.enrichment.max_attempts = attempts.max(1);
        }
        if let Some(seconds) = env_parse::<f64>(ENV_BASE_DELAY) {
            self.enrichment.rate_limit_delay_ms = seconds_to_ms(seconds);
        }
        if let Some(seconds) = env_parse::<f64>(ENV_PENDING_DELAY) {
            self.enrichment.pending_delay_ms = seconds_to_ms(seconds);
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}='{}': not a valid number", name, raw);
            None
        }
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Candidate config file locations, most specific first
fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("bggfinna").join("config.toml"));
    }
    locations
}

/// Resolve the run profile
///
/// **Priority:** CLI → `BGGFINNA_PROFILE` → `BGGFINNA_TEST` → TOML → full
pub fn resolve_profile(cli_profile: Option<&str>, toml_config: &TomlConfig) -> Result<RunProfile> {
    if let Some(name) = cli_profile {
        return name.parse();
    }

    if let Ok(name) = std::env::var(ENV_PROFILE) {
        if !name.trim().is_empty() {
            return name.parse();
        }
    }

    if let Ok(switch) = std::env::var(ENV_TEST) {
        if let Some(profile) = RunProfile::from_test_switch(&switch) {
            return Ok(profile);
        }
    }

    if let Some(name) = &toml_config.profile {
        return name.parse();
    }

    Ok(RunProfile::Full)
}

/// Resolve the data root folder
///
/// **Priority:** CLI → `BGGFINNA_DATA_ROOT` → TOML → `data`
pub fn resolve_data_root(cli_data_root: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_data_root {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ENV_DATA_ROOT) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    toml_config
        .data_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT))
}

/// Resolve the complete run settings in one place
pub fn resolve_run_settings(
    cli_profile: Option<&str>,
    cli_data_root: Option<&Path>,
    toml_config: &TomlConfig,
) -> Result<RunSettings> {
    let profile = resolve_profile(cli_profile, toml_config)?;
    let data_root = resolve_data_root(cli_data_root, toml_config);
    let reduced_limit = toml_config.reduced_limit.unwrap_or(DEFAULT_REDUCED_LIMIT);

    let settings = profile.resolve(&data_root, reduced_limit);
    info!(
        profile = %settings.profile,
        record_limit = ?settings.record_limit,
        output_dir = %settings.output_dir.display(),
        "Run settings resolved"
    );
    Ok(settings)
}

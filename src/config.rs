// src/config.rs

//! Daemon configuration
//!
//! Settings are read from a YAML document, overlaid with `IMAGESYNC_*`
//! environment variables and validated once. Everything downstream works on
//! the typed [`Settings`] value, never on raw maps.
//!
//! # Example config.yaml
//!
//! ```yaml
//! output_directory: /var/lib/imagesync
//! cloud_name: prod-cloud
//! name_prefix: auto-sync/
//! frequency: 3600
//! mirrors:
//!   - url: http://cloud-images.ubuntu.com/releases
//!     path: streams/v1/index.sjson
//!     max_items: 2
//!     item_filters:
//!       - release~(jammy|noble)
//!       - arch~(x86_64|amd64)
//!       - ftype~(disk1.img|disk.img)
//!     regions: [RegionOne]
//!     visibility: public
//!     latest_property: true
//! ```

use crate::error::{Error, Result};
use crate::filter::ItemFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "IMAGESYNC_";

/// Keyring the Ubuntu cloud image catalogs are signed against
pub const DEFAULT_KEYRING: &str = "/usr/share/keyrings/ubuntu-cloudimage-keyring.gpg";

/// Visibility applied to published images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Community,
    Shared,
}

/// Ordering applied to version names within a product family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VersionOrder {
    /// Byte-wise string comparison (simplestreams date serials sort correctly)
    #[default]
    Lexical,
    /// Semantic version comparison, falling back to lexical
    Semantic,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One source-to-target synchronization unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// URL of the mirror
    pub url: String,

    /// Path to the index or products document in the mirror
    pub path: String,

    /// Store at most this many versions per product family in the target
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Keep versions past `max_items` while the source still lists them
    #[serde(default)]
    pub keep_items: bool,

    /// Filter expressions, combined with logical AND
    #[serde(default = "default_item_filters")]
    pub item_filters: Vec<String>,

    /// Regions to operate on
    #[serde(default)]
    pub regions: Vec<String>,

    /// Set `hypervisor_type` on stored images
    #[serde(default)]
    pub hypervisor_mapping: bool,

    /// Extra properties added to every published image
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,

    #[serde(default)]
    pub visibility: Visibility,

    /// Content id for published data; may contain `{region}` or `%(region)s`
    #[serde(default = "default_content_id")]
    pub content_id: String,

    /// Import images through the conversion path (to raw)
    #[serde(default)]
    pub image_conversion: bool,

    /// Mark the newest image per os_version/architecture with `latest=true`
    #[serde(default)]
    pub latest_property: bool,

    #[serde(default)]
    pub version_order: VersionOrder,
}

fn default_max_items() -> usize {
    1
}

fn default_item_filters() -> Vec<String> {
    vec![
        "arch~(x86_64|amd64)".to_string(),
        "ftype~(disk1.img|disk.img)".to_string(),
    ]
}

fn default_content_id() -> String {
    "{region}".to_string()
}

impl MirrorConfig {
    /// Build a mirror with every optional field at its default
    pub fn new(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            max_items: default_max_items(),
            keep_items: false,
            item_filters: default_item_filters(),
            regions: Vec::new(),
            hypervisor_mapping: false,
            custom_properties: BTreeMap::new(),
            visibility: Visibility::default(),
            content_id: default_content_id(),
            image_conversion: false,
            latest_property: false,
            version_order: VersionOrder::default(),
        }
    }

    /// Content id with the region substituted
    pub fn content_id_for(&self, region: &str) -> String {
        self.content_id
            .replace("%(region)s", region)
            .replace("{region}", region)
    }

    /// Parsed filter expressions
    pub fn filters(&self) -> Result<Vec<ItemFilter>> {
        self.item_filters.iter().map(|f| ItemFilter::parse(f)).collect()
    }

    fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::ConfigError("mirror url must not be empty".to_string()));
        }
        if self.max_items == 0 {
            return Err(Error::ConfigError(format!(
                "mirror {}: max_items must be at least 1",
                self.url
            )));
        }
        if self.content_id.trim().is_empty() {
            return Err(Error::ConfigError(format!(
                "mirror {}: content_id must not be empty",
                self.url
            )));
        }
        for region in &self.regions {
            if region.is_empty() || region.contains('/') || region == "." || region == ".." {
                return Err(Error::ConfigError(format!(
                    "mirror {}: invalid region name '{}'",
                    self.url, region
                )));
            }
        }
        self.filters()?;
        Ok(())
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<MirrorConfig>,

    /// Root of the per-region object stores
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Unique name for this cloud, used to tag owned images
    #[serde(default = "default_cloud_name")]
    pub cloud_name: String,

    /// Prefix for published image names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Seconds between the start of two passes
    #[serde(default = "default_frequency")]
    pub frequency: u64,

    /// OpenPGP keyring used to verify signed catalogs
    #[serde(default = "default_keyring")]
    pub keyring: PathBuf,

    #[serde(default)]
    pub logging: LogConfig,
}

fn default_mirrors() -> Vec<MirrorConfig> {
    let mut mirror = MirrorConfig::new(
        "http://cloud-images.ubuntu.com/releases",
        "streams/v1/index.sjson",
    );
    mirror.item_filters = vec![
        "release~(focal|jammy|noble)".to_string(),
        "arch~(x86_64|amd64|arm64)".to_string(),
        "ftype~(disk1.img|disk.img)".to_string(),
    ];
    mirror.regions = vec!["RegionOne".to_string()];
    vec![mirror]
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("/tmp/simplestreams")
}

fn default_cloud_name() -> String {
    "simplestreams-glance-sync".to_string()
}

fn default_name_prefix() -> String {
    "auto-sync/".to_string()
}

fn default_frequency() -> u64 {
    3600
}

fn default_keyring() -> PathBuf {
    PathBuf::from(DEFAULT_KEYRING)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mirrors: default_mirrors(),
            output_directory: default_output_directory(),
            cloud_name: default_cloud_name(),
            name_prefix: default_name_prefix(),
            frequency: default_frequency(),
            keyring: default_keyring(),
            logging: LogConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file, apply environment overrides
    /// and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::ConfigError(format!("Failed to read {}: {e}", path.display()))
                })?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };
        let settings = settings.with_overrides(std::env::vars())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a YAML document without validating it
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Serialize to YAML (used by `generate-config`)
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `IMAGESYNC_*` overrides from the given variables
    pub fn with_overrides<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            debug!("Applying environment override {}", key);
            match name {
                "OUTPUT_DIRECTORY" => self.output_directory = PathBuf::from(value),
                "CLOUD_NAME" => self.cloud_name = value,
                "NAME_PREFIX" => self.name_prefix = value,
                "KEYRING" => self.keyring = PathBuf::from(value),
                "FREQUENCY" => {
                    self.frequency = value.parse().map_err(|_| {
                        Error::ConfigError(format!("{key}: '{value}' is not a number of seconds"))
                    })?;
                }
                "LOG_LEVEL" => self.logging.level = value,
                "LOG_FORMAT" => {
                    self.logging.format = value.parse().map_err(|_| {
                        Error::ConfigError(format!("{key}: unknown log format '{value}'"))
                    })?;
                }
                _ => {}
            }
        }
        Ok(self)
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.frequency == 0 {
            return Err(Error::ConfigError("frequency must be positive".to_string()));
        }
        if self.cloud_name.trim().is_empty() {
            return Err(Error::ConfigError("cloud_name must not be empty".to_string()));
        }
        if self.output_directory.as_os_str().is_empty() {
            return Err(Error::ConfigError(
                "output_directory must not be empty".to_string(),
            ));
        }
        for mirror in &self.mirrors {
            mirror.validate()?;
        }
        Ok(())
    }

    /// Interval between pass starts
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.frequency)
    }

    /// Object store directory of a region
    pub fn region_directory(&self, region: &str) -> PathBuf {
        self.output_directory.join(region)
    }
}

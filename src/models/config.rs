//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Registry query settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Snapshot file location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Delta reporting rules
    #[serde(default)]
    pub diff: DiffConfig,

    /// Table image output
    #[serde(default)]
    pub render: RenderConfig,

    /// Social post settings
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        let registry = &self.registry;
        if registry.user_agent.trim().is_empty() {
            return Err(AppError::validation("registry.user_agent is empty"));
        }
        if registry.timeout_secs == 0 {
            return Err(AppError::validation("registry.timeout_secs must be > 0"));
        }
        if registry.licensee.trim().is_empty() {
            return Err(AppError::validation("registry.licensee is empty"));
        }
        if !registry
            .prefecture
            .ends_with(crate::services::listing::REGION_SUFFIXES)
        {
            return Err(AppError::validation(format!(
                "registry.prefecture '{}' is not a prefecture name",
                registry.prefecture
            )));
        }
        url::Url::parse(&registry.endpoint)?;
        registry.milli_wave.validate("registry.milli_wave")?;
        registry.sub6.validate("registry.sub6")?;

        if self.storage.dir.trim().is_empty() {
            return Err(AppError::validation("storage.dir is empty"));
        }
        if self.publish.max_weight == 0 {
            return Err(AppError::validation("publish.max_weight must be > 0"));
        }
        if !self.publish.template.contains("{summary}") {
            return Err(AppError::validation(
                "publish.template must contain {summary}",
            ));
        }
        if self.publish.enabled
            && self.publish.template.contains("{link}")
            && self.publish.link.trim().is_empty()
        {
            return Err(AppError::validation(
                "publish.link is empty but the template uses {link}",
            ));
        }
        Ok(())
    }
}

/// Registry endpoint and search filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Search endpoint
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay after each request in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Licensee name filter (`NA`)
    #[serde(default = "defaults::licensee")]
    pub licensee: String,

    /// Regional bureau code for the listing query (`IT`)
    #[serde(default = "defaults::jurisdiction")]
    pub jurisdiction: String,

    /// Prefecture code for the band queries (`HCV`)
    #[serde(default = "defaults::region_code")]
    pub region_code: String,

    /// Target prefecture header as it appears in listings
    #[serde(default = "defaults::prefecture")]
    pub prefecture: String,

    /// Millimeter-wave band filter
    #[serde(default = "defaults::milli_wave")]
    pub milli_wave: BandFilter,

    /// Sub-6 band filter
    #[serde(default = "defaults::sub6")]
    pub sub6: BandFilter,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            licensee: defaults::licensee(),
            jurisdiction: defaults::jurisdiction(),
            region_code: defaults::region_code(),
            prefecture: defaults::prefecture(),
            milli_wave: defaults::milli_wave(),
            sub6: defaults::sub6(),
        }
    }
}

/// Frequency range filter (`FF`, `TF`, `HZ`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandFilter {
    /// Lower bound, as sent
    pub lower: String,

    /// Upper bound, as sent
    pub upper: String,

    /// Unit code: 1 kHz, 2 MHz, 3 GHz
    pub unit: u8,
}

impl BandFilter {
    fn validate(&self, name: &str) -> Result<()> {
        let lower: f64 = self
            .lower
            .parse()
            .map_err(|_| AppError::validation(format!("{name}.lower is not a number")))?;
        let upper: f64 = self
            .upper
            .parse()
            .map_err(|_| AppError::validation(format!("{name}.upper is not a number")))?;
        if lower >= upper {
            return Err(AppError::validation(format!(
                "{name}: lower must be below upper"
            )));
        }
        if !(1..=3).contains(&self.unit) {
            return Err(AppError::validation(format!("{name}.unit must be 1, 2 or 3")));
        }
        Ok(())
    }
}

/// Snapshot file location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: defaults::storage_dir(),
        }
    }
}

/// Delta reporting rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// District prefixes stripped from municipality names in summaries
    #[serde(default = "defaults::strip_prefixes")]
    pub strip_prefixes: Vec<String>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            strip_prefixes: defaults::strip_prefixes(),
        }
    }
}

/// Table image output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Output directory for rendered tables
    #[serde(default = "defaults::render_dir")]
    pub dir: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            dir: defaults::render_dir(),
        }
    }
}

/// Social post settings. Credentials come from the environment only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Off unless switched on explicitly
    #[serde(default)]
    pub enabled: bool,

    /// Post template
    ///
    /// Placeholders: `{updated}`, `{prefecture}`, `{licensee}`, `{summary}`,
    /// `{link}`, `{hashtags}`
    #[serde(default = "defaults::template")]
    pub template: String,

    /// Link to the published spreadsheet
    #[serde(default)]
    pub link: String,

    #[serde(default = "defaults::hashtags")]
    pub hashtags: Vec<String>,

    /// Weighted length limit of a post
    #[serde(default = "defaults::max_weight")]
    pub max_weight: usize,

    /// Post creation endpoint
    #[serde(default = "defaults::post_endpoint")]
    pub post_endpoint: String,

    /// Media upload endpoint
    #[serde(default = "defaults::media_endpoint")]
    pub media_endpoint: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            template: defaults::template(),
            link: String::new(),
            hashtags: defaults::hashtags(),
            max_weight: defaults::max_weight(),
            post_endpoint: defaults::post_endpoint(),
            media_endpoint: defaults::media_endpoint(),
        }
    }
}

mod defaults {
    use super::BandFilter;

    // Registry defaults
    pub fn endpoint() -> String {
        "https://www.tele.soumu.go.jp/musen/list".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; musen-tracker/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn licensee() -> String {
        "楽天モバイル".into()
    }
    pub fn jurisdiction() -> String {
        "G".into()
    }
    pub fn region_code() -> String {
        "38000".into()
    }
    pub fn prefecture() -> String {
        "愛媛県".into()
    }
    pub fn milli_wave() -> BandFilter {
        BandFilter {
            lower: "26.5".into(),
            upper: "29.5".into(),
            unit: 3,
        }
    }
    pub fn sub6() -> BandFilter {
        BandFilter {
            lower: "3300".into(),
            upper: "4200".into(),
            unit: 2,
        }
    }

    // Storage defaults
    pub fn storage_dir() -> String {
        "csv".into()
    }

    // Diff defaults
    pub fn strip_prefixes() -> Vec<String> {
        [
            "越智郡",
            "上浮穴郡",
            "伊予郡",
            "喜多郡",
            "西宇和郡",
            "北宇和郡",
            "南宇和郡",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    // Render / publish defaults
    pub fn enabled() -> bool {
        true
    }
    pub fn render_dir() -> String {
        "images".into()
    }
    pub fn template() -> String {
        "{updated}現在\n\n{prefecture}の{licensee}の基地局数\n\n{summary}\n\n{link}\n\n{hashtags}"
            .into()
    }
    pub fn hashtags() -> Vec<String> {
        vec!["楽天モバイル".into(), "愛媛".into(), "基地局".into()]
    }
    pub fn max_weight() -> usize {
        280
    }
    pub fn post_endpoint() -> String {
        "https://api.x.com/2/tweets".into()
    }
    pub fn media_endpoint() -> String {
        "https://api.x.com/2/media/upload".into()
    }
}

//! Our configuration file.
//!
//! Everything has a default, so the config file is optional, and any section
//! may be left out. The file may be TOML or JSON.

use std::time::Duration;

use schemars::JsonSchema;

use crate::{
    async_utils::io::read_json_or_toml, layout::LayoutConfig, parser::ParserConfig,
    prelude::*, rate_limit::RateLimit,
};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Page layout and rendering resolution.
    pub layout: LayoutConfig,
    /// PDF rendering.
    pub render: RenderConfig,
    /// Field parsing.
    pub parser: ParserConfig,
    /// The local `tesseract` extractor.
    pub tesseract: TesseractConfig,
    /// The Google Cloud Vision extractor.
    pub vision: VisionConfig,
    /// The repair cascade.
    pub repair: RepairConfig,
}

impl Config {
    /// Load our config from `path`, or use the defaults.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let config = read_json_or_toml::<Config>(path).await?;
                debug!(?config, "Loaded config");
                Ok(config)
            }
            None => Ok(Config::default()),
        }
    }
}

/// Settings for rendering PDF pages.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Give up on rendering a page after this many seconds.
    pub timeout_secs: u64,
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

/// Settings for the local `tesseract` extractor.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TesseractConfig {
    /// The `tesseract` executable.
    pub command: String,
    /// Tesseract language codes, such as `ben` or `ben+eng`.
    pub language: String,
    /// Page segmentation mode (`--psm`).
    pub psm: Option<u32>,
    /// OCR engine mode (`--oem`).
    pub oem: Option<u32>,
    /// Give up on a box after this many seconds.
    pub timeout_secs: u64,
}

impl TesseractConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".to_owned(),
            language: "ben".to_owned(),
            psm: Some(6),
            oem: Some(1),
            timeout_secs: 60,
        }
    }
}

/// Settings for the Google Cloud Vision extractor.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionConfig {
    /// The `images:annotate` endpoint.
    pub endpoint: String,
    /// The environment variable holding our API key.
    pub api_key_var: String,
    /// Language hint passed to the API.
    pub language_hint: String,
    /// Give up on a request after this many seconds.
    pub timeout_secs: u64,
}

impl VisionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com/v1/images:annotate".to_owned(),
            api_key_var: "GOOGLE_VISION_API_KEY".to_owned(),
            language_hint: "bn".to_owned(),
            timeout_secs: 60,
        }
    }
}

/// Settings for the repair cascade.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepairConfig {
    /// Maximum rate of paid OCR calls, such as `"2/s"`.
    #[schemars(with = "String")]
    pub rate_limit: RateLimit,
}

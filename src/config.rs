use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    pub providers: ProviderEndpoints,
    pub image: ImageConfig,
    pub analysis: AnalysisConfig,
    pub limits: UploadLimits,
    pub data_dir: PathBuf,
}

/// The no-credential fallback analysis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub url: String,
    pub model: String,
}

impl ProviderEndpoint {
    fn new(url: &str, model: &str) -> Self {
        Self {
            url: url.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoints {
    pub openai: ProviderEndpoint,
    pub anthropic: ProviderEndpoint,
    pub gemini: ProviderEndpoint,
    pub deepseek: ProviderEndpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub max_width: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Delay between the start of consecutive per-item requests.
    pub stagger_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_batch_files: usize,
    pub max_file_bytes: u64,
    pub max_archive_bytes: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8787/analyze-photo".to_string(),
            api_key: None,
        }
    }
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: ProviderEndpoint::new(
                "https://api.openai.com/v1/chat/completions",
                "gpt-4o-mini",
            ),
            anthropic: ProviderEndpoint::new(
                "https://api.anthropic.com/v1/messages",
                "claude-3-5-sonnet-20241022",
            ),
            gemini: ProviderEndpoint::new(
                "https://generativelanguage.googleapis.com/v1beta/models",
                "gemini-2.0-flash",
            ),
            deepseek: ProviderEndpoint::new(
                "https://api.deepseek.com/chat/completions",
                "deepseek-chat",
            ),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            jpeg_quality: 80,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stagger_interval_ms: 300,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_batch_files: 200,
            max_file_bytes: 10 * 1024 * 1024,
            max_archive_bytes: 100 * 1024 * 1024,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            providers: ProviderEndpoints::default(),
            image: ImageConfig::default(),
            analysis: AnalysisConfig::default(),
            limits: UploadLimits::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    /// Load `<data_dir>/config.json` if present, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = std::env::var_os("SWEEPRS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let mut config = Self::load_from(&data_dir.join(CONFIG_FILE_NAME))?;
        config.data_dir = data_dir;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SWEEPRS_ENDPOINT_URL") {
            self.endpoint.url = url;
        }
        if let Ok(key) = std::env::var("SWEEPRS_ENDPOINT_KEY") {
            self.endpoint.api_key = Some(key).filter(|k| !k.is_empty());
        }
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("sweeprs")
}

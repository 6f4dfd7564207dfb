use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::models::{IndicatorSelection, Period};

// CONFIGURATION STRUCTS
// Every field is defaulted so an older config.json keeps loading after new keys are added.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String, // e.g., "https://query1.finance.yahoo.com"
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NewsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://newsapi.org".to_string(),
            api_key: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: Option<u64>, // None keeps entries until cleared by hand
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChartConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub news: NewsConfig,
    pub cache: CacheConfig,
    pub chart: ChartConfig,
    pub default_period: Period,
    pub default_indicators: IndicatorSelection,
    pub export_dir: Option<PathBuf>, // relative paths resolve against the storage dir
}

impl AppConfig {
    /// API key from `NEWS_API_KEY`, falling back to the configured one.
    pub fn news_api_key(&self) -> Option<String> {
        std::env::var("NEWS_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.news.api_key.clone())
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage directory next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);
        Self::at(base_dir).await
    }

    /// Storage rooted at an explicit directory, created if missing.
    pub async fn at<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    /// Serializes `data` to `<filename>.json` with an atomic write.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let json_bytes = serde_json::to_vec_pretty(data)?;
        self.save_bytes(&format!("{}.json", filename), &json_bytes)
            .await?;
        Ok(())
    }

    /// Writes raw bytes to `file_name` inside the storage dir via tmp + rename.
    pub async fn save_bytes(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let final_path = self.base_dir.join(file_name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // the previous file stays intact if we die mid-write
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &final_path).await?;

        Ok(final_path)
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        // serde_json validates UTF-8 itself
        let content = fs::read(path).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `config.json`, writing defaults out when the file does not exist yet.
    pub async fn load_config(&self) -> anyhow::Result<AppConfig> {
        let path = self.base_dir.join("config.json");
        if !path.exists() {
            let config = AppConfig::default();
            self.save("config", &config).await?;
            info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }

        match self.load::<AppConfig>("config").await {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(error = %e, "Failed to parse config.json, using defaults");
                Ok(AppConfig::default())
            }
        }
    }

    /// Directory exports are written to.
    pub fn export_dir(&self, config: &AppConfig) -> PathBuf {
        match &config.export_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.join("exports"),
        }
    }
}

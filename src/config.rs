use std::path::{Path, PathBuf};
use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::core::{Result, SettingsStore, UploadPolicy};
use crate::uploaders::simulated::{DEFAULT_BASE_URL, DEFAULT_CHUNK_DELAY};
use crate::uploaders::http::DEFAULT_TIMEOUT;

pub const DEFAULT_CONFIG_FILE: &str = "swiftdrop.toml";

/// Contents of the settings file.
///
/// ```toml
/// [policy]
/// max_file_size = 10485760
/// allowed_types = ["image/png", "application/pdf"]
/// max_concurrent_uploads = 3
/// auto_compress = false
///
/// [engine]
/// endpoint = "https://uploads.example.com/api/files"
/// ```
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub policy: UploadPolicy,
    pub engine: EngineConfig,
}

/// 传输引擎配置
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Multipart endpoint. Without one the simulated engine is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub chunk_delay_ms: u64,
    pub result_base_url: String,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            chunk_delay_ms: DEFAULT_CHUNK_DELAY.as_millis() as u64,
            result_base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl EngineConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.policy.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_toml_str(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, self.to_toml_string()?).await?;
        Ok(())
    }
}

/// 设置文件 - keeps the policy in the `[policy]` table of a TOML file and
/// leaves the rest of the file alone.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<UploadPolicy> {
        Ok(AppConfig::load(&self.path).await?.policy)
    }

    async fn save(&self, policy: &UploadPolicy) -> Result<UploadPolicy> {
        policy.validate()?;

        let mut config = AppConfig::load(&self.path).await?;
        config.policy = policy.clone();
        config.save(&self.path).await?;

        debug!(path = %self.path.display(), "settings saved");
        Ok(config.policy)
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) mod directory;
pub(crate) mod tags;

/// Default directory holding the per-environment config files.
pub(crate) const DEFAULT_CONFIG_DIR: &str = "./resources/config";

/// Default environment name used to pick `conf.<env>.toml`.
pub(crate) const DEFAULT_ENVIRONMENT: &str = "dev";

#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

pub(crate) type ConfigResult<T> = Result<T, ConfigError>;

/// Remote catalog and resolver endpoints plus what to search for.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct CatalogConfig {
    pub base_url: String,
    pub search_api: String,
    pub resolve_api: String,
    pub page_size: u32,
    /// Searched in order; each keyword is paged until exhausted.
    pub keywords: Vec<String>,
    /// Quality tiers, preferred first.
    pub quality: Vec<String>,
    pub unlock_code: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

/// Fixed pacing delays. These are not retries.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct PacingConfig {
    pub page_cooldown_secs: u64,
    pub failure_penalty_secs: u64,
    pub item_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct RetryConfig {
    pub attempts: u32,
    pub base_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct FilesConfig {
    /// Extension used when the first quality tier resolves.
    pub lossless_extension: String,
    /// Extension used for every fallback tier.
    pub lossy_extension: String,
    pub cover_file_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct CleanConfig {
    pub passes: u32,
    pub exclude_keywords: Vec<String>,
}

/// The whole runtime configuration, built once at startup and handed to every component.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Config {
    pub worker_count: usize,
    pub save_path: String,
    pub catalog: CatalogConfig,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub files: FilesConfig,
    pub clean: CleanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 4,
            save_path: "./music".to_string(),
            catalog: CatalogConfig {
                base_url: "http://127.0.0.1:8080".to_string(),
                search_api: "music/search".to_string(),
                resolve_api: "music/url/qq".to_string(),
                page_size: 10,
                keywords: vec!["周杰伦".to_string()],
                quality: vec!["flac".to_string(), "320".to_string(), "128".to_string()],
                unlock_code: String::new(),
                user_agent: "Mozilla/5.0 (compatible;)".to_string(),
                request_timeout_secs: 120,
            },
            pacing: PacingConfig {
                page_cooldown_secs: 5,
                failure_penalty_secs: 15,
                item_delay_secs: 3,
            },
            retry: RetryConfig {
                attempts: 3,
                base_delay_secs: 2,
            },
            files: FilesConfig {
                lossless_extension: "flac".to_string(),
                lossy_extension: "mp3".to_string(),
                cover_file_name: "cover.jpg".to_string(),
            },
            clean: CleanConfig {
                passes: 3,
                exclude_keywords: default_exclude_keywords(),
            },
        }
    }
}

impl Config {
    /// Loads and validates the config at `path`.
    pub(crate) fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Writes the default config to `path`, creating parent directories.
    pub(crate) fn create_default(path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(&Config::default())?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".to_string()));
        }
        if self.save_path.trim().is_empty() {
            return Err(ConfigError::Invalid("save_path must not be empty".to_string()));
        }
        if self.catalog.page_size == 0 {
            return Err(ConfigError::Invalid("catalog.page_size must be at least 1".to_string()));
        }
        if self.catalog.quality.is_empty() {
            return Err(ConfigError::Invalid("catalog.quality needs at least one tier".to_string()));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub(crate) fn save_dir(&self) -> PathBuf {
        PathBuf::from(&self.save_path)
    }

    pub(crate) fn page_cooldown(&self) -> Duration {
        Duration::from_secs(self.pacing.page_cooldown_secs)
    }

    pub(crate) fn failure_penalty(&self) -> Duration {
        Duration::from_secs(self.pacing.failure_penalty_secs)
    }

    pub(crate) fn item_delay(&self) -> Duration {
        Duration::from_secs(self.pacing.item_delay_secs)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.request_timeout_secs)
    }
}

/// Resolves the config path from the environment, the way deployments lay it out:
/// `$CONFIG_FILE/conf.$ENVIRONMENT.toml`.
pub(crate) fn config_path_from_env() -> PathBuf {
    let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| {
        info!("ENVIRONMENT not set, defaulting to \"{}\"", DEFAULT_ENVIRONMENT);
        DEFAULT_ENVIRONMENT.to_string()
    });
    let dir = std::env::var("CONFIG_FILE").unwrap_or_else(|_| {
        info!("CONFIG_FILE not set, defaulting to \"{}\"", DEFAULT_CONFIG_DIR);
        DEFAULT_CONFIG_DIR.to_string()
    });

    Path::new(&dir).join(format!("conf.{env}.toml"))
}

fn default_exclude_keywords() -> Vec<String> {
    [
        "live", "cover", "ktv", "FM", "AKA", "专属", "薇澜", "纯音乐", "赵鹏", "获奖感言", "混音",
        "MZ", "dj", "3D", "remix", "instrument", "绯绯Feifei", "铃声", "伴奏", "改编",
        "翻奏", "现场", "未知歌手", "音悦汇", "灰色轨迹2002", "网络歌手", "原唱", "遛狗天才",
        "淘漉音乐", "沐夕MuXi", "沉默的曾大炮", "民谣老潘", "演奏曲", "解忧音乐厅", "键盘", "闯王",
        "词曲", "翻唱", "工作室", "网友", "演奏", "精选集", "全球音乐吧", "刘京小提琴", "弹唱",
        "抖音", "一坨坨坨子", "yayun811224", "NJ浩瀚", "krav8888888", "Kecs1", "前奏",
        "1056声音日记", "慧缘", "演唱会", "许巍", "车载",
    ]
    .iter()
    .map(|keyword| keyword.to_string())
    .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Config;

    /// A config with every delay zeroed so tests never sleep.
    pub(crate) fn quiet_config(save_path: &str) -> Config {
        let mut config = Config::default();
        config.save_path = save_path.to_string();
        config.pacing.page_cooldown_secs = 0;
        config.pacing.failure_penalty_secs = 0;
        config.pacing.item_delay_secs = 0;
        config.retry.base_delay_secs = 0;
        config
    }
}

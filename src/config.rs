use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub mailbox: MailboxConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailboxConfig {
    /// Base URL of the Gmail-style mailbox API, up to and including the
    /// user segment (e.g. `https://gmail.googleapis.com/gmail/v1/users/me`).
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_mailbox_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Chat-completions style endpoint of the remote text classifier.
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Cap on concurrently in-flight attachment requests within one scan.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Idle pause inserted after each batch of processed messages.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

fn default_page_size() -> u32 {
    25
}
fn default_mailbox_timeout_secs() -> u64 {
    30
}
fn default_classifier_timeout_secs() -> u64 {
    20
}
fn default_max_excerpt_chars() -> usize {
    4000
}
fn default_max_completion_tokens() -> u32 {
    8
}
fn default_api_key_env() -> String {
    "WDX_CLASSIFIER_API_KEY".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_batch_pause_ms() -> u64 {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.mailbox.base_url.trim().is_empty() {
        anyhow::bail!("mailbox.base_url must not be empty");
    }

    if config.mailbox.page_size == 0 || config.mailbox.page_size > 100 {
        anyhow::bail!("mailbox.page_size must be in [1, 100]");
    }

    if config.classifier.endpoint.trim().is_empty() {
        anyhow::bail!("classifier.endpoint must not be empty");
    }

    if config.classifier.timeout_secs == 0 {
        anyhow::bail!("classifier.timeout_secs must be > 0");
    }

    if config.classifier.max_excerpt_chars == 0 {
        anyhow::bail!("classifier.max_excerpt_chars must be > 0");
    }

    if config.scan.concurrency == 0 {
        anyhow::bail!("scan.concurrency must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("wdx.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    const VALID: &str = r#"
[db]
path = "data/wdx.sqlite"

[mailbox]
base_url = "https://gmail.googleapis.com/gmail/v1/users/me"

[classifier]
endpoint = "https://api.example.com/v1/chat/completions"
model = "small-classifier"

[server]
bind = "127.0.0.1:7400"
"#;

    #[test]
    fn valid_config_loads_with_defaults() {
        let (_tmp, path) = write_config(VALID);
        let config = load_config(&path).unwrap();
        assert_eq!(config.mailbox.page_size, 25);
        assert_eq!(config.scan.concurrency, 4);
        assert_eq!(config.scan.batch_pause_ms, 1000);
        assert_eq!(config.classifier.max_completion_tokens, 8);
    }

    #[test]
    fn zero_page_size_rejected() {
        let (_tmp, path) = write_config(&VALID.replace(
            "base_url = \"https://gmail.googleapis.com/gmail/v1/users/me\"",
            "base_url = \"https://gmail.googleapis.com/gmail/v1/users/me\"\npage_size = 0",
        ));
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let (_tmp, path) = write_config(&format!("{}\n[scan]\nconcurrency = 0\n", VALID));
        assert!(load_config(&path).is_err());
    }
}

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "FLARUM_STREAM";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub forum: ForumConfig,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForumConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    crate::flarum::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("flarum-stream/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSettings {
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
    #[serde(default = "default_settle_attempts")]
    pub settle_attempts: usize,
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            fetch_workers: default_fetch_workers(),
            settle_attempts: default_settle_attempts(),
            settle_delay: default_settle_delay(),
        }
    }
}

fn default_page_limit() -> usize {
    30
}

fn default_fetch_workers() -> usize {
    4
}

fn default_settle_attempts() -> usize {
    2
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(150)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "flarum_stream=info,warn".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.forum.base_url.is_empty() {
        base.forum.base_url = other.forum.base_url;
    }
    if !other.forum.user_agent.is_empty() {
        base.forum.user_agent = other.forum.user_agent;
    }
    if !other.forum.timeout.is_zero() {
        base.forum.timeout = other.forum.timeout;
    }

    if other.window.page_limit != 0 {
        base.window.page_limit = other.window.page_limit;
    }
    if other.window.fetch_workers != 0 {
        base.window.fetch_workers = other.window.fetch_workers;
    }
    if other.window.settle_attempts != 0 {
        base.window.settle_attempts = other.window.settle_attempts;
    }
    base.window.settle_delay = other.window.settle_delay;

    if !other.log.filter.is_empty() {
        base.log.filter = other.log.filter;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "forum.base_url" => cfg.forum.base_url = value,
        "forum.user_agent" => cfg.forum.user_agent = value,
        "forum.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.forum.timeout = duration;
            }
        }
        "window.page_limit" => {
            if let Ok(parsed) = value.parse::<usize>() {
                if parsed > 0 {
                    cfg.window.page_limit = parsed;
                }
            }
        }
        "window.fetch_workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                if parsed > 0 {
                    cfg.window.fetch_workers = parsed;
                }
            }
        }
        "window.settle_attempts" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.window.settle_attempts = parsed.max(1);
            }
        }
        "window.settle_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.window.settle_delay = duration;
            }
        }
        "log.filter" => cfg.log.filter = value,
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("flarum-stream").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("FLARUM_STREAM_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.window.page_limit, 30);
        assert_eq!(cfg.window.settle_attempts, 2);
        assert_eq!(cfg.forum.base_url, default_base_url());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "forum:\n  base_url: https://forum.test/\nwindow:\n  page_limit: 20\n  settle_delay: 250ms\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("FLARUM_STREAM_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.forum.base_url, "https://forum.test/");
        assert_eq!(cfg.window.page_limit, 20);
        assert_eq!(cfg.window.settle_delay, Duration::from_millis(250));
        assert_eq!(cfg.window.fetch_workers, 4);
    }

    #[test]
    fn env_overrides() {
        env::set_var("FLARUM_STREAM_TEST_ENV_WINDOW__PAGE_LIMIT", "50");
        env::set_var("FLARUM_STREAM_TEST_ENV_FORUM__TIMEOUT", "5s");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/flarum-stream.yaml")),
            env_prefix: Some("FLARUM_STREAM_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.window.page_limit, 50);
        assert_eq!(cfg.forum.timeout, Duration::from_secs(5));
        env::remove_var("FLARUM_STREAM_TEST_ENV_WINDOW__PAGE_LIMIT");
        env::remove_var("FLARUM_STREAM_TEST_ENV_FORUM__TIMEOUT");
    }
}

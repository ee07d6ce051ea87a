use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mediawiki::NS_MAIN;

pub const DEFAULT_USER_AGENT: &str = "viewbot/0.2";
pub const DEFAULT_CONFIG_PATH: &str = ".viewbot/config.toml";
pub const DEFAULT_EDIT_SUMMARY: &str = "update view count ([[User:PetraMagna/Bots/View count|bot]])";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ViewbotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub bot: BotSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotSection {
    pub summary: Option<String>,
    pub namespace: Option<i32>,
    /// Title to start the alphabetical page walk from.
    pub start: Option<String>,
    pub category: Option<String>,
    pub edit_delay_ms: Option<u64>,
}

impl ViewbotConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve edit summary: env VIEWBOT_SUMMARY > config > DEFAULT_EDIT_SUMMARY.
    pub fn summary(&self) -> String {
        env_override("VIEWBOT_SUMMARY")
            .or_else(|| self.bot.summary.clone())
            .unwrap_or_else(|| DEFAULT_EDIT_SUMMARY.to_string())
    }

    pub fn namespace(&self) -> i32 {
        self.bot.namespace.unwrap_or(NS_MAIN)
    }
}

/// Load and parse a ViewbotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ViewbotConfig> {
    if !config_path.exists() {
        return Ok(ViewbotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ViewbotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Parsed env value, or `default` when unset or unparsable.
pub(crate) fn env_value<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, ViewbotConfig::default());
        assert_eq!(config.namespace(), 0);
    }

    #[test]
    fn load_config_parses_wiki_and_bot_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://example.wiki/api.php"
user_agent = "test-agent/1.0"

[bot]
summary = "refresh counts"
namespace = 0
start = "-Geminate-"
edit_delay_ms = 2500
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://example.wiki/api.php")
        );
        assert_eq!(config.wiki.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(config.bot.summary.as_deref(), Some("refresh counts"));
        assert_eq!(config.bot.start.as_deref(), Some("-Geminate-"));
        assert_eq!(config.bot.category, None);
        assert_eq!(config.bot.edit_delay_ms, Some(2500));
    }

    #[test]
    fn load_config_tolerates_unrelated_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[paths]\nroot = \"/foo\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.api_url.is_none());
        assert!(config.bot.start.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\napi_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn env_value_falls_back_on_missing_or_bad_input() {
        assert_eq!(env_value("VIEWBOT_TEST_UNSET_KEY", 42u64), 42);
        assert_eq!(env_value("VIEWBOT_TEST_UNSET_KEY", 7usize), 7);
    }

    #[test]
    fn config_values_fall_back_to_file_and_defaults() {
        let config = ViewbotConfig {
            bot: BotSection {
                summary: Some("custom".to_string()),
                ..BotSection::default()
            },
            ..ViewbotConfig::default()
        };
        if env::var("VIEWBOT_SUMMARY").is_err() {
            assert_eq!(config.summary(), "custom");
        }
        if env::var("WIKI_USER_AGENT").is_err() {
            assert_eq!(ViewbotConfig::default().user_agent(), DEFAULT_USER_AGENT);
        }
        assert_eq!(ViewbotConfig::default().namespace(), 0);
    }
}

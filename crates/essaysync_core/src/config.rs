use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::notion::{NotionClientConfig, ParentScope};
use crate::reconcile::ReplaceStrategy;

pub const DEFAULT_API_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
pub const DEFAULT_USER_AGENT: &str = "essaysync/0.1";
pub const DEFAULT_TITLE_PROPERTY: &str = "Name";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct EssaySyncConfig {
    #[serde(default)]
    pub notion: NotionSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct NotionSection {
    pub api_url: Option<String>,
    pub notion_version: Option<String>,
    pub parent_page_id: Option<String>,
    pub database_id: Option<String>,
    pub strategy: Option<String>,
    pub title_property: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

/// Load and parse the TOML config. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<EssaySyncConfig> {
    if !config_path.exists() {
        return Ok(EssaySyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: EssaySyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Process-wide settings, built once before any file is touched and read-only afterwards.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub parent: ParentScope,
    pub strategy: ReplaceStrategy,
    pub fallback_title_property: String,
    pub client: NotionClientConfig,
}

impl SyncSettings {
    pub fn from_env(config: &EssaySyncConfig) -> Result<Self, SyncError> {
        Self::resolve(config, |key| env::var(key).ok())
    }

    /// Resolve every setting: env > config file > default. The token is env-only.
    pub fn resolve<F>(config: &EssaySyncConfig, lookup_env: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let section = &config.notion;
        let layered = |key: &str, file_value: &Option<String>| {
            lookup(key).or_else(|| {
                file_value
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(ToString::to_string)
            })
        };

        let token = lookup("NOTION_TOKEN").ok_or(SyncError::MissingConfig("NOTION_TOKEN"))?;

        let parent_page = layered("NOTION_PARENT_PAGE_ID", &section.parent_page_id);
        let database = layered("NOTION_DATABASE_ID", &section.database_id);
        let parent = match (parent_page, database) {
            (Some(_), Some(_)) => return Err(SyncError::ConflictingParent),
            (Some(page_id), None) => ParentScope::Page(page_id),
            (None, Some(database_id)) => ParentScope::Database(database_id),
            (None, None) => {
                return Err(SyncError::MissingConfig(
                    "NOTION_PARENT_PAGE_ID or NOTION_DATABASE_ID",
                ));
            }
        };

        let strategy = match layered("NOTION_SYNC_STRATEGY", &section.strategy) {
            Some(value) => value
                .parse::<ReplaceStrategy>()
                .map_err(|message| SyncError::InvalidConfig {
                    key: "NOTION_SYNC_STRATEGY",
                    message,
                })?,
            None => ReplaceStrategy::default(),
        };

        let client = NotionClientConfig {
            api_url: layered("NOTION_API_URL", &section.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            token,
            notion_version: layered("NOTION_VERSION", &section.notion_version)
                .unwrap_or_else(|| DEFAULT_NOTION_VERSION.to_string()),
            user_agent: layered("NOTION_USER_AGENT", &section.user_agent)
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: numeric(&lookup, "NOTION_HTTP_TIMEOUT_MS", section.timeout_ms, 30_000)?,
            max_retries: numeric(&lookup, "NOTION_HTTP_RETRIES", section.max_retries, 0)?,
            retry_delay_ms: numeric(
                &lookup,
                "NOTION_HTTP_RETRY_DELAY_MS",
                section.retry_delay_ms,
                500,
            )?,
            rate_limit_ms: numeric(&lookup, "NOTION_RATE_LIMIT_MS", section.rate_limit_ms, 0)?,
        };

        Ok(Self {
            parent,
            strategy,
            fallback_title_property: layered("NOTION_TITLE_PROPERTY", &section.title_property)
                .unwrap_or_else(|| DEFAULT_TITLE_PROPERTY.to_string()),
            client,
        })
    }
}

fn numeric<T, F>(
    lookup: &F,
    key: &'static str,
    file_value: Option<T>,
    default: T,
) -> Result<T, SyncError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value.parse::<T>().map_err(|_| SyncError::InvalidConfig {
            key,
            message: format!("expected a non-negative integer, got `{value}`"),
        }),
        None => Ok(file_value.unwrap_or(default)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use super::*;

    fn env_of(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<&'static str, &'static str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|value| value.to_string())
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/.essaysync.toml")).expect("load config");
        assert_eq!(config, EssaySyncConfig::default());
    }

    #[test]
    fn load_config_parses_notion_section() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(".essaysync.toml");
        fs::write(
            &config_path,
            r#"
[notion]
database_id = "0f1e2d3c"
strategy = "recreate"
title_property = "Essay"
max_retries = 2
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.notion.database_id.as_deref(), Some("0f1e2d3c"));
        assert_eq!(config.notion.strategy.as_deref(), Some("recreate"));
        assert_eq!(config.notion.max_retries, Some(2));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(".essaysync.toml");
        fs::write(&config_path, "[notion\ntoken = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let error = SyncSettings::resolve(
            &EssaySyncConfig::default(),
            env_of(&[("NOTION_PARENT_PAGE_ID", "abc")]),
        )
        .expect_err("must fail");
        assert!(matches!(error, SyncError::MissingConfig("NOTION_TOKEN")));
    }

    #[test]
    fn missing_parent_is_a_config_error() {
        let error = SyncSettings::resolve(
            &EssaySyncConfig::default(),
            env_of(&[("NOTION_TOKEN", "secret")]),
        )
        .expect_err("must fail");
        assert!(matches!(
            error,
            SyncError::MissingConfig("NOTION_PARENT_PAGE_ID or NOTION_DATABASE_ID")
        ));
    }

    #[test]
    fn page_and_database_are_mutually_exclusive() {
        let error = SyncSettings::resolve(
            &EssaySyncConfig::default(),
            env_of(&[
                ("NOTION_TOKEN", "secret"),
                ("NOTION_PARENT_PAGE_ID", "abc"),
                ("NOTION_DATABASE_ID", "def"),
            ]),
        )
        .expect_err("must fail");
        assert!(matches!(error, SyncError::ConflictingParent));
    }

    #[test]
    fn env_overrides_config_file_and_defaults_fill_the_rest() {
        let config = EssaySyncConfig {
            notion: NotionSection {
                database_id: Some("db-from-file".to_string()),
                strategy: Some("replace".to_string()),
                timeout_ms: Some(5_000),
                ..NotionSection::default()
            },
        };
        let settings = SyncSettings::resolve(
            &config,
            env_of(&[
                ("NOTION_TOKEN", " secret "),
                ("NOTION_SYNC_STRATEGY", "recreate"),
            ]),
        )
        .expect("resolve");

        assert_eq!(
            settings.parent,
            ParentScope::Database("db-from-file".to_string())
        );
        assert_eq!(settings.strategy, ReplaceStrategy::ArchiveAndRecreate);
        assert_eq!(settings.client.token, "secret");
        assert_eq!(settings.client.timeout_ms, 5_000);
        assert_eq!(settings.client.max_retries, 0);
        assert_eq!(settings.client.api_url, DEFAULT_API_URL);
        assert_eq!(settings.client.notion_version, DEFAULT_NOTION_VERSION);
        assert_eq!(settings.fallback_title_property, DEFAULT_TITLE_PROPERTY);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let error = SyncSettings::resolve(
            &EssaySyncConfig::default(),
            env_of(&[
                ("NOTION_TOKEN", "secret"),
                ("NOTION_PARENT_PAGE_ID", "abc"),
                ("NOTION_SYNC_STRATEGY", "merge"),
            ]),
        )
        .expect_err("must fail");
        assert!(matches!(
            error,
            SyncError::InvalidConfig {
                key: "NOTION_SYNC_STRATEGY",
                ..
            }
        ));
    }

    #[test]
    fn malformed_numeric_env_is_rejected() {
        let error = SyncSettings::resolve(
            &EssaySyncConfig::default(),
            env_of(&[
                ("NOTION_TOKEN", "secret"),
                ("NOTION_PARENT_PAGE_ID", "abc"),
                ("NOTION_HTTP_RETRIES", "lots"),
            ]),
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("NOTION_HTTP_RETRIES"));
    }
}

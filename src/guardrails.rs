//! SQL Guardrails
//!
//! Static checks applied to generated SQL before any database contact:
//! normalization, read-only classification, forbidden keyword screening and
//! row-limit enforcement. Detection is textual on purpose; a statement that
//! hides `limit` or `top N` inside a string literal can be rewritten wrongly.

use crate::config::{GuardrailConfig, DEFAULT_FORBIDDEN_KEYWORDS};
use crate::error::{GateError, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

pub const FORBIDDEN_KEYWORDS_REASON: &str = "Query contains forbidden keywords.";

lazy_static! {
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)\b(limit\s+)\d+").unwrap();
    static ref TOP_CLAUSE: Regex = Regex::new(r"(?i)\b(top\s+)\d+\b").unwrap();
}

/// Outcome of running a statement through the guardrails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub accepted: bool,
    /// Limit-enforced SQL when accepted, normalized input when rejected
    pub sanitized_sql: String,
    /// Empty iff accepted
    pub rejection_reason: String,
}

impl ValidationResult {
    fn accept(sanitized_sql: String) -> Self {
        Self {
            accepted: true,
            sanitized_sql,
            rejection_reason: String::new(),
        }
    }

    fn reject(normalized_sql: String, reason: String) -> Self {
        Self {
            accepted: false,
            sanitized_sql: normalized_sql,
            rejection_reason: reason,
        }
    }
}

/// Strip surrounding whitespace and semicolons.
pub fn normalize_sql(sql: &str) -> String {
    sql.trim_matches(|c: char| c.is_whitespace() || c == ';')
        .to_string()
}

/// First lexical token of the statement, lower-cased, skipping whitespace and comments.
pub fn first_token(sql: &str) -> Option<String> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize().ok()?;
    tokens
        .into_iter()
        .find(|token| !matches!(token, Token::Whitespace(_) | Token::EOF))
        .map(|token| token.to_string().to_lowercase())
}

/// Prefix match of the first token against the allowed verbs.
pub fn is_read_only<S: AsRef<str>>(sql: &str, allowed_verbs: &[S]) -> bool {
    let Some(first) = first_token(sql) else {
        return false;
    };
    allowed_verbs
        .iter()
        .map(|verb| verb.as_ref().trim().to_lowercase())
        .filter(|verb| !verb.is_empty())
        .any(|verb| first.starts_with(&verb))
}

fn keyword_pattern(keyword: &str) -> Result<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(&keyword.to_lowercase())))
        .map_err(|e| GateError::Config(format!("Invalid forbidden keyword '{}': {}", keyword, e)))
}

/// Rewrite every `LIMIT n` / `TOP n` to `min(default, max)`, or append a
/// `LIMIT` clause when neither is present.
pub fn enforce_limit(sql: &str, max_limit: u64, default_limit: u64) -> String {
    let limit = default_limit.min(max_limit);

    if !LIMIT_CLAUSE.is_match(sql) && !TOP_CLAUSE.is_match(sql) {
        return format!("{} LIMIT {}", sql, limit);
    }

    let rewritten = LIMIT_CLAUSE.replace_all(sql, |caps: &Captures| format!("{}{}", &caps[1], limit));
    TOP_CLAUSE
        .replace_all(&rewritten, |caps: &Captures| format!("{}{}", &caps[1], limit))
        .into_owned()
}

/// Guardrail pipeline compiled once from a [`GuardrailConfig`]
#[derive(Debug, Clone)]
pub struct Guardrails {
    allowed_verbs: Vec<String>,
    forbidden: Vec<Regex>,
    max_limit: u64,
    default_limit: u64,
    not_read_only_reason: String,
}

impl Guardrails {
    pub fn new(config: &GuardrailConfig) -> Result<Self> {
        let keywords: Vec<String> = if config.forbidden_keywords.is_empty() {
            DEFAULT_FORBIDDEN_KEYWORDS.iter().map(|k| k.to_string()).collect()
        } else {
            config.forbidden_keywords.clone()
        };
        let forbidden = keywords
            .iter()
            .map(|k| keyword_pattern(k))
            .collect::<Result<Vec<_>>>()?;

        let allowed_verbs: Vec<String> = config
            .allowed_verbs
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        let not_read_only_reason = format!(
            "Only {} queries are allowed.",
            allowed_verbs
                .iter()
                .map(|v| v.to_uppercase())
                .collect::<Vec<_>>()
                .join("/")
        );

        Ok(Self {
            allowed_verbs,
            forbidden,
            max_limit: config.max_limit,
            default_limit: config.default_limit,
            not_read_only_reason,
        })
    }

    /// Whole-word, case-insensitive search for any forbidden keyword.
    pub fn has_forbidden(&self, sql: &str) -> bool {
        let lowered = sql.to_lowercase();
        self.forbidden.iter().any(|pattern| pattern.is_match(&lowered))
    }

    /// normalize -> classify -> forbidden scan -> enforce limit
    pub fn validate(&self, raw_sql: &str) -> ValidationResult {
        let sql = normalize_sql(raw_sql);

        if !is_read_only(&sql, &self.allowed_verbs) {
            debug!("Rejected non read-only statement");
            return ValidationResult::reject(sql, self.not_read_only_reason.clone());
        }

        if self.has_forbidden(&sql) {
            debug!("Rejected statement containing a forbidden keyword");
            return ValidationResult::reject(sql, FORBIDDEN_KEYWORDS_REASON.to_string());
        }

        ValidationResult::accept(enforce_limit(&sql, self.max_limit, self.default_limit))
    }
}

/// One-off validation; compiles the guardrails for a single call.
pub fn validate_sql(raw_sql: &str, config: &GuardrailConfig) -> Result<ValidationResult> {
    Ok(Guardrails::new(config)?.validate(raw_sql))
}

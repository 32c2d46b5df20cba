//! Agent definition validation
//!
//! Works on raw JSON so that type errors are reported as readable messages
//! instead of a single serde failure.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::ai::ProviderId;
use crate::constants::ai;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid regex"));

const LARGE_MAX_TOKENS: f64 = 100_000.0;
const MODEL_ENV: &str = "LLM_MODEL";

/// Pass/fail verdict plus advisory warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Whether `name` is usable as a registry key and path component
pub fn is_valid_agent_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Validate a raw definition document, reading API-key fallbacks from the
/// process environment.
pub fn validate_definition(config: &Value) -> ValidationReport {
    validate_definition_with_env(config, |key| std::env::var(key).ok())
}

/// Validate with an explicit environment lookup.
pub fn validate_definition_with_env<F>(config: &Value, env: F) -> ValidationReport
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match config.get("name") {
        None | Some(Value::Null) => errors.push("Agent name is required".to_string()),
        Some(Value::String(name)) if name.is_empty() => {
            errors.push("Agent name is required".to_string())
        }
        Some(Value::String(name)) if !is_valid_agent_name(name) => errors.push(
            "Agent name must contain only lowercase letters, numbers, and hyphens".to_string(),
        ),
        Some(Value::String(_)) => {}
        Some(_) => errors.push("Agent name must be a string".to_string()),
    }

    match config.get("version") {
        None | Some(Value::Null) => errors.push("Agent version is required".to_string()),
        Some(Value::String(v)) if v.is_empty() => {
            errors.push("Agent version is required".to_string())
        }
        Some(Value::String(_)) => {}
        Some(_) => errors.push("Agent version must be a string".to_string()),
    }

    if !is_non_empty_string(config.get("description")) {
        warnings.push("Agent description is recommended".to_string());
    }

    match config.get("capabilities") {
        None | Some(Value::Null) => warnings.push("capabilities field is recommended".to_string()),
        Some(Value::Array(items)) if items.is_empty() => {
            warnings.push("No capabilities defined".to_string())
        }
        Some(Value::Array(items)) => check_string_items("capabilities", items, &mut errors),
        Some(_) => errors.push("capabilities must be an array".to_string()),
    }

    match config.get("tools") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => check_string_items("tools", items, &mut errors),
        Some(_) => errors.push("tools must be an array".to_string()),
    }

    match config.get("instructions") {
        None | Some(Value::Null) => {
            warnings.push("Agent instructions are recommended for better behavior".to_string())
        }
        Some(Value::String(s)) if s.is_empty() => {
            warnings.push("Agent instructions are recommended for better behavior".to_string())
        }
        Some(Value::String(_)) => {}
        Some(_) => errors.push("instructions must be a string".to_string()),
    }

    match config.get("environment") {
        None | Some(Value::Null) => {}
        Some(Value::Object(environment)) => {
            match environment.get("maxTokens") {
                None => {}
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(v) if v <= 0.0 => {
                        errors.push("environment.maxTokens must be positive".to_string())
                    }
                    Some(v) if v > LARGE_MAX_TOKENS => warnings.push(
                        "environment.maxTokens is very large, may cause issues".to_string(),
                    ),
                    _ => {}
                },
                Some(_) => errors.push("environment.maxTokens must be a number".to_string()),
            }
            match environment.get("temperature") {
                None => {}
                Some(Value::Number(n)) => {
                    if !n.as_f64().is_some_and(|t| (0.0..=2.0).contains(&t)) {
                        errors.push("environment.temperature must be between 0 and 2".to_string());
                    }
                }
                Some(_) => errors.push("environment.temperature must be a number".to_string()),
            }
        }
        Some(_) => errors.push("environment must be an object".to_string()),
    }

    match config.get("llm").or_else(|| config.get("llmConfig")) {
        None | Some(Value::Null) => warnings
            .push("llm configuration not found, agent will use fallback responses".to_string()),
        Some(Value::Object(llm)) => {
            validate_llm(llm, &env, &mut errors, &mut warnings);
        }
        Some(_) => errors.push("llm must be an object".to_string()),
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn validate_llm<F>(
    llm: &serde_json::Map<String, Value>,
    env: &F,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) where
    F: Fn(&str) -> Option<String>,
{
    let provider = match llm.get("provider") {
        None | Some(Value::Null) => {
            warnings.push("llm.provider is not set, agent will use fallback responses".to_string());
            return;
        }
        Some(Value::String(p)) => p.as_str(),
        Some(_) => {
            errors.push("llm.provider must be a string".to_string());
            return;
        }
    };

    if provider == "none" {
        return;
    }

    let Ok(id) = provider.parse::<ProviderId>() else {
        errors.push("llm.provider must be one of: openai, anthropic, ollama, none".to_string());
        return;
    };

    if !is_non_empty_string(llm.get("model")) && env(MODEL_ENV).is_none() {
        warnings.push(format!("llm.model is recommended for {} provider", provider));
    }

    let has_key = is_non_empty_string(llm.get("apiKey"));
    let has_base_url =
        is_non_empty_string(llm.get("baseURL")) || is_non_empty_string(llm.get("baseUrl"));

    match id {
        ProviderId::OpenAi if !has_key && env(ai::OPENAI_API_KEY_ENV).is_none() => warnings.push(
            "OpenAI API key not found. Set llm.apiKey or OPENAI_API_KEY environment variable"
                .to_string(),
        ),
        ProviderId::Anthropic if !has_key && env(ai::ANTHROPIC_API_KEY_ENV).is_none() => warnings
            .push(
                "Anthropic API key not found. Set llm.apiKey or ANTHROPIC_API_KEY environment variable"
                    .to_string(),
            ),
        ProviderId::Ollama if !has_base_url && env(ai::OLLAMA_HOST_ENV).is_none() => {
            warnings.push(format!(
                "Ollama host not configured. Using default {}",
                ai::OLLAMA_DEFAULT_HOST
            ))
        }
        _ => {}
    }
}

fn is_non_empty_string(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if !s.is_empty())
}

fn check_string_items(field: &str, items: &[Value], errors: &mut Vec<String>) {
    if items.iter().any(|item| !item.is_string()) {
        errors.push(format!("{} must contain only strings", field));
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Bedrock region; the runtime endpoint is derived from it unless
    /// `base_url` overrides it.
    #[serde(default = "d_region")]
    pub region: String,
    /// Full endpoint override (useful for gateways and tests).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the Bedrock bearer API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_default_model")]
    pub default_model_id: String,
    /// Client-facing model names mapped to concrete model ids. Unknown
    /// names fall back to `default_model_id`.
    #[serde(default = "d_model_aliases")]
    pub model_aliases: HashMap<String, String>,
    /// Read timeout for a single LLM call.
    #[serde(default = "d_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "d_planner_temperature")]
    pub planner_temperature: f32,
    #[serde(default = "d_response_temperature")]
    pub response_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            region: d_region(),
            base_url: None,
            api_key_env: d_api_key_env(),
            default_model_id: d_default_model(),
            model_aliases: d_model_aliases(),
            timeout_secs: d_llm_timeout(),
            planner_temperature: d_planner_temperature(),
            response_temperature: d_response_temperature(),
        }
    }
}

impl LlmConfig {
    /// Map a client-requested model name through the alias table.
    ///
    /// `None` (no override requested) stays `None`; a known alias maps to
    /// its target; an unknown name falls back to the default model with a
    /// warning.
    pub fn resolve_model(&self, requested: Option<&str>) -> Option<String> {
        let requested = requested?;
        if let Some(mapped) = self.model_aliases.get(requested) {
            if mapped != requested {
                tracing::info!(requested, mapped = %mapped, "mapped client model name");
            }
            Some(mapped.clone())
        } else {
            tracing::warn!(requested, default = %self.default_model_id, "unknown model, using default");
            Some(self.default_model_id.clone())
        }
    }
}

fn d_region() -> String {
    "us-east-2".into()
}

fn d_api_key_env() -> String {
    "AWS_BEARER_TOKEN_BEDROCK".into()
}

fn d_default_model() -> String {
    "us.anthropic.claude-3-7-sonnet-20250219-v1:0".into()
}

fn d_model_aliases() -> HashMap<String, String> {
    let sonnet = d_default_model();
    let haiku = "us.anthropic.claude-3-7-haiku-20250219-v1:0".to_owned();
    let mut aliases = HashMap::new();
    for name in ["gpt-4.1", "gpt-4", "gpt-4-turbo", "claude-3-sonnet"] {
        aliases.insert(name.to_owned(), sonnet.clone());
    }
    for name in ["gpt-3.5-turbo", "claude-3-haiku"] {
        aliases.insert(name.to_owned(), haiku.clone());
    }
    aliases.insert(sonnet.clone(), sonnet);
    aliases.insert(haiku.clone(), haiku);
    aliases
}

fn d_llm_timeout() -> u64 {
    30
}

fn d_planner_temperature() -> f32 {
    0.1
}

fn d_response_temperature() -> f32 {
    0.2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

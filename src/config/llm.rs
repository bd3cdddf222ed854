// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::env;

pub const ENV_LLM_API_KEY: &str = "DIGEST_LLM_API_KEY";

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model() -> String {
    "llama3.1".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.1
}

/// Inference endpoint settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Literal key, empty for keyless local endpoints, or "ENV" to read
    /// `DIGEST_LLM_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

impl LlmSettings {
    /// Resolve "ENV" keys and clamp values into usable ranges.
    pub fn sanitize(&mut self) -> anyhow::Result<()> {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var(ENV_LLM_API_KEY)
                .map_err(|_| anyhow::anyhow!("Missing {ENV_LLM_API_KEY} env var"))?;
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        Ok(())
    }
}

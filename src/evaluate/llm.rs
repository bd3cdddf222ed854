// src/evaluate/llm.rs
//! Language-model boundary: rendered prompt in, raw completion text out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmSettings;
use crate::error::{DigestError, Result};

const SYSTEM_PROMPT: &str =
    "You are a precise content curator. Answer with a single JSON object and nothing else.";

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One completion. Deadlines are enforced by the caller.
    async fn complete(&self, prompt: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

pub type DynLlm = Arc<dyn LlmClient>;

/// OpenAI-compatible `/chat/completions` endpoint (a local Ollama by default).
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl ChatCompletionsClient {
    pub fn from_settings(s: &LlmSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("intel-digest/0.1")
            .connect_timeout(Duration::from_secs(4))
            // The evaluator's own deadline is the effective limit; this one only
            // stops a wedged connection from outliving it by much.
            .timeout(Duration::from_secs(s.timeout_secs.saturating_add(5)))
            .build()?;
        Ok(Self {
            http,
            base_url: s.base_url.trim_end_matches('/').to_string(),
            model: s.model.clone(),
            api_key: s.api_key.clone(),
            temperature: s.temperature,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            stream: bool,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            stream: false,
        };

        let mut builder = self.http.post(self.endpoint()).json(&req);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| DigestError::Inference(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(DigestError::Inference(format!("HTTP {status}: {snippet}")));
        }
        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| DigestError::Inference(format!("bad body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DigestError::Inference("empty completion".into()))
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

use crate::config::LlmConfig;
use crate::models::*;
use anyhow::{anyhow, bail, Result};
use reqwest::Client;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "groq",
            LlmProvider::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "llama-3.3-70b-versatile",
            LlmProvider::Gemini => "gemini-2.5-flash",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "GROQ_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "groq" => Ok(LlmProvider::Groq),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(anyhow!("unknown LLM provider '{}'", other)),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures talking to the hosted model, kept distinct so the HTTP layer can
/// report them as upstream errors.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: LlmProvider,
        status: u16,
        body: String,
    },

    #[error("{provider} returned no answer")]
    EmptyResponse { provider: LlmProvider },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: LlmProvider,
        #[source]
        source: reqwest::Error,
    },
}

pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("{} environment variable not set", config.provider.api_key_var());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a fully formatted prompt and return the model's text.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        log::debug!(
            "Sending {} char prompt to {} ({})",
            prompt.chars().count(),
            self.config.provider,
            self.config.model
        );

        let answer = match self.config.provider {
            LlmProvider::Groq => self.generate_groq(prompt).await?,
            LlmProvider::Gemini => self.generate_gemini(prompt).await?,
        };

        Ok(answer.trim().to_string())
    }

    async fn generate_groq(&self, prompt: &str) -> Result<String, LlmError> {
        let provider = LlmProvider::Groq;
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatCompletionMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url());
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| LlmError::Transport { provider, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider,
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|source| LlmError::Transport { provider, source })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse { provider })
    }

    async fn generate_gemini(&self, prompt: &str) -> Result<String, LlmError> {
        let provider = LlmProvider::Gemini;
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: Some(GeminiGenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_tokens,
            }),
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url(),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|source| LlmError::Transport { provider, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider,
                status: status.as_u16(),
                body,
            });
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|source| LlmError::Transport { provider, source })?;

        gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyResponse { provider })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Spoken when the coach cannot produce a reply.
pub const FALLBACK_REPLY: &str = "Sorry, something went wrong. Please try again.";

const SYSTEM_INSTRUCTION: &str = "You are a financial coach for students named Centsi. \
    Your replies are read aloud, so answer in two or three short sentences without lists or markdown.";

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

/// Produces the text reply to a finished user utterance.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Coach: Send + Sync {
    async fn reply(&self, transcript: &str) -> Result<String>;
}

/// Asks `coach` for a reply, substituting the fallback on failure.
pub async fn reply_or_fallback(coach: &dyn Coach, transcript: &str) -> String {
    match coach.reply(transcript).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("coach failed to reply: {:#}", e);
            FALLBACK_REPLY.to_string()
        }
    }
}

/// Coach backed by an OpenAI-compatible chat completions endpoint.
pub struct ChatCoach {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl ChatCoach {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: "https://api.openai.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Coach for ChatCoach {
    async fn reply(&self, transcript: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_INSTRUCTION },
                { "role": "user", "content": transcript }
            ],
            "temperature": 0.7,
            "max_tokens": 800
        });

        let resp = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("chat request failed")?
            .error_for_status()
            .context("chat endpoint rejected the request")?
            .json::<LlmResponse>()
            .await
            .context("malformed chat response")?;

        let answer = &resp
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content;
        Ok(answer.trim().to_string())
    }
}

//! Gemini API client for answer phrasing
//!
//! The assistant composes every answer from tool output first. When an API
//! key is configured, Gemini rewrites that draft into friendlier prose using
//! only the facts it is given. Uses a long-lived reqwest::Client for
//! connection pooling.

use crate::error::ForecastError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_MODEL_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

const SYSTEM_PROMPT: &str = r#"You are an olive oil market analyst answering questions from importers.

Guidelines:
- Use only the facts provided; never invent prices, dates or percentages
- Keep every number exactly as given, including units and confidence intervals
- Be concise: two to four sentences
- If the facts report an error, explain it plainly"#;

/// Reusable Gemini client (connection-pooled)
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_MODEL_URL.to_string(),
        })
    }

    /// Generate a completion for `prompt` under `system`
    pub async fn generate(&self, prompt: &str, system: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(ForecastError::LlmError("GEMINI_API_KEY not configured".to_string()));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = build_request(prompt, system);

        info!("calling Gemini API");

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            error!(error = %e, "Gemini API request failed");
            ForecastError::LlmError(format!("Gemini API error: {}", e))
        })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(response = %error_text, "Gemini API error response");
            return Err(ForecastError::LlmError(format!("Gemini API error: {}", error_text)));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!(error = %e, "failed to parse Gemini response");
            ForecastError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        extract_text(&gemini_response)
    }

    /// Rephrase a grounded draft answer.
    pub async fn rephrase(&self, question: &str, facts: &Value, draft: &str) -> Result<String> {
        self.generate(&rephrase_prompt(question, facts, draft), SYSTEM_PROMPT)
            .await
    }
}

fn rephrase_prompt(question: &str, facts: &Value, draft: &str) -> String {
    let facts = serde_json::to_string_pretty(facts).unwrap_or_else(|_| facts.to_string());
    format!(
        "Question: {}\n\nFacts (JSON):\n{}\n\nDraft answer:\n{}\n\nRewrite the draft as a direct answer to the question.",
        question, facts, draft
    )
}

fn build_request(prompt: &str, system: &str) -> GeminiRequest {
    GeminiRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: 0.2,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 512,
        },
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: system.to_string(),
            }],
        },
    }
}

fn extract_text(response: &GeminiResponse) -> Result<String> {
    let text = response
        .candidates
        .first()
        .and_then(|c| c.content.parts.first())
        .map(|p| p.text.trim().to_string())
        .ok_or_else(|| ForecastError::LlmError("empty response from Gemini".to_string()))?;
    if text.is_empty() {
        return Err(ForecastError::LlmError("empty response from Gemini".to_string()));
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

use super::{ChatRequest, ChatResponse, LlmError};
use crate::embedding::Embedding;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: text.to_string(),
        }],
    }
}

fn build_request(request: &ChatRequest) -> GenerateRequest {
    let system_instruction = request
        .messages
        .iter()
        .find(|m| m.role == "system")
        .map(|m| text_content(None, &m.content));

    // Gemini names the assistant role "model".
    let contents = request
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| {
            let role = if m.role == "assistant" { "model" } else { "user" };
            text_content(Some(role), &m.content)
        })
        .collect();

    GenerateRequest {
        contents,
        system_instruction,
    }
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

pub async fn chat(config: &GeminiConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let client = Client::new();
    let body = build_request(request);

    let resp = client
        .post(format!(
            "{}/v1beta/{}:generateContent",
            config.base_url,
            model_path(&request.model)
        ))
        .header("Content-Type", "application/json")
        .header("x-goog-api-key", &config.api_key)
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }

    let data: GenerateResponse = resp.json().await?;
    let candidate = data
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("response contained no candidates".to_string()))?;
    let content: String = candidate.content.parts.into_iter().map(|p| p.text).collect();

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}

pub async fn embed(config: &GeminiConfig, model: &str, text: &str) -> Result<Embedding, LlmError> {
    let client = Client::new();
    let model = model_path(model);
    let body = EmbedRequest {
        model: model.clone(),
        content: text_content(None, text),
    };

    let resp = client
        .post(format!("{}/v1beta/{}:embedContent", config.base_url, model))
        .header("Content-Type", "application/json")
        .header("x-goog-api-key", &config.api_key)
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }

    let data: EmbedResponse = resp.json().await?;
    Ok(data.embedding.values)
}

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::lines::lines;
use crate::gateway::{FragmentStream, Gateway, Session};
use crate::mode::Mode;
use crate::prompts::{clean_title, system_prompt, title_prompt};
use crate::state::{Message, Role};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const TITLE_MODEL: &str = "gemini-2.5-flash-lite";
const SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
const SPEECH_VOICE: &str = "Kore";

#[derive(Serialize, Deserialize, Clone)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "inlineData", default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct InlineData {
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    data: String,
}

#[derive(Serialize, Deserialize, Clone)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

impl Content {
    fn new(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    fn text(&self) -> String {
        self.parts().filter_map(|p| p.text.as_deref()).collect()
    }

    fn audio(&self) -> Option<&str> {
        self.parts()
            .filter_map(|p| p.inline_data.as_ref())
            .filter(|d| d.mime_type.is_empty() || d.mime_type.starts_with("audio/"))
            .map(|d| d.data.as_str())
            .next()
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

/// Parse one server-sent event line into the text it carries
fn parse_sse_line(line: &str) -> Option<Result<String>> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateResponse>(payload) {
        Ok(response) => {
            let text = response.text();
            if text.is_empty() {
                None
            } else {
                Some(Ok(text))
            }
        }
        Err(e) => Some(Err(anyhow!("Malformed Gemini stream event: {}", e))),
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    async fn post(&self, model: &str, method: &str, request: &GenerateRequest) -> Result<reqwest::Response> {
        let url = format!("{}/models/{}:{}", API_BASE, model, method);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini API error {}: {}", status, text));
        }
        Ok(response)
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let response = self.post(model, "generateContent", request).await?;
        Ok(response.json().await?)
    }
}

pub struct GeminiSession {
    client: GeminiClient,
    system: &'static str,
    contents: Vec<Content>,
}

#[async_trait]
impl Session for GeminiSession {
    async fn send_streaming(&mut self, text: &str) -> Result<FragmentStream> {
        self.contents.push(Content::new(Some("user"), text));

        let request = GenerateRequest {
            system_instruction: Some(Content::new(None, self.system)),
            contents: self.contents.clone(),
            generation_config: None,
        };

        debug!(model = %self.client.model, turns = self.contents.len(), "Opening Gemini stream");
        let response = self
            .client
            .post(&self.client.model, "streamGenerateContent?alt=sse", &request)
            .await?;

        let fragments = lines(response.bytes_stream())
            .filter_map(|line| async move {
                match line {
                    Ok(line) => parse_sse_line(&line),
                    Err(e) => Some(Err(e)),
                }
            });
        Ok(Box::pin(fragments))
    }
}

/// Prior turns as Gemini contents. Empty messages (stopped or failed
/// answers) are left out since the API rejects empty parts.
fn history_contents(history: &[Message]) -> Vec<Content> {
    history
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| Content::new(Some(role_name(m.role)), &m.content))
        .collect()
}

#[async_trait]
impl Gateway for GeminiClient {
    fn create_session(&self, history: &[Message], mode: Mode) -> Box<dyn Session> {
        Box::new(GeminiSession {
            client: self.clone(),
            system: system_prompt(mode),
            contents: history_contents(history),
        })
    }

    async fn summarize_title(&self, user: &Message, model: &Message) -> Result<String> {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content::new(
                Some("user"),
                &title_prompt(&user.content, &model.content),
            )],
            generation_config: None,
        };
        let response = self.generate(TITLE_MODEL, &request).await?;
        Ok(clean_title(&response.text()))
    }

    async fn synthesize_speech(&self, text: &str) -> Option<Vec<u8>> {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content::new(None, text)],
            generation_config: Some(serde_json::json!({
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": SPEECH_VOICE } }
                }
            })),
        };

        let response = match self.generate(SPEECH_MODEL, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Speech synthesis request failed");
                return None;
            }
        };

        let encoded = response.audio()?;
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(pcm) if !pcm.is_empty() => Some(pcm),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Speech synthesis returned undecodable audio");
                None
            }
        }
    }
}

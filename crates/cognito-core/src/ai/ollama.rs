use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use anyhow::{Result, anyhow};
use tracing::debug;

use super::lines::lines;
use crate::gateway::{FragmentStream, Gateway, Session};
use crate::mode::Mode;
use crate::prompts::{clean_title, system_prompt, title_prompt};
use crate::state::{Message, Role};

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    #[allow(dead_code)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one NDJSON line of a streaming `/api/chat` response
fn parse_chunk(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<ChatChunk>(line) {
        Ok(ChatChunk { error: Some(err), .. }) => Some(Err(anyhow!("Ollama error: {}", err))),
        Ok(ChatChunk { message: Some(msg), .. }) if !msg.content.is_empty() => Some(Ok(msg.content)),
        Ok(_) => None,
        Err(e) => Some(Err(anyhow!("Malformed Ollama stream line: {}", e))),
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    async fn chat(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Ollama request failed with status: {}. Make sure Ollama is running with: ollama serve",
                response.status()
            ));
        }
        Ok(response)
    }
}

pub struct OllamaSession {
    client: OllamaClient,
    messages: Vec<ChatMessage>,
}

#[async_trait]
impl Session for OllamaSession {
    async fn send_streaming(&mut self, text: &str) -> Result<FragmentStream> {
        self.messages.push(ChatMessage::new("user", text));
        debug!(model = %self.client.model, turns = self.messages.len(), "Opening Ollama stream");

        let response = self.client.chat(&self.messages, true).await?;
        let fragments = lines(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_chunk(&line),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(fragments))
    }
}

#[async_trait]
impl Gateway for OllamaClient {
    fn create_session(&self, history: &[Message], mode: Mode) -> Box<dyn Session> {
        let mut messages = vec![ChatMessage::new("system", system_prompt(mode))];
        messages.extend(
            history
                .iter()
                .filter(|m| !m.content.is_empty())
                .map(|m| {
                    let role = match m.role {
                        Role::User => "user",
                        Role::Model => "assistant",
                    };
                    ChatMessage::new(role, &m.content)
                }),
        );

        Box::new(OllamaSession {
            client: self.clone(),
            messages,
        })
    }

    async fn summarize_title(&self, user: &Message, model: &Message) -> Result<String> {
        let prompt = [ChatMessage::new("user", &title_prompt(&user.content, &model.content))];
        let response = self.chat(&prompt, false).await?;
        let chunk: ChatChunk = response.json().await?;
        let text = chunk.message.map(|m| m.content).unwrap_or_default();
        Ok(clean_title(&text))
    }

    async fn synthesize_speech(&self, _text: &str) -> Option<Vec<u8>> {
        // Local models have no speech endpoint
        None
    }
}

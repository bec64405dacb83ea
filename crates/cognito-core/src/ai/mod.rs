pub mod gemini;
mod lines;
pub mod ollama;

use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::config::Config;
use crate::gateway::Gateway;
use crate::provider::Provider;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;

/// Build the gateway for the configured provider and model
pub fn gateway_for(config: &Config) -> Result<Arc<dyn Gateway>> {
    let model = config.model();
    match config.provider() {
        Provider::Gemini => {
            let key = config.gemini_key().ok_or_else(|| {
                anyhow!("Gemini API key not configured. Set GEMINI_API_KEY or gemini_api_key in the config file")
            })?;
            Ok(Arc::new(GeminiClient::new(&key, &model)))
        }
        Provider::Ollama => Ok(Arc::new(OllamaClient::new(&config.ollama_url(), &model))),
    }
}

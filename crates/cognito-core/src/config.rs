use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

use crate::provider::Provider;

/// Decorative background animation drawn behind the chat
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundAnimation {
    #[default]
    Particles,
    Starfield,
    Aurora,
    Off,
}

impl BackgroundAnimation {
    pub fn all() -> [BackgroundAnimation; 4] {
        [
            BackgroundAnimation::Particles,
            BackgroundAnimation::Starfield,
            BackgroundAnimation::Aurora,
            BackgroundAnimation::Off,
        ]
    }

    pub fn next(self) -> Self {
        let all = Self::all();
        let idx = all.iter().position(|a| *a == self).unwrap_or(0);
        all[(idx + 1) % all.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundAnimation::Particles => "particles",
            BackgroundAnimation::Starfield => "starfield",
            BackgroundAnimation::Aurora => "aurora",
            BackgroundAnimation::Off => "off",
        }
    }
}

/// Client-local preferences, kept apart from the chat store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub provider: Option<String>,
    pub default_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama_url: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub background_animation: BackgroundAnimation,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            provider: Some(Provider::Gemini.as_str().to_string()),
            default_model: None,
            gemini_api_key: None,
            ollama_url: None,
            display_name: None,
            background_animation: BackgroundAnimation::default(),
            language: None,
            path: None,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Load from an explicit path; a missing file yields defaults bound to that path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let config_content = fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&config_content)?
        } else {
            Self::new()
        };
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => self.save_to(&Self::get_config_path()?),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn provider(&self) -> Provider {
        self.provider
            .as_deref()
            .and_then(Provider::from_str)
            .unwrap_or(Provider::Gemini)
    }

    /// Model to use: configured default, else the provider's default
    pub fn model(&self) -> String {
        self.default_model
            .clone()
            .unwrap_or_else(|| self.provider().default_model().to_string())
    }

    /// Gemini key from the environment first, then the config file
    pub fn gemini_key(&self) -> Option<String> {
        std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.gemini_api_key.clone())
    }

    pub fn ollama_url(&self) -> String {
        self.ollama_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(crate::i18n::DEFAULT_LOCALE)
    }

    pub fn set_display_name(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        self.display_name = if name.is_empty() { None } else { Some(name.to_string()) };
        self.save()
    }

    pub fn set_background_animation(&mut self, animation: BackgroundAnimation) -> Result<()> {
        self.background_animation = animation;
        self.save()
    }

    pub fn set_language(&mut self, language: &str) -> Result<()> {
        self.language = Some(language.to_string());
        self.save()
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("cognito").join("config.json"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

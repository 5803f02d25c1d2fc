use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::generation::GenerationConfig;

/// A user-defined provider endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CustomProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// Wire protocol: `openai` (default), `anthropic`, or `google`.
    pub mode: Option<String>,
    /// Environment variable holding the API key, when it is not
    /// `<ID>_API_KEY`.
    pub api_key_env: Option<String>,
    pub title_model: Option<String>,
}

/// Defaults applied to every new session's [`GenerationConfig`].
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct GenerationDefaults {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: Option<bool>,
    pub system_prompt: Option<String>,
    pub auto_title: Option<bool>,
}

impl GenerationDefaults {
    pub fn generation_config(
        &self,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> GenerationConfig {
        let mut config = GenerationConfig::new(provider, model);
        config.temperature = self.temperature;
        config.top_p = self.top_p;
        config.frequency_penalty = self.frequency_penalty;
        config.presence_penalty = self.presence_penalty;
        config.max_tokens = self.max_tokens;
        config.system_prompt = self.system_prompt.clone();
        if let Some(stream) = self.stream {
            config.stream = stream;
        }
        if let Some(auto_title) = self.auto_title {
            config.auto_title = auto_title;
        }
        config
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    pub default_provider: Option<String>,
    #[serde(default)]
    pub default_models: HashMap<String, String>,
    #[serde(default)]
    pub custom_providers: Vec<CustomProvider>,
    #[serde(default)]
    pub generation: GenerationDefaults,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}


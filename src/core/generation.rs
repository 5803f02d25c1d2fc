use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wire protocol family a provider speaks; selects the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[serde(alias = "openai-compatible")]
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }

    /// Parses a provider `mode` string; unknown or missing modes fall back to
    /// the OpenAI-compatible protocol.
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode.map(str::to_ascii_lowercase).as_deref() {
            Some("anthropic") => ProviderKind::Anthropic,
            Some("google") | Some("gemini") => ProviderKind::Google,
            _ => ProviderKind::OpenAi,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved provider endpoint plus credentials. Read-only during a generation.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub id: String,
    pub display_name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub title_model: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("title_model", &self.title_model)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema describing the arguments object.
    pub parameters: Value,
}

/// Model identifier with the capabilities the UI cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub code: String,
    pub display_name: String,
    #[serde(default)]
    pub created: Option<i64>,
}

/// Per-session generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default = "default_true")]
    pub auto_title: bool,
}

fn default_true() -> bool {
    true
}

impl GenerationConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            max_tokens: None,
            stream: true,
            system_prompt: None,
            tools: Vec::new(),
            auto_title: true,
        }
    }

    /// System prompt with surrounding whitespace removed; `None` when blank.
    pub fn effective_system_prompt(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
    }

    /// Bare one-shot settings for auxiliary calls such as titles and connectivity checks.
    pub fn one_shot(&self, model: impl Into<String>) -> Self {
        Self {
            provider: self.provider.clone(),
            stream: false,
            auto_title: false,
            ..Self::new(self.provider.clone(), model)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_modes_case_insensitively() {
        assert_eq!(ProviderKind::from_mode(Some("Anthropic")), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::from_mode(Some("gemini")), ProviderKind::Google);
        assert_eq!(ProviderKind::from_mode(Some("whatever")), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_mode(None), ProviderKind::OpenAi);
    }

    #[test]
    fn blank_system_prompts_are_ignored() {
        let mut config = GenerationConfig::new("openai", "gpt-4o");
        config.system_prompt = Some("   ".into());
        assert_eq!(config.effective_system_prompt(), None);
        config.system_prompt = Some(" Be brief. ".into());
        assert_eq!(config.effective_system_prompt(), Some("Be brief."));
    }

    #[test]
    fn one_shot_drops_sampling_and_tools() {
        let mut config = GenerationConfig::new("openai", "gpt-4o");
        config.temperature = Some(0.2);
        config.system_prompt = Some("persona".into());
        let title = config.one_shot("gpt-4o-mini");
        assert_eq!(title.model, "gpt-4o-mini");
        assert!(!title.stream);
        assert!(title.temperature.is_none());
        assert!(title.system_prompt.is_none());
    }

    #[test]
    fn provider_debug_redacts_the_key() {
        let provider = ProviderConfig {
            id: "openai".into(),
            display_name: "OpenAI".into(),
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".into(),
            api_key: "sk-secret".into(),
            title_model: None,
        };
        assert!(!format!("{provider:?}").contains("sk-secret"));
    }
}

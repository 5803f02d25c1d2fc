//! Built-in provider configuration
//!
//! Providers usable without a config file, embedded from
//! `builtin_providers.toml` at build time.

use serde::{Deserialize, Serialize};

use crate::core::generation::ProviderKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub mode: Option<String>,
    pub default_model: Option<String>,
    pub title_model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BuiltinProvidersConfig {
    providers: Vec<BuiltinProvider>,
}

const CONFIG_CONTENT: &str = include_str!("../builtin_providers.toml");

impl BuiltinProvider {
    pub fn kind(&self) -> ProviderKind {
        ProviderKind::from_mode(self.mode.as_deref())
    }
}

fn parse_builtin_providers(content: &str) -> Result<Vec<BuiltinProvider>, toml::de::Error> {
    toml::from_str::<BuiltinProvidersConfig>(content).map(|config| config.providers)
}

/// Load built-in providers from the embedded configuration.
///
/// The table is compiled in and covered by tests, so a parse failure is
/// logged and yields no providers rather than aborting.
pub fn load_builtin_providers() -> Vec<BuiltinProvider> {
    parse_builtin_providers(CONFIG_CONTENT).unwrap_or_else(|err| {
        tracing::warn!("builtin_providers.toml is invalid: {err}");
        Vec::new()
    })
}

/// Find a built-in provider by ID (case-insensitive)
pub fn find_builtin_provider(id: &str) -> Option<BuiltinProvider> {
    load_builtin_providers()
        .into_iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_table_parses() {
        let providers = parse_builtin_providers(CONFIG_CONTENT).expect("valid toml");
        let ids: Vec<&str> = providers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            ["openai", "anthropic", "google", "openrouter", "groq", "mistral"]
        );
    }

    #[test]
    fn lookup_ignores_case() {
        let provider = find_builtin_provider("OpenAI").expect("openai");
        assert_eq!(provider.id, "openai");
        assert!(find_builtin_provider("nonexistent").is_none());
    }

    #[test]
    fn modes_select_adapters() {
        assert_eq!(
            find_builtin_provider("anthropic").map(|p| p.kind()),
            Some(ProviderKind::Anthropic)
        );
        assert_eq!(
            find_builtin_provider("google").map(|p| p.kind()),
            Some(ProviderKind::Google)
        );
        assert_eq!(
            find_builtin_provider("groq").map(|p| p.kind()),
            Some(ProviderKind::OpenAi)
        );
    }

    #[test]
    fn every_provider_is_complete() {
        for provider in load_builtin_providers() {
            assert!(!provider.display_name.is_empty());
            assert!(provider.base_url.starts_with("https://"));
            assert!(provider.default_model.is_some(), "{}", provider.id);
            assert!(provider.title_model.is_some(), "{}", provider.id);
        }
    }
}

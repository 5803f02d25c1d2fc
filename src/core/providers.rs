use crate::core::builtin_providers::load_builtin_providers;
use crate::core::config::Config;
use crate::core::generation::{ProviderConfig, ProviderKind};
use std::error::Error;
use std::fmt;

const QUICK_FIXES: &[&str] = &[
    "palaver providers                # Check provider status",
    "export OPENAI_API_KEY=sk-...     # Credentials come from <PROVIDER>_API_KEY",
    "palaver say -p anthropic hello   # Pick a provider explicitly",
];

/// Where API keys come from.
pub trait CredentialSource {
    fn api_key(&self, env_var: &str) -> Option<String>;
}

/// Reads API keys from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn api_key(&self, env_var: &str) -> Option<String> {
        std::env::var(env_var)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

/// A provider the user can select, built-in or from the config file.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderEntry {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub kind: ProviderKind,
    pub default_model: Option<String>,
    pub title_model: Option<String>,
    pub api_key_env: String,
    pub builtin: bool,
}

impl ProviderEntry {
    fn into_config(self, api_key: String) -> ProviderConfig {
        ProviderConfig {
            id: self.id.to_lowercase(),
            display_name: self.display_name,
            kind: self.kind,
            base_url: self.base_url,
            api_key,
            title_model: self.title_model,
        }
    }
}

/// Conventional credential variable for a provider id, e.g. `OPENAI_API_KEY`.
pub fn default_key_env(id: &str) -> String {
    let normalized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{normalized}_API_KEY")
}

/// Built-in providers followed by custom ones. A custom provider with a
/// built-in id replaces the built-in entry in place.
pub fn known_providers(config: &Config) -> Vec<ProviderEntry> {
    let mut entries: Vec<ProviderEntry> = load_builtin_providers()
        .into_iter()
        .map(|builtin| ProviderEntry {
            kind: builtin.kind(),
            api_key_env: default_key_env(&builtin.id),
            id: builtin.id,
            display_name: builtin.display_name,
            base_url: builtin.base_url,
            default_model: builtin.default_model,
            title_model: builtin.title_model,
            builtin: true,
        })
        .collect();

    for custom in &config.custom_providers {
        let entry = ProviderEntry {
            id: custom.id.clone(),
            display_name: custom.display_name.clone(),
            base_url: custom.base_url.clone(),
            kind: ProviderKind::from_mode(custom.mode.as_deref()),
            default_model: None,
            title_model: custom.title_model.clone(),
            api_key_env: custom
                .api_key_env
                .clone()
                .unwrap_or_else(|| default_key_env(&custom.id)),
            builtin: false,
        };
        match entries
            .iter_mut()
            .find(|existing| existing.id.eq_ignore_ascii_case(&custom.id))
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }
    entries
}

#[derive(Debug)]
pub struct ProviderResolutionError {
    message: String,
    quick_fixes: &'static [&'static str],
    exit_code: i32,
}

impl ProviderResolutionError {
    pub fn missing_authentication() -> Self {
        Self::new(
            "❌ No provider credentials found\n\nSet an API key for one of the built-in providers, for example:\n   export OPENAI_API_KEY=\"your-api-key-here\"",
            QUICK_FIXES,
            2,
        )
    }

    pub fn unknown_provider(provider: &str) -> Self {
        Self::new(
            format!("Unknown provider '{provider}'. Run 'palaver providers' to list providers."),
            QUICK_FIXES,
            2,
        )
    }

    pub fn provider_not_configured(provider: &str, env_var: &str) -> Self {
        Self::new(
            format!("No API key found for provider '{provider}'. Set {env_var} to use it."),
            QUICK_FIXES,
            2,
        )
    }

    pub fn model_missing(provider: &str) -> Self {
        Self::new(
            format!(
                "Provider '{provider}' has no default model. Pass --model or set default_models.{provider} in the config."
            ),
            &[],
            2,
        )
    }

    fn new(
        message: impl Into<String>,
        quick_fixes: &'static [&'static str],
        exit_code: i32,
    ) -> Self {
        Self {
            message: message.into(),
            quick_fixes,
            exit_code,
        }
    }

    pub fn quick_fixes(&self) -> &'static [&'static str] {
        self.quick_fixes
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for ProviderResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ProviderResolutionError {}

/// The provider and model a session should talk to.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub provider: ProviderConfig,
    pub model: String,
}

/// Picks a provider: explicit override, then the configured default, then
/// the first known provider that has credentials. The model comes from the
/// override, the config's per-provider default, then the provider's own.
pub fn resolve_provider(
    provider_override: Option<&str>,
    model_override: Option<&str>,
    config: &Config,
    credentials: &dyn CredentialSource,
) -> Result<ResolvedProvider, ProviderResolutionError> {
    let entries = known_providers(config);
    let find = |id: &str| {
        entries
            .iter()
            .find(|entry| entry.id.eq_ignore_ascii_case(id))
            .cloned()
    };

    let requested = provider_override
        .filter(|value| !value.is_empty())
        .or(config.default_provider.as_deref());

    let (entry, api_key) = match requested {
        Some(id) => {
            let entry = find(id).ok_or_else(|| ProviderResolutionError::unknown_provider(id))?;
            let api_key = credentials.api_key(&entry.api_key_env).ok_or_else(|| {
                ProviderResolutionError::provider_not_configured(&entry.id, &entry.api_key_env)
            })?;
            (entry, api_key)
        }
        None => entries
            .iter()
            .find_map(|entry| {
                credentials
                    .api_key(&entry.api_key_env)
                    .map(|key| (entry.clone(), key))
            })
            .ok_or_else(ProviderResolutionError::missing_authentication)?,
    };

    let model = model_override
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| config.get_default_model(&entry.id).cloned())
        .or_else(|| entry.default_model.clone())
        .ok_or_else(|| ProviderResolutionError::model_missing(&entry.id))?;

    Ok(ResolvedProvider {
        provider: entry.into_config(api_key),
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CustomProvider;
    use std::collections::HashMap;

    struct MapCredentials(HashMap<&'static str, &'static str>);

    impl MapCredentials {
        fn with(pairs: &[(&'static str, &'static str)]) -> Self {
            Self(pairs.iter().copied().collect())
        }
    }

    impl CredentialSource for MapCredentials {
        fn api_key(&self, env_var: &str) -> Option<String> {
            self.0.get(env_var).map(|value| value.to_string())
        }
    }

    fn custom_provider(
        id: &str,
        base_url: &str,
        mode: Option<&str>,
        api_key_env: Option<&str>,
    ) -> CustomProvider {
        CustomProvider {
            id: id.to_string(),
            display_name: id.to_string(),
            base_url: base_url.to_string(),
            mode: mode.map(str::to_string),
            api_key_env: api_key_env.map(str::to_string),
            title_model: None,
        }
    }

    #[test]
    fn key_env_names_are_normalized() {
        assert_eq!(default_key_env("openai"), "OPENAI_API_KEY");
        assert_eq!(default_key_env("my-local"), "MY_LOCAL_API_KEY");
    }

    #[test]
    fn override_wins_over_config_default() {
        let config = Config {
            default_provider: Some("openai".to_string()),
            ..Default::default()
        };
        let creds = MapCredentials::with(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]);

        let resolved =
            resolve_provider(Some("Anthropic"), None, &config, &creds).expect("resolves");
        assert_eq!(resolved.provider.id, "anthropic");
        assert_eq!(resolved.provider.kind, ProviderKind::Anthropic);
        assert_eq!(resolved.provider.api_key, "sk-ant");
        assert_eq!(resolved.model, "claude-sonnet-4-5");
    }

    #[test]
    fn config_default_requires_credentials() {
        let config = Config {
            default_provider: Some("groq".to_string()),
            ..Default::default()
        };
        let creds = MapCredentials::with(&[("OPENAI_API_KEY", "sk-openai")]);

        let err = resolve_provider(None, None, &config, &creds).expect_err("no groq key");
        assert!(err.to_string().contains("GROQ_API_KEY"));
        assert_eq!(err.exit_code(), 2);
        assert!(!err.quick_fixes().is_empty());
    }

    #[test]
    fn falls_back_to_first_provider_with_credentials() {
        let creds = MapCredentials::with(&[("MISTRAL_API_KEY", "sk-mistral")]);
        let resolved =
            resolve_provider(None, None, &Config::default(), &creds).expect("resolves");
        assert_eq!(resolved.provider.id, "mistral");
        assert_eq!(
            resolved.provider.title_model.as_deref(),
            Some("mistral-small-latest")
        );
    }

    #[test]
    fn no_credentials_at_all() {
        let err = resolve_provider(None, None, &Config::default(), &MapCredentials::with(&[]))
            .expect_err("nothing configured");
        assert!(err.to_string().contains("No provider credentials"));
    }

    #[test]
    fn unknown_provider_is_reported() {
        let creds = MapCredentials::with(&[("OPENAI_API_KEY", "sk")]);
        let err = resolve_provider(Some("nope"), None, &Config::default(), &creds)
            .expect_err("unknown");
        assert!(err.to_string().contains("Unknown provider 'nope'"));
    }

    #[test]
    fn model_precedence() {
        let mut config = Config::default();
        config
            .default_models
            .insert("openai".to_string(), "gpt-configured".to_string());
        let creds = MapCredentials::with(&[("OPENAI_API_KEY", "sk")]);

        let from_config =
            resolve_provider(Some("openai"), None, &config, &creds).expect("resolves");
        assert_eq!(from_config.model, "gpt-configured");

        let from_cli =
            resolve_provider(Some("openai"), Some("gpt-cli"), &config, &creds).expect("resolves");
        assert_eq!(from_cli.model, "gpt-cli");
    }

    #[test]
    fn custom_providers_use_their_key_env_and_need_a_model() {
        let mut config = Config::default();
        config.custom_providers.push(custom_provider(
            "local",
            "http://localhost:8080/v1",
            Some("google"),
            Some("LOCAL_TOKEN"),
        ));
        let creds = MapCredentials::with(&[("LOCAL_TOKEN", "tok")]);

        let err = resolve_provider(Some("local"), None, &config, &creds).expect_err("no model");
        assert!(err.to_string().contains("no default model"));

        let resolved =
            resolve_provider(Some("local"), Some("gemma"), &config, &creds).expect("resolves");
        assert_eq!(resolved.provider.kind, ProviderKind::Google);
        assert_eq!(resolved.provider.base_url, "http://localhost:8080/v1");
        assert_eq!(resolved.provider.api_key, "tok");
    }

    #[test]
    fn custom_provider_replaces_builtin_with_same_id() {
        let mut config = Config::default();
        config.custom_providers.push(custom_provider(
            "openai",
            "https://proxy.example/v1",
            None,
            None,
        ));
        let entries = known_providers(&config);
        let openai: Vec<_> = entries.iter().filter(|e| e.id == "openai").collect();
        assert_eq!(openai.len(), 1);
        assert_eq!(openai[0].base_url, "https://proxy.example/v1");
        assert!(!openai[0].builtin);
    }
}

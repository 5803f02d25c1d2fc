use super::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn missing_file_loads_defaults() {
    let dir = tempdir().expect("tempdir");
    let config = Config::load_from_path(&dir.path().join("config.toml")).expect("load");
    assert_eq!(config, Config::default());
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config {
        default_provider: Some("anthropic".to_string()),
        ..Default::default()
    };
    config
        .default_models
        .insert("anthropic".to_string(), "claude-test".to_string());
    config.custom_providers.push(CustomProvider {
        id: "local".to_string(),
        display_name: "Local LLM".to_string(),
        base_url: "http://localhost:8080/v1".to_string(),
        mode: None,
        api_key_env: Some("LOCAL_TOKEN".to_string()),
        title_model: None,
    });
    config.generation.temperature = Some(0.4);
    config.generation.stream = Some(false);

    config.save_to_path(&path).expect("save");
    let loaded = Config::load_from_path(&path).expect("load");
    assert_eq!(loaded, config);
}

#[test]
fn parses_generation_table() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
default_provider = "openai"

[default_models]
openai = "gpt-4o-mini"

[generation]
temperature = 0.2
max_tokens = 512
system_prompt = "Be brief."
auto_title = false
"#,
    )
    .expect("write");

    let config = Config::load_from_path(&path).expect("load");
    assert_eq!(config.default_provider.as_deref(), Some("openai"));
    assert_eq!(
        config.get_default_model("OpenAI").map(String::as_str),
        Some("gpt-4o-mini")
    );

    let generation = config.generation.generation_config("openai", "gpt-4o-mini");
    assert_eq!(generation.temperature, Some(0.2));
    assert_eq!(generation.max_tokens, Some(512));
    assert_eq!(generation.system_prompt.as_deref(), Some("Be brief."));
    assert!(!generation.auto_title);
    assert!(generation.stream, "stream defaults on when unset");
}

#[test]
fn invalid_toml_reports_parse_error() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(&path, "default_provider = [").expect("write");

    let err = Config::load_from_path(&path).expect_err("should fail");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().starts_with("Failed to parse config at"));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn default_model_lookup_ignores_case() {
    let mut config = Config::default();
    config
        .default_models
        .insert("Groq".to_string(), "llama".to_string());
    assert_eq!(config.get_default_model("groq").map(String::as_str), Some("llama"));
    assert_eq!(config.get_default_model("GROQ").map(String::as_str), Some("llama"));
    assert!(config.get_default_model("openai").is_none());
}

#[test]
fn custom_provider_table_parses() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[[custom_providers]]
id = "mylocal"
display_name = "My Local"
base_url = "http://localhost:1234/v1"
mode = "anthropic"
title_model = "small"
"#,
    )
    .expect("write");

    let config = Config::load_from_path(&path).expect("load");
    let custom = &config.custom_providers[0];
    assert_eq!(custom.id, "mylocal");
    assert_eq!(custom.mode.as_deref(), Some("anthropic"));
    assert_eq!(custom.title_model.as_deref(), Some("small"));
    assert!(custom.api_key_env.is_none());
}

//! Model listing functionality
//!
//! This module handles listing available models from the resolved provider.

use crate::api::models::fetch_models;
use crate::core::config::Config;
use crate::core::providers::ResolvedProvider;
use chrono::{DateTime, Utc};
use std::error::Error;

pub async fn list_models(
    config: &Config,
    resolved: ResolvedProvider,
) -> Result<(), Box<dyn Error>> {
    let provider = resolved.provider;

    println!("🤖 Available Models for {}", provider.display_name);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    if let Some(default_model) = config.get_default_model(&provider.id) {
        println!("🎯 Default model for this provider: {default_model} (from config)");
        println!();
    }

    let client = reqwest::Client::new();
    let models = fetch_models(&client, &provider).await?;

    if models.is_empty() {
        println!("No models found for this provider.");
        return Ok(());
    }

    println!("Found {} models (sorted newest first):", models.len());
    println!();

    for model in models {
        println!("  • {}", model.code);
        if !model.display_name.is_empty() && model.display_name != model.code {
            println!("    Name: {}", model.display_name);
        }
        if let Some(created) = model.created.filter(|created| *created > 0) {
            // Some APIs report milliseconds.
            let timestamp_secs = if created > 10_000_000_000 {
                created / 1000
            } else {
                created
            };
            if let Some(dt) = DateTime::<Utc>::from_timestamp(timestamp_secs, 0) {
                println!("    Created: {}", dt.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        println!();
    }

    Ok(())
}

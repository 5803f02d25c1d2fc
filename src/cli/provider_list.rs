use std::error::Error;

use crate::core::config::Config;
use crate::core::providers::{known_providers, CredentialSource, ProviderEntry};

pub fn list_providers(
    config: &Config,
    credentials: &dyn CredentialSource,
) -> Result<(), Box<dyn Error>> {
    let providers = known_providers(config);
    if providers.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    println!("Providers:");
    println!();
    for line in provider_table(&providers, config.default_provider.as_deref(), credentials) {
        println!("{line}");
    }
    if config.default_provider.is_some() {
        println!();
        println!("* = default provider");
    }
    Ok(())
}

fn provider_table(
    providers: &[ProviderEntry],
    default_provider: Option<&str>,
    credentials: &dyn CredentialSource,
) -> Vec<String> {
    let rows: Vec<[String; 5]> = providers
        .iter()
        .map(|entry| {
            let is_default =
                default_provider.is_some_and(|d| d.eq_ignore_ascii_case(&entry.id));
            let id = if is_default {
                format!("{}*", entry.id)
            } else {
                entry.id.clone()
            };
            let status = if credentials.api_key(&entry.api_key_env).is_some() {
                "✅"
            } else {
                "❌"
            };
            [
                id,
                entry.display_name.clone(),
                entry.kind.to_string(),
                entry.api_key_env.clone(),
                status.to_string(),
            ]
        })
        .collect();

    let header = ["Provider", "Display Name", "Mode", "Key Variable", "Key"];
    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: [&str; 5]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(header)];
    for row in &rows {
        lines.push(format_row([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
            row[4].as_str(),
        ]));
    }
    lines
}

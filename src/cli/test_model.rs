use std::error::Error;

use crate::core::providers::ResolvedProvider;
use crate::core::service::{AiService, ChatBackend};

pub async fn run_test_model(resolved: ResolvedProvider) -> Result<(), Box<dyn Error>> {
    let ResolvedProvider { provider, model } = resolved;
    let service = AiService::new(reqwest::Client::new());

    println!("🔌 Testing {model} on {}...", provider.display_name);
    if service.test_model(&provider, &model).await {
        println!("✅ {model} responded");
        Ok(())
    } else {
        eprintln!("❌ {model} did not respond (set PALAVER_LOG=debug for details)");
        std::process::exit(1);
    }
}

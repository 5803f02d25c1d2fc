//! Single-exchange "say" command

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use crate::core::chat_stream::{drive_session, ChatStreamService};
use crate::core::config::Config;
use crate::core::providers::ResolvedProvider;
use crate::core::service::AiService;
use crate::core::session::{Session, SessionUpdate};

pub struct SayOptions {
    pub prompt: String,
    pub stream: bool,
    pub system: Option<String>,
}

pub async fn run_say(
    config: &Config,
    resolved: ResolvedProvider,
    options: SayOptions,
) -> Result<(), Box<dyn Error>> {
    let ResolvedProvider { provider, model } = resolved;
    let mut generation = config
        .generation
        .generation_config(provider.id.clone(), model);
    generation.stream = options.stream;
    generation.auto_title = false;
    if options.system.is_some() {
        generation.system_prompt = options.system;
    }

    let backend = Arc::new(AiService::new(reqwest::Client::new()));
    let (service, mut rx) = ChatStreamService::new(backend);
    let mut session = Session::new(provider, generation);
    let mut updates = session.subscribe();

    let command = session.send_input(options.prompt, Vec::new());
    {
        let drive = drive_session(&mut session, &service, &mut rx, command);
        tokio::pin!(drive);
        loop {
            tokio::select! {
                _ = &mut drive => break,
                Some(update) = updates.recv() => print_update(update)?,
            }
        }
    }
    while let Ok(update) = updates.try_recv() {
        print_update(update)?;
    }
    println!();

    if let Some(description) = session.error_description() {
        eprintln!("\n❌ Error: {description}");
        std::process::exit(1);
    }
    Ok(())
}

fn print_update(update: SessionUpdate) -> io::Result<()> {
    if let SessionUpdate::ContentAppended { delta, .. } = update {
        let mut stdout = io::stdout().lock();
        stdout.write_all(delta.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

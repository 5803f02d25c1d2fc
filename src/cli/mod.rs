//! Command-line interface parsing and handling
//!
//! A thin shell over the library: each subcommand resolves a provider,
//! builds the pieces it needs, and prints results to stdout.

pub mod model_list;
pub mod provider_list;
pub mod say;
pub mod test_model;

use std::error::Error;

use clap::{Parser, Subcommand};

use crate::cli::model_list::list_models;
use crate::cli::provider_list::list_providers;
use crate::cli::say::{run_say, SayOptions};
use crate::cli::test_model::run_test_model;
use crate::core::config::Config;
use crate::core::providers::{
    resolve_provider, EnvCredentials, ProviderResolutionError, ResolvedProvider,
};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VERGEN_GIT_SHA"),
    "\ndescribe: ",
    env!("VERGEN_GIT_DESCRIBE"),
    "\nbuilt: ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    "\nrustc: ",
    env!("VERGEN_RUSTC_SEMVER"),
);

#[derive(Parser)]
#[command(name = "palaver", version, long_version = LONG_VERSION)]
#[command(about = "Streaming chat with OpenAI, Anthropic, and Gemini compatible APIs")]
#[command(
    long_about = "Palaver talks to remote LLM APIs over their streaming protocols.\n\n\
Credentials:\n\
  Each provider reads its key from <PROVIDER>_API_KEY, e.g. OPENAI_API_KEY,\n\
  ANTHROPIC_API_KEY, GOOGLE_API_KEY. Custom providers may name their own\n\
  variable with api_key_env in config.toml.\n\n\
Logging:\n\
  PALAVER_LOG       tracing filter written to stderr (default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Model to use; defaults to the configured or built-in model
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Provider to use; defaults to the configured provider
    #[arg(short = 'p', long, global = true, value_name = "PROVIDER")]
    pub provider: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a single prompt and stream the reply to stdout
    Say {
        /// Prompt text (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
        /// Wait for the complete reply instead of streaming
        #[arg(long)]
        no_stream: bool,
        /// System prompt for this exchange
        #[arg(long, value_name = "TEXT")]
        system: Option<String>,
    },
    /// Check that a model answers a trivial prompt
    TestModel,
    /// List models offered by a provider
    Models,
    /// List built-in and custom providers with credential status
    Providers,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = Config::load()?;

    match args.command {
        Commands::Providers => list_providers(&config, &EnvCredentials),
        Commands::Models => {
            let resolved = resolve_or_exit(args.provider.as_deref(), args.model.as_deref(), &config);
            list_models(&config, resolved).await
        }
        Commands::TestModel => {
            let resolved = resolve_or_exit(args.provider.as_deref(), args.model.as_deref(), &config);
            run_test_model(resolved).await
        }
        Commands::Say {
            prompt,
            no_stream,
            system,
        } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                eprintln!("Usage: palaver say <prompt>");
                std::process::exit(1);
            }
            let resolved = resolve_or_exit(args.provider.as_deref(), args.model.as_deref(), &config);
            run_say(
                &config,
                resolved,
                SayOptions {
                    prompt,
                    stream: !no_stream,
                    system,
                },
            )
            .await
        }
    }
}

fn resolve_or_exit(
    provider: Option<&str>,
    model: Option<&str>,
    config: &Config,
) -> ResolvedProvider {
    match resolve_provider(provider, model, config, &EnvCredentials) {
        Ok(resolved) => resolved,
        Err(err) => report_and_exit(err),
    }
}

fn report_and_exit(err: ProviderResolutionError) -> ! {
    eprintln!("{err}");
    let fixes = err.quick_fixes();
    if !fixes.is_empty() {
        eprintln!();
        eprintln!("💡 Quick fixes:");
        for fix in fixes {
            eprintln!("  • {fix}");
        }
    }
    std::process::exit(err.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn say_collects_prompt_words_and_flags() {
        let args = Args::try_parse_from([
            "palaver", "say", "-p", "groq", "--no-stream", "hello", "there",
        ])
        .expect("parses");
        assert_eq!(args.provider.as_deref(), Some("groq"));
        match args.command {
            Commands::Say {
                prompt, no_stream, ..
            } => {
                assert_eq!(prompt, ["hello", "there"]);
                assert!(no_stream);
            }
            _ => panic!("expected say"),
        }
    }

    #[test]
    fn global_model_flag_applies_to_subcommands() {
        let args = Args::try_parse_from(["palaver", "test-model", "-m", "gpt-4o-mini"])
            .expect("parses");
        assert_eq!(args.model.as_deref(), Some("gpt-4o-mini"));
        assert!(matches!(args.command, Commands::TestModel));
    }
}

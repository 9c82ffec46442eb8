//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod persona_list;
pub mod render;
pub mod say;
pub mod session;


use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::chat::run_chat;
use crate::cli::persona_list::{list_personas, set_default_persona};
use crate::cli::say::run_say;
use crate::core::persona::PersonaTag;

/// Environment variable holding the `tracing` filter directives.
pub const LOG_ENV: &str = "CHATRELAY_LOG";

fn long_version() -> &'static str {
    static LONG_VERSION: OnceLock<String> = OnceLock::new();
    LONG_VERSION.get_or_init(|| {
        let describe = option_env!("VERGEN_GIT_DESCRIBE").unwrap_or("unknown");
        let sha = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown");
        let built = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown");
        let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");
        format!(
            "{}\ngit describe: {describe}\ncommit: {sha}\nbuilt: {built}\nrustc: {rustc}",
            env!("CARGO_PKG_VERSION")
        )
    })
}

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version, long_version = long_version())]
#[command(about = "Stream chat completions from an OpenAI-compatible API")]
#[command(
    long_about = "chatrelay is a line-oriented chat client for OpenAI-compatible chat completion \
APIs. Responses stream into the terminal as they are generated.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    Your API key (may be empty for local servers)\n\
  OPENAI_BASE_URL   Custom API base URL (optional, defaults to https://api.openai.com/v1)\n\
  CHATRELAY_LOG     Log filter, e.g. 'debug' or 'chatrelay=trace' (defaults to warn)\n\n\
Chat commands:\n\
  /persona [NAME]   Show or switch persona\n\
  /clear            Clear the conversation\n\
  /attach PATH      Attach a text file to the next message\n\
  /image PATH       Attach an image to the next message\n\
  /quit             Leave the chat\n\
  Ctrl+C            Stop the response being generated, or quit at the prompt"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Persona to chat as (teacher, student, developer)
    #[arg(short = 'r', long, global = true, value_name = "PERSONA", value_parser = PersonaTag::from_str)]
    pub persona: Option<PersonaTag>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Send a single prompt and print the streamed response
    Say {
        /// Prompt text; multiple words are joined with spaces
        #[arg(required = true)]
        prompt: Vec<String>,
        /// Text file (txt, csv, md) to include with the prompt
        #[arg(short = 'f', long, value_name = "PATH", conflicts_with = "image")]
        file: Option<PathBuf>,
        /// Image (png, jpg, jpeg, gif, webp) to send with the prompt
        #[arg(short = 'i', long, value_name = "PATH")]
        image: Option<PathBuf>,
    },
    /// List the available personas
    Personas,
    /// Persist the persona used when none is given
    SetPersona {
        /// Persona name
        persona: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(args.persona).await,
        Commands::Say {
            prompt,
            file,
            image,
        } => run_say(prompt, file, image, args.persona).await,
        Commands::Personas => list_personas(),
        Commands::SetPersona { persona } => set_default_persona(&persona),
    }
}

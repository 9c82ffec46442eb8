//! Shared setup for commands that talk to the completion endpoint.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::chat_stream::{CompletionBackend, CompletionClient};
use crate::core::config::Config;
use crate::core::conversation::Conversation;
use crate::core::persona::{PersonaManager, PersonaTag};
use crate::core::providers::resolve_env_session;
use crate::core::transcript::TranscriptStore;

pub struct ChatSession {
    pub personas: PersonaManager,
    pub conversation: Arc<Conversation>,
}

pub fn start_session(persona: Option<PersonaTag>) -> Result<ChatSession, Box<dyn Error>> {
    let config = Config::load()?;

    let session = match resolve_env_session(&config) {
        Ok(session) => session,
        Err(err) => {
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
    };
    debug!(
        provider = %session.provider_display_name,
        base_url = %session.base_url,
        "Resolved completion endpoint"
    );

    let client = match config.connect_timeout_secs {
        Some(secs) => CompletionClient::with_connect_timeout(
            &session.base_url,
            &session.api_key,
            Duration::from_secs(secs),
        )?,
        None => CompletionClient::new(&session.base_url, &session.api_key),
    };
    let backend: Arc<dyn CompletionBackend> = Arc::new(client);

    let mut personas = PersonaManager::load_personas(&config);
    if let Some(tag) = persona {
        personas.set_active_persona(tag)?;
    }

    let mut conversation = Conversation::new(
        Arc::new(TranscriptStore::new()),
        backend,
        personas.active_role(),
    );
    if let Some(notice) = &config.error_notice {
        conversation = conversation.with_error_notice(notice.clone());
    }

    Ok(ChatSession {
        personas,
        conversation: Arc::new(conversation),
    })
}

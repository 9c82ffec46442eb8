use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::persona::PersonaTag;

/// Per-persona override of the built-in role table. Missing fields keep the
/// built-in value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PersonaConfig {
    pub tag: PersonaTag,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Completion endpoint base URL; `OPENAI_BASE_URL` overrides it
    pub base_url: Option<String>,
    /// Persona selected at startup
    pub default_persona: Option<PersonaTag>,
    /// Text appended to the transcript when a response fails
    pub error_notice: Option<String>,
    /// TCP connect timeout for completion requests, in seconds
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
}

impl Config {
    /// First `[[personas]]` entry for `tag`; later duplicates are ignored.
    pub fn persona_override(&self, tag: PersonaTag) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.tag == tag)
    }

    pub fn set_default_persona(&mut self, tag: PersonaTag) {
        self.default_persona = Some(tag);
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

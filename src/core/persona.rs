use crate::core::builtin_personas::load_builtin_personas;
use crate::core::config::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// The closed set of personas the client can talk as.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PersonaTag {
    Teacher,
    Student,
    #[default]
    Developer,
}

impl PersonaTag {
    pub const ALL: [PersonaTag; 3] = [
        PersonaTag::Teacher,
        PersonaTag::Student,
        PersonaTag::Developer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PersonaTag::Teacher => "teacher",
            PersonaTag::Student => "student",
            PersonaTag::Developer => "developer",
        }
    }
}

impl fmt::Display for PersonaTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        PersonaTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == normalized)
            .ok_or_else(|| {
                let available: Vec<&str> = PersonaTag::ALL.iter().map(|t| t.as_str()).collect();
                format!(
                    "Persona '{}' not found. Available personas: {}",
                    value.trim(),
                    available.join(", ")
                )
            })
    }
}

/// Model and system prompt used for requests made on behalf of a persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub model: String,
    pub system_prompt: String,
}

impl RoleConfig {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

/// Manages persona state and operations
pub struct PersonaManager {
    /// Role table: built-ins with config overrides applied
    personas: BTreeMap<PersonaTag, RoleConfig>,
    /// Currently active persona
    active: PersonaTag,
}

impl PersonaManager {
    /// Build the role table from the built-ins and the user's overrides
    pub fn load_personas(config: &Config) -> Self {
        let mut personas: BTreeMap<PersonaTag, RoleConfig> =
            load_builtin_personas().into_iter().collect();

        for tag in PersonaTag::ALL {
            let Some(overrides) = config.persona_override(tag) else {
                continue;
            };
            let role = personas
                .entry(tag)
                .or_insert_with(|| RoleConfig::new("", ""));
            if let Some(model) = &overrides.model {
                role.model = model.clone();
            }
            if let Some(prompt) = &overrides.system_prompt {
                role.system_prompt = prompt.clone();
            }
            debug!(persona = %tag, "Applied persona override from config");
        }

        PersonaManager {
            personas,
            active: config.default_persona.unwrap_or_default(),
        }
    }

    /// Get the available personas in tag order
    pub fn list_personas(&self) -> impl Iterator<Item = (PersonaTag, &RoleConfig)> {
        self.personas.iter().map(|(tag, role)| (*tag, role))
    }

    pub fn find(&self, tag: PersonaTag) -> Option<&RoleConfig> {
        self.personas.get(&tag)
    }

    /// Make `tag` the active persona and return its configuration
    pub fn set_active_persona(&mut self, tag: PersonaTag) -> Result<RoleConfig, String> {
        let role = self
            .find(tag)
            .cloned()
            .ok_or_else(|| format!("Persona '{tag}' has no configuration"))?;
        self.active = tag;
        Ok(role)
    }

    pub fn active_tag(&self) -> PersonaTag {
        self.active
    }

    /// Configuration for the active persona
    pub fn active_role(&self) -> RoleConfig {
        self.find(self.active)
            .cloned()
            .unwrap_or_else(|| RoleConfig::new("", ""))
    }
}

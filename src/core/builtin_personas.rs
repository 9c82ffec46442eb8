use crate::core::persona::{PersonaTag, RoleConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct BuiltinPersona {
    tag: PersonaTag,
    #[serde(flatten)]
    role: RoleConfig,
}

#[derive(Debug, Deserialize)]
struct BuiltinPersonaConfig {
    personas: Vec<BuiltinPersona>,
}

pub fn load_builtin_personas() -> Vec<(PersonaTag, RoleConfig)> {
    const CONFIG_CONTENT: &str = include_str!("../builtins/personas.toml");
    let config: BuiltinPersonaConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtins/personas.toml");
    config
        .personas
        .into_iter()
        .map(|persona| (persona.tag, persona.role))
        .collect()
}

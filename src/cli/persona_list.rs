use crate::core::config::{path_display, Config};
use crate::core::persona::{PersonaManager, PersonaTag};
use std::error::Error;
use std::io::{self, Write};

/// Bulleted persona listing shared by `chatrelay personas` and `/persona`.
pub fn write_personas(out: &mut impl Write, manager: &PersonaManager) -> io::Result<()> {
    for (tag, role) in manager.list_personas() {
        let marker = if tag == manager.active_tag() {
            " (active)"
        } else {
            ""
        };
        writeln!(out, "  • {tag}{marker}: {}", role.model)?;
        if let Some(first_line) = role.system_prompt.lines().next() {
            writeln!(out, "      {first_line}")?;
        }
    }
    Ok(())
}

pub fn list_personas() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let manager = PersonaManager::load_personas(&config);

    println!("Available personas:\n");
    write_personas(&mut io::stdout().lock(), &manager)?;

    if let Ok(path) = Config::get_config_path() {
        println!("\n💡 Override models and prompts in {}", path_display(path));
    }
    Ok(())
}

pub fn set_default_persona(name: &str) -> Result<(), Box<dyn Error>> {
    let tag: PersonaTag = name.parse()?;
    let mut config = Config::load()?;
    config.set_default_persona(tag);
    config.save()?;
    println!("✅ Set default persona to: {tag}");
    Ok(())
}

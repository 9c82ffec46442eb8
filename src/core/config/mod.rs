pub mod data;
pub mod io;

pub use data::{path_display, Config, PersonaConfig};
pub use io::ConfigError;

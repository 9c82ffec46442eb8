pub mod attachments;
pub mod builtin_personas;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod message;
pub mod persona;
pub mod providers;
pub mod transcript;

//! chatrelay streams chat completions from OpenAI-compatible APIs into an
//! observable transcript.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the transcript store, the streaming completion client,
//!   the turn orchestrator, persona selection, attachments and configuration.
//! - [`api`] defines the chat completion payloads sent to and received from
//!   the endpoint.
//! - [`cli`] is a line-oriented host that drives the core from a terminal.
//! - [`utils`] holds URL and header helpers shared by the client.
//!
//! The binary (`src/main.rs`) routes straight into [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;

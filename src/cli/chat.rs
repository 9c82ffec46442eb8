//! Line-oriented interactive chat on stdin/stdout.

use std::error::Error;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::cli::persona_list::write_personas;
use crate::cli::render::TranscriptPrinter;
use crate::cli::session::start_session;
use crate::core::attachments::{
    classify, AttachmentKind, AttachmentReader, FsAttachmentReader, LoadedAttachment,
};
use crate::core::chat_stream::UserTurn;
use crate::core::conversation::{Conversation, TurnOutcome};
use crate::core::persona::PersonaTag;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChatInput {
    Empty,
    Quit,
    Clear,
    Persona(Option<String>),
    Attach(PathBuf),
    Image(PathBuf),
    Help,
    Unknown(String),
    Message(String),
}

pub(crate) fn parse_input(line: &str) -> ChatInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatInput::Message(trimmed.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));
    let argument = (!rest.is_empty()).then(|| rest.to_string());

    match (name, argument) {
        ("quit" | "exit", _) => ChatInput::Quit,
        ("clear", _) => ChatInput::Clear,
        ("help", _) => ChatInput::Help,
        ("persona", argument) => ChatInput::Persona(argument),
        ("attach", Some(path)) => ChatInput::Attach(PathBuf::from(path)),
        ("image", Some(path)) => ChatInput::Image(PathBuf::from(path)),
        _ => ChatInput::Unknown(trimmed.to_string()),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Prompted {
    Line(String),
    Interrupted,
    Eof,
}

/// Wait for the next input line, or for `interrupt` to fire first.
pub(crate) async fn read_prompted<R>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = ()>,
) -> io::Result<Prompted>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        biased;
        _ = interrupt => Ok(Prompted::Interrupted),
        line = lines.next_line() => Ok(line?.map_or(Prompted::Eof, Prompted::Line)),
    }
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

const HELP: &str = "Commands:
  /persona [NAME]   Show or switch persona (clears the conversation)
  /clear            Start over with an empty conversation
  /attach PATH      Attach a text file (txt, csv, md) to the next message
  /image PATH       Attach an image (png, jpg, gif, webp) to the next message
  /quit             Leave the chat
Ctrl+C stops the response being generated, or quits at the prompt.";

pub async fn run_chat(persona: Option<PersonaTag>) -> Result<(), Box<dyn Error>> {
    let session = start_session(persona)?;
    let mut personas = session.personas;
    let conversation = session.conversation;
    let printer = TranscriptPrinter::attach(conversation.store());
    let reader = FsAttachmentReader;

    println!(
        "Chatting as {} ({}). Type /help for commands.",
        personas.active_tag(),
        personas.active_role().model
    );

    let mut pending: Option<LoadedAttachment> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let line = match read_prompted(&mut lines, interrupted()).await? {
            Prompted::Line(line) => line,
            Prompted::Interrupted => {
                println!();
                break;
            }
            Prompted::Eof => break,
        };

        match parse_input(&line) {
            ChatInput::Empty => {}
            ChatInput::Quit => break,
            ChatInput::Help => println!("{HELP}"),
            ChatInput::Unknown(input) => eprintln!("❌ Unknown command: {input}"),
            ChatInput::Clear => {
                conversation.reset();
                pending = None;
                println!("✅ Conversation cleared");
            }
            ChatInput::Persona(None) => write_personas(&mut io::stdout().lock(), &personas)?,
            ChatInput::Persona(Some(name)) => {
                let switched = name
                    .parse::<PersonaTag>()
                    .and_then(|tag| personas.set_active_persona(tag));
                match switched {
                    Ok(role) => {
                        conversation.switch_role(role);
                        pending = None;
                        println!("✅ Now chatting as {}", personas.active_tag());
                    }
                    Err(err) => eprintln!("❌ {err}"),
                }
            }
            ChatInput::Attach(path) => {
                if let Some(loaded) = load_attachment(&reader, &path, false).await {
                    pending = Some(loaded);
                }
            }
            ChatInput::Image(path) => {
                if let Some(loaded) = load_attachment(&reader, &path, true).await {
                    pending = Some(loaded);
                }
            }
            ChatInput::Message(text) => {
                let turn = match pending.take() {
                    Some(LoadedAttachment::Text(attachment)) => {
                        UserTurn::with_attachment(text, attachment)
                    }
                    Some(LoadedAttachment::Image { data_uri, .. }) => {
                        UserTurn::image(text, data_uri)
                    }
                    None => UserTurn::text(text),
                };
                let outcome = run_turn(&conversation, turn).await;
                println!();
                if outcome == TurnOutcome::Cancelled {
                    println!("⏹  Stopped");
                }
            }
        }
    }

    printer.detach();
    Ok(())
}

/// Run one turn, turning Ctrl+C into a stop request instead of an exit.
pub(crate) async fn run_turn(conversation: &Conversation, turn: UserTurn) -> TurnOutcome {
    let send = conversation.send(turn);
    tokio::pin!(send);
    loop {
        tokio::select! {
            outcome = &mut send => return outcome,
            signal = tokio::signal::ctrl_c() => {
                if signal.is_err() {
                    return send.await;
                }
                conversation.stop_generation();
            }
        }
    }
}

async fn load_attachment(
    reader: &FsAttachmentReader,
    path: &Path,
    want_image: bool,
) -> Option<LoadedAttachment> {
    let kind_matches = match classify(path) {
        Ok(AttachmentKind::Image { .. }) => want_image,
        Ok(AttachmentKind::Text) => !want_image,
        Err(err) => {
            eprintln!("❌ {err}");
            return None;
        }
    };
    if !kind_matches {
        let hint = if want_image { "/attach" } else { "/image" };
        eprintln!("❌ Use {hint} for {}", path.display());
        return None;
    }

    match reader.read(path).await {
        Ok(loaded) => {
            let name = match &loaded {
                LoadedAttachment::Text(attachment) => attachment.name.as_str(),
                LoadedAttachment::Image { name, .. } => name.as_str(),
            };
            println!("📎 {name} will be sent with your next message");
            Some(loaded)
        }
        Err(err) => {
            eprintln!("❌ {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_messages_and_commands() {
        assert_eq!(parse_input("   "), ChatInput::Empty);
        assert_eq!(
            parse_input("  hello there "),
            ChatInput::Message("hello there".to_string())
        );
        assert_eq!(parse_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_input("/clear"), ChatInput::Clear);
        assert_eq!(parse_input("/persona"), ChatInput::Persona(None));
        assert_eq!(
            parse_input("/persona  teacher "),
            ChatInput::Persona(Some("teacher".to_string()))
        );
        assert_eq!(
            parse_input("/attach notes/my file.txt"),
            ChatInput::Attach(PathBuf::from("notes/my file.txt"))
        );
        assert_eq!(
            parse_input("/image cat.png"),
            ChatInput::Image(PathBuf::from("cat.png"))
        );
    }

    #[tokio::test]
    async fn prompt_reads_lines_until_eof() {
        let mut lines = BufReader::new(&b"hello\n/quit\n"[..]).lines();

        let never = std::future::pending::<()>;
        assert_eq!(
            read_prompted(&mut lines, never()).await.unwrap(),
            Prompted::Line("hello".to_string())
        );
        assert_eq!(
            read_prompted(&mut lines, never()).await.unwrap(),
            Prompted::Line("/quit".to_string())
        );
        assert_eq!(read_prompted(&mut lines, never()).await.unwrap(), Prompted::Eof);
    }

    #[tokio::test]
    async fn interrupt_at_prompt_wins_over_pending_input() {
        let mut lines = BufReader::new(&b"hello\n"[..]).lines();

        assert_eq!(
            read_prompted(&mut lines, std::future::ready(())).await.unwrap(),
            Prompted::Interrupted
        );
        assert_eq!(
            read_prompted(&mut lines, std::future::pending()).await.unwrap(),
            Prompted::Line("hello".to_string())
        );
    }

    #[test]
    fn commands_missing_arguments_are_unknown() {
        assert_eq!(
            parse_input("/attach"),
            ChatInput::Unknown("/attach".to_string())
        );
        assert_eq!(
            parse_input("/bogus x"),
            ChatInput::Unknown("/bogus x".to_string())
        );
    }
}

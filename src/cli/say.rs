//! One-shot "say" command

use std::error::Error;
use std::path::PathBuf;

use crate::cli::chat::run_turn;
use crate::cli::render::TranscriptPrinter;
use crate::cli::session::start_session;
use crate::core::attachments::{AttachmentReader, FsAttachmentReader, LoadedAttachment};
use crate::core::chat_stream::UserTurn;
use crate::core::conversation::TurnOutcome;
use crate::core::persona::PersonaTag;

pub async fn run_say(
    prompt: Vec<String>,
    file: Option<PathBuf>,
    image: Option<PathBuf>,
    persona: Option<PersonaTag>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: chatrelay say <prompt> [--file PATH] [--image PATH]");
        std::process::exit(1);
    }

    let reader = FsAttachmentReader;
    let turn = match (file, image) {
        (Some(path), None) => match reader.read(&path).await? {
            LoadedAttachment::Text(attachment) => UserTurn::with_attachment(prompt, attachment),
            LoadedAttachment::Image { .. } => {
                return Err(format!("{} is an image; use --image", path.display()).into())
            }
        },
        (None, Some(path)) => match reader.read(&path).await? {
            LoadedAttachment::Image { data_uri, .. } => UserTurn::image(prompt, data_uri),
            LoadedAttachment::Text(_) => {
                return Err(format!("{} is a text file; use --file", path.display()).into())
            }
        },
        (None, None) => UserTurn::text(prompt),
        (Some(_), Some(_)) => return Err("Use either --file or --image, not both".into()),
    };

    let session = start_session(persona)?;
    let conversation = session.conversation;
    let printer = TranscriptPrinter::attach(conversation.store());

    let outcome = run_turn(&conversation, turn).await;
    println!();
    printer.detach();

    match outcome {
        TurnOutcome::Completed | TurnOutcome::Cancelled => Ok(()),
        TurnOutcome::Failed => Err("The response could not be completed".into()),
    }
}

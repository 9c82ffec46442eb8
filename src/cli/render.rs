//! Streams assistant output to a terminal by watching the transcript.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::message::{Message, MessageId};
use crate::core::transcript::{Subscription, TranscriptStore};

#[derive(Default)]
struct PrintState {
    current: Option<MessageId>,
    printed: usize,
}

impl PrintState {
    /// Text to emit so the terminal catches up with `latest`.
    fn catch_up(&mut self, latest: Option<&Message>) -> Option<String> {
        let Some(message) = latest else {
            *self = PrintState::default();
            return None;
        };
        if !message.is_assistant() {
            return None;
        }

        let mut out = String::new();
        if self.current.as_ref() != Some(&message.id) {
            if self.current.is_some() {
                out.push('\n');
            }
            self.current = Some(message.id.clone());
            self.printed = 0;
        }

        let suffix = message.content.get(self.printed..).unwrap_or_default();
        out.push_str(suffix);
        self.printed = message.content.len();

        (!out.is_empty()).then_some(out)
    }
}

/// Transcript subscriber that writes only the newly grown part of the latest
/// assistant message.
pub struct TranscriptPrinter {
    subscription: Subscription,
}

impl TranscriptPrinter {
    pub fn attach(store: &Arc<TranscriptStore>) -> Self {
        Self::attach_with_writer(store, io::stdout())
    }

    pub fn attach_with_writer<W>(store: &Arc<TranscriptStore>, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let reader = Arc::downgrade(store);
        let output = Mutex::new((PrintState::default(), writer));
        let subscription = store.subscribe(move || {
            let Some(store) = reader.upgrade() else {
                return;
            };
            let latest = store.last();
            let mut guard = output.lock().unwrap_or_else(PoisonError::into_inner);
            let (state, writer) = &mut *guard;
            if let Some(text) = state.catch_up(latest.as_ref()) {
                // Terminal write failures are not worth aborting a turn over.
                let _ = writer.write_all(text.as_bytes());
                let _ = writer.flush();
            }
        });
        Self { subscription }
    }

    pub fn detach(self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::MessageInput;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn prints_only_growth_of_assistant_messages() {
        let store = Arc::new(TranscriptStore::new());
        let buffer = SharedBuffer::default();
        let printer = TranscriptPrinter::attach_with_writer(&store, buffer.clone());

        store.append(MessageInput::user("2+2?"));
        let id = store.append(MessageInput::assistant(""));
        store.update(&id, "2+2").unwrap();
        store.update(&id, "2+2 equals 4").unwrap();
        store.append(MessageInput::assistant("notice"));

        assert_eq!(buffer.text(), "2+2 equals 4\nnotice");
        printer.detach();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn clear_resets_tracking() {
        let store = Arc::new(TranscriptStore::new());
        let buffer = SharedBuffer::default();
        let _printer = TranscriptPrinter::attach_with_writer(&store, buffer.clone());

        store.append(MessageInput::assistant("first"));
        store.clear();
        store.append(MessageInput::assistant("second"));

        assert_eq!(buffer.text(), "firstsecond");
    }
}

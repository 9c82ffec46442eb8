//! Turn orchestration: append the user message and a placeholder, stream
//! the completion into the placeholder, and recover from cancellation or
//! failure without leaving the transcript inconsistent.
//!
//! A turn moves `Idle -> Sending -> Streaming` and ends in one of the
//! [`TurnOutcome`]s, after which the conversation is `Idle` again. Only one
//! turn streams at a time: starting a new one cancels the previous turn, and
//! every transcript write re-checks that its turn is still current and not
//! cancelled, so a superseded or stopped turn never writes again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::chat_stream::{CompletionBackend, UserTurn};
use crate::core::message::{Attachment, MessageInput};
use crate::core::persona::RoleConfig;
use crate::core::transcript::TranscriptStore;

pub const DEFAULT_ERROR_NOTICE: &str =
    "Something went wrong while generating a response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed,
}

struct StreamSlot {
    current_stream_id: u64,
    cancel_token: Option<CancellationToken>,
    state: TurnState,
    last_outcome: Option<TurnOutcome>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Conversation {
    store: Arc<TranscriptStore>,
    backend: Arc<dyn CompletionBackend>,
    role: Mutex<RoleConfig>,
    slot: Mutex<StreamSlot>,
    /// Held for every transcript write made on behalf of a turn.
    write_gate: Mutex<()>,
    error_notice: String,
}

impl Conversation {
    pub fn new(
        store: Arc<TranscriptStore>,
        backend: Arc<dyn CompletionBackend>,
        role: RoleConfig,
    ) -> Self {
        Self {
            store,
            backend,
            role: Mutex::new(role),
            slot: Mutex::new(StreamSlot {
                current_stream_id: 0,
                cancel_token: None,
                state: TurnState::Idle,
                last_outcome: None,
            }),
            write_gate: Mutex::new(()),
            error_notice: DEFAULT_ERROR_NOTICE.to_string(),
        }
    }

    pub fn with_error_notice(mut self, notice: impl Into<String>) -> Self {
        self.error_notice = notice.into();
        self
    }

    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    pub fn role(&self) -> RoleConfig {
        lock(&self.role).clone()
    }

    pub fn state(&self) -> TurnState {
        lock(&self.slot).state
    }

    pub fn is_generating(&self) -> bool {
        self.state() != TurnState::Idle
    }

    /// Terminal state of the most recent turn that ran to its end.
    pub fn last_outcome(&self) -> Option<TurnOutcome> {
        lock(&self.slot).last_outcome
    }

    pub async fn send_message(
        &self,
        text: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> TurnOutcome {
        let turn = match attachment {
            Some(attachment) => UserTurn::with_attachment(text, attachment),
            None => UserTurn::text(text),
        };
        self.send(turn).await
    }

    /// Send a prompt together with an inline `data:` image URI. The
    /// transcript keeps only the prompt text.
    pub async fn send_image(
        &self,
        prompt: impl Into<String>,
        data_uri: impl Into<String>,
    ) -> TurnOutcome {
        self.send(UserTurn::image(prompt, data_uri)).await
    }

    /// Run one turn to completion. Any in-flight turn is cancelled first.
    pub async fn send(&self, turn: UserTurn) -> TurnOutcome {
        let (cancel, stream_id) = self.start_new_stream();
        let role = self.role();

        let opened = self.write_if_current(stream_id, &cancel, |store| {
            let history = store.snapshot();
            store.append(user_message(&turn));
            let assistant_id = store.append(MessageInput::assistant(""));
            (history, assistant_id)
        });
        let Some((history, assistant_id)) = opened else {
            return self.finish(stream_id, TurnOutcome::Cancelled);
        };

        let mut fragments = self.backend.stream(&role, &history, &turn, cancel.clone());
        self.set_state(stream_id, TurnState::Streaming);
        debug!(
            stream_id,
            model = %role.model,
            history = history.len(),
            "Streaming assistant response"
        );

        let mut accumulated = String::new();
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break TurnOutcome::Cancelled,
                next = fragments.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    accumulated.push_str(&fragment);
                    let applied = self.write_if_current(stream_id, &cancel, |store| {
                        store.update(&assistant_id, accumulated.as_str())
                    });
                    match applied {
                        Some(Ok(())) => {}
                        Some(Err(err)) => {
                            debug!(stream_id, error = %err, "Placeholder removed, abandoning turn");
                            break TurnOutcome::Cancelled;
                        }
                        None => break TurnOutcome::Cancelled,
                    }
                }
                Some(Err(err)) => {
                    if cancel.is_cancelled() {
                        break TurnOutcome::Cancelled;
                    }
                    warn!(
                        stream_id,
                        error = %err,
                        received_bytes = accumulated.len(),
                        "Completion stream failed"
                    );
                    let notice = self.write_if_current(stream_id, &cancel, |store| {
                        store.append(MessageInput::assistant(self.error_notice.clone()))
                    });
                    break match notice {
                        Some(_) => TurnOutcome::Failed,
                        None => TurnOutcome::Cancelled,
                    };
                }
                None if cancel.is_cancelled() => break TurnOutcome::Cancelled,
                None => break TurnOutcome::Completed,
            }
        };

        self.finish(stream_id, outcome)
    }

    /// Cancel the active turn. Returns `false` when nothing was streaming or
    /// the turn was already stopped.
    pub fn stop_generation(&self) -> bool {
        let token = lock(&self.slot).cancel_token.take();
        match token {
            Some(token) => {
                token.cancel();
                debug!("Generation stopped");
                true
            }
            None => false,
        }
    }

    /// Use `role` for subsequent requests and start over with an empty
    /// transcript. The active turn, if any, is cancelled.
    pub fn switch_role(&self, role: RoleConfig) {
        debug!(model = %role.model, "Switching role configuration");
        *lock(&self.role) = role;
        self.reset();
    }

    /// Cancel the active turn and clear the transcript.
    pub fn reset(&self) {
        {
            let mut slot = lock(&self.slot);
            if let Some(token) = slot.cancel_token.take() {
                token.cancel();
                slot.last_outcome = Some(TurnOutcome::Cancelled);
            }
            // Invalidate writers of the cancelled turn.
            slot.current_stream_id += 1;
            slot.state = TurnState::Idle;
        }
        let _gate = lock(&self.write_gate);
        self.store.clear();
    }

    fn start_new_stream(&self) -> (CancellationToken, u64) {
        let mut slot = lock(&self.slot);
        if let Some(token) = slot.cancel_token.take() {
            debug!(
                stream_id = slot.current_stream_id,
                "Cancelling in-flight turn for new message"
            );
            token.cancel();
        }

        slot.current_stream_id += 1;
        let token = CancellationToken::new();
        slot.cancel_token = Some(token.clone());
        slot.state = TurnState::Sending;

        (token, slot.current_stream_id)
    }

    fn is_current_stream(&self, stream_id: u64) -> bool {
        lock(&self.slot).current_stream_id == stream_id
    }

    fn set_state(&self, stream_id: u64, state: TurnState) {
        let mut slot = lock(&self.slot);
        if slot.current_stream_id == stream_id {
            slot.state = state;
        }
    }

    fn finish(&self, stream_id: u64, outcome: TurnOutcome) -> TurnOutcome {
        let mut slot = lock(&self.slot);
        if slot.current_stream_id == stream_id {
            slot.cancel_token = None;
            slot.state = TurnState::Idle;
            slot.last_outcome = Some(outcome);
        }
        debug!(stream_id, ?outcome, "Turn finished");
        outcome
    }

    fn write_if_current<R>(
        &self,
        stream_id: u64,
        cancel: &CancellationToken,
        write: impl FnOnce(&TranscriptStore) -> R,
    ) -> Option<R> {
        let _gate = lock(&self.write_gate);
        if cancel.is_cancelled() || !self.is_current_stream(stream_id) {
            return None;
        }
        Some(write(&self.store))
    }
}

fn user_message(turn: &UserTurn) -> MessageInput {
    match turn {
        UserTurn::Text { text, attachment } => {
            MessageInput::user(text.clone()).with_attachment(attachment.clone())
        }
        UserTurn::Image { prompt, .. } => MessageInput::user(prompt.clone()),
    }
}

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::api::ChatRequest;
use crate::core::chat_stream::{
    build_chat_request, CompletionBackend, FragmentStream, StreamError, UserTurn,
};
use crate::core::message::Message;
use crate::core::persona::RoleConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch process environment variables and restores
/// every variable it changed when dropped.
pub struct TestEnvVarGuard {
    originals: Vec<(String, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl TestEnvVarGuard {
    pub fn new() -> Self {
        Self {
            originals: Vec::new(),
            _lock: ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn remember(&mut self, key: &str) {
        if !self.originals.iter().any(|(existing, _)| existing == key) {
            self.originals.push((key.to_string(), std::env::var_os(key)));
        }
    }

    pub fn set_var(&mut self, key: &str, value: impl AsRef<OsStr>) {
        self.remember(key);
        std::env::set_var(key, value);
    }

    pub fn remove_var(&mut self, key: &str) {
        self.remember(key);
        std::env::remove_var(key);
    }
}

impl Drop for TestEnvVarGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain(..).rev() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// One step of a scripted completion stream.
pub enum ScriptStep {
    Fragment(String),
    Fail(StreamError),
    /// Signal `reached`, then wait for `release` before continuing.
    Pause {
        reached: Arc<Notify>,
        release: Arc<Notify>,
    },
}

impl ScriptStep {
    pub fn fragment(text: impl Into<String>) -> Self {
        ScriptStep::Fragment(text.into())
    }

    pub fn pause(reached: &Arc<Notify>, release: &Arc<Notify>) -> Self {
        ScriptStep::Pause {
            reached: Arc::clone(reached),
            release: Arc::clone(release),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub role: RoleConfig,
    pub history: Vec<Message>,
    pub turn: UserTurn,
}

impl RecordedCall {
    pub fn request(&self) -> ChatRequest {
        build_chat_request(&self.role, &self.history, &self.turn)
    }
}

/// Completion backend that replays one script per call and records what it
/// was asked. Calls beyond the provided scripts produce an empty stream.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn stream(
        &self,
        role: &RoleConfig,
        history: &[Message],
        turn: &UserTurn,
        _cancel: CancellationToken,
    ) -> FragmentStream {
        self.calls.lock().unwrap().push(RecordedCall {
            role: role.clone(),
            history: history.to_vec(),
            turn: turn.clone(),
        });
        let steps: VecDeque<ScriptStep> = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
            .into();

        stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    ScriptStep::Fragment(text) => return Some((Ok(text), steps)),
                    ScriptStep::Fail(err) => return Some((Err(err), VecDeque::new())),
                    ScriptStep::Pause { reached, release } => {
                        reached.notify_one();
                        release.notified().await;
                    }
                }
            }
        })
        .boxed()
    }
}

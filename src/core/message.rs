use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::{ROLE_ASSISTANT, ROLE_USER};

/// Opaque message identifier, unique within a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub(crate) fn new(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl TranscriptRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptRole::User => ROLE_USER,
            TranscriptRole::Assistant => ROLE_ASSISTANT,
        }
    }

    pub fn is_user(self) -> bool {
        self == TranscriptRole::User
    }

    pub fn is_assistant(self) -> bool {
        self == TranscriptRole::Assistant
    }
}

impl AsRef<str> for TranscriptRole {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for TranscriptRole {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl TryFrom<&str> for TranscriptRole {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            ROLE_USER => Ok(TranscriptRole::User),
            ROLE_ASSISTANT => Ok(TranscriptRole::Assistant),
            _ => Err(format!("invalid transcript role: {value}")),
        }
    }
}

impl TryFrom<String> for TranscriptRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<TranscriptRole> for String {
    fn from(value: TranscriptRole) -> Self {
        value.as_str().to_string()
    }
}

/// Text file contents attached to a user message. Read once when the
/// message is built and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Inline the attachment after `content` the way it is sent to the API.
    pub fn embed_into(&self, content: &str) -> String {
        format!(
            "{content}\n\nFile content ({}):\n{}",
            self.name, self.content
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: TranscriptRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    /// Content as the completion API sees it, with any attachment inlined.
    pub fn api_content(&self) -> String {
        match &self.attachment {
            Some(attachment) => attachment.embed_into(&self.content),
            None => self.content.clone(),
        }
    }
}

/// Everything needed to create a [`Message`] except its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInput {
    pub role: TranscriptRole,
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl MessageInput {
    pub fn new(role: TranscriptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachment: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TranscriptRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TranscriptRole::Assistant, content)
    }

    pub fn with_attachment(mut self, attachment: Option<Attachment>) -> Self {
        self.attachment = attachment;
        self
    }

    pub(crate) fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            role: self.role,
            content: self.content,
            attachment: self.attachment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_is_inlined_after_content() {
        let attachment = Attachment::new("a.txt", "hello");
        assert_eq!(
            attachment.embed_into("summarize"),
            "summarize\n\nFile content (a.txt):\nhello"
        );
    }

    #[test]
    fn api_content_without_attachment_is_unchanged() {
        let message = MessageInput::user("plain").into_message(MessageId::new("m1".into()));
        assert_eq!(message.api_content(), "plain");
    }

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(TranscriptRole::try_from("system").is_err());
        assert_eq!(
            TranscriptRole::try_from("assistant"),
            Ok(TranscriptRole::Assistant)
        );
    }

    #[test]
    fn roles_serialize_as_api_strings() {
        let json = serde_json::to_string(&TranscriptRole::User).unwrap();
        assert_eq!(json, "\"user\"");
        assert!(TranscriptRole::User == "user");
    }
}

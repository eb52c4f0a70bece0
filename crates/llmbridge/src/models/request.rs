use super::message::Message;
use super::role::Role;

/// Which inbound field supplied the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    Messages,
    Prompt,
    Input,
    RawBody,
}

/// A parsed chat-completion request. Never mutated after parsing; the orchestrator
/// derives its own working conversations from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub stream: bool,
    pub model: Option<String>,
    pub api_key_override: Option<String>,
    pub source: PromptSource,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, source: PromptSource) -> Self {
        Self {
            messages,
            stream: false,
            model: None,
            api_key_override: None,
            source,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Attach a credential that was already validated upstream
    pub fn with_api_key_override(mut self, api_key: Option<String>) -> Self {
        self.api_key_override = api_key.filter(|key| !key.is_empty());
        self
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

//! The conversational half of plan design: greet the user and produce the
//! advisor's next reply for a transcript.

use std::sync::Arc;

use tracing::debug;

use crate::errors::{Result, SaveFiError};
use crate::llm::{ChatMessage, ChatRole, CompletionClient, CompletionRequest};

const ADVISOR_TEMPERATURE: f32 = 0.7;
const ADVISOR_MAX_TOKENS: u32 = 1000;

pub struct Advisor {
    llm: Arc<dyn CompletionClient>,
    prompt: String,
    greeting: String,
}

impl Advisor {
    pub fn new(llm: Arc<dyn CompletionClient>, prompt: impl Into<String>, greeting: impl Into<String>) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
            greeting: greeting.into(),
        }
    }

    /// Opening message shown before the user has said anything.
    pub fn greeting(&self) -> ChatMessage {
        ChatMessage::assistant(self.greeting.clone())
    }

    /// The advisor's reply to a transcript ending in a user message.
    pub async fn reply(&self, transcript: &[ChatMessage]) -> Result<ChatMessage> {
        match transcript.last() {
            Some(last) if last.role == ChatRole::User && !last.content.trim().is_empty() => {}
            _ => {
                return Err(SaveFiError::Validation(
                    "transcript must end with a non-empty user message".to_string(),
                ))
            }
        }

        debug!(messages = transcript.len(), "reply: called");
        let content = self
            .llm
            .complete(CompletionRequest {
                system_prompt: self.prompt.clone(),
                messages: transcript.to_vec(),
                temperature: ADVISOR_TEMPERATURE,
                max_tokens: ADVISOR_MAX_TOKENS,
            })
            .await?;
        Ok(ChatMessage::assistant(content))
    }
}

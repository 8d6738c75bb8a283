//! services/api/src/adapters/summarizer_llm.rs
//!
//! This module contains the adapter for the summarizing LLM.
//! It implements the `Summarizer` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use proscientia_core::ports::{PortError, PortResult, SummarizeOptions, Summarizer, Summary};
use serde_json::json;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant for production engineers. \
Summarize the provided document in Polish as a short list of key points. \
Keep numbers, part identifiers and safety-relevant details. Do not invent facts.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `Summarizer` using an OpenAI-compatible chat model.
#[derive(Clone)]
pub struct OpenAiSummarizer {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiSummarizer {
    /// Creates a new `OpenAiSummarizer`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Renders the text and the optional scope into the user message.
fn user_message(text: &str, options: &SummarizeOptions) -> String {
    match &options.scope {
        Some(scope) if !scope.is_null() => format!("SCOPE: {}\n\nTEXT:\n{}", scope, text),
        _ => format!("TEXT:\n{}", text),
    }
}

//=========================================================================================
// `Summarizer` Trait Implementation
//=========================================================================================

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str, options: &SummarizeOptions) -> PortResult<Summary> {
        let system_prompt = options
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| PortError::GenerationFailure(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message(text, options))
                .build()
                .map_err(|e| PortError::GenerationFailure(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::GenerationFailure(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::GenerationFailure(e.to_string()))?;

        let usage = response.usage.as_ref().map(|u| {
            json!({
                "prompt_tokens": u.prompt_tokens,
                "completion_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })
        });

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::GenerationFailure(
                    "Summarization LLM response contained no text content.".to_string(),
                )
            })?;

        Ok(Summary {
            text: content,
            metadata: json!({
                "model": response.model,
                "usage": usage,
                "input_chars": text.chars().count(),
            }),
        })
    }
}

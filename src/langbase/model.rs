//! The language-model capability consumed by the analysis stages.

use async_trait::async_trait;

use super::client::LangbaseClient;
use super::types::{Message, PipeRequest};
use crate::error::LangbaseResult;

/// Turns a list of role-tagged messages into free text.
///
/// Stage processors only ever see this trait, so any backend (or a scripted
/// test double) can drive the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a single completion for the conversation.
    async fn generate(&self, messages: Vec<Message>) -> LangbaseResult<String>;
}

/// [`LanguageModel`] backed by a single Langbase pipe.
#[derive(Clone)]
pub struct LangbasePipe {
    client: LangbaseClient,
    pipe_name: String,
}

impl LangbasePipe {
    /// Route generations through `pipe_name` on the given client.
    pub fn new(client: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }

    /// Name of the pipe this model calls.
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }
}

#[async_trait]
impl LanguageModel for LangbasePipe {
    async fn generate(&self, messages: Vec<Message>) -> LangbaseResult<String> {
        let response = self
            .client
            .call_pipe(PipeRequest::new(&self.pipe_name, messages))
            .await?;
        Ok(response.completion)
    }
}

//! # API Module
//!
//! Talks to an OpenAI-compatible chat endpoint (a local Ollama `/v1` server or a
//! hosted API) and runs one retrieval-augmented chat turn at a time.
//!
//! Every request carries exactly two messages: the template's system prompt and
//! a single user message holding the assembled prompt (notes, role-labelled
//! history and the new input). Conversation state lives in [`RagChat`], not in
//! the request.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use cf_assistant::api::{LlmClient, RagChat};
//! use cf_assistant::{chunker::Chunker, config::RagConfig, embeddings::HashingEmbedder};
//! use cf_assistant::{notebook::Notebook, session::UserSession, template::PromptTemplate};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RagConfig::default();
//! let template = PromptTemplate::default();
//! let notebook = Arc::new(Notebook::new(
//!     UserSession::new("data", "alice")?,
//!     Chunker::from_config(&config.chunking)?,
//!     Arc::new(HashingEmbedder::new(384)),
//!     Duration::from_secs(30),
//! ));
//! let llm = LlmClient::new(&config, &template);
//! let mut chat = RagChat::new(notebook, &llm, &template, &config);
//! let answer = chat.answer("How do I lock down S3?", |delta| print!("{delta}")).await?;
//! println!("\n{} sources", answer.sources.len());
//! # Ok(()) }
//! ```

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
};
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::notebook::Notebook;
use crate::prompt::{PromptAssembler, check_budget};
use crate::retriever::RetrievedChunk;
use crate::session::{ChatHistory, ChatMessage};
use crate::template::PromptTemplate;

/// Chat-completions client bound to one model, temperature and system prompt.
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl LlmClient {
    /// Creates a client from configuration.
    ///
    /// # Parameters
    /// - `config`: API base, key, model and temperature.
    /// - `template`: supplies the system prompt.
    pub fn new(config: &RagConfig, template: &PromptTemplate) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        debug!("Client created for {} ({})", config.api_base, config.model);

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: template.system_prompt.clone(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    fn request(&self, prompt: &str, stream: bool) -> Result<CreateChatCompletionRequest> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.as_str())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.as_str())
            .messages(messages)
            .temperature(self.temperature);
        if stream {
            args.stream(true);
        }
        Ok(args.build()?)
    }

    /// Sends `prompt` and waits for the whole reply.
    ///
    /// # Errors
    /// - [`Error::Llm`] for transport or API failures.
    /// - [`Error::EmptyResponse`] when the reply carries no text.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let request = self.request(prompt, false)?;
        debug!("Sending request to {}", self.model);

        let response = self.client.chat().create(request).await?;
        let text: String = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect();

        if text.is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(text)
    }

    /// Sends `prompt` and hands each text delta to `on_delta` as it arrives.
    /// Returns the concatenated reply.
    ///
    /// # Errors
    /// Same as [`LlmClient::complete`]; a failed chunk aborts the stream.
    pub async fn stream<F>(&self, prompt: &str, mut on_delta: F) -> Result<String>
    where
        F: FnMut(&str),
    {
        let request = self.request(prompt, true)?;
        debug!("Streaming request to {}", self.model);

        let mut stream = self.client.chat().create_stream(request).await?;
        let mut text = String::new();

        while let Some(result) = stream.next().await {
            let response = result?;
            for choice in response.choices {
                if let Some(content) = choice.delta.content {
                    on_delta(&content);
                    text.push_str(&content);
                }
            }
        }

        if text.is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(text)
    }
}

/// A model reply together with the note chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
    pub prompt_tokens: usize,
}

/// One chat session over a user's notes.
pub struct RagChat<'a> {
    notebook: Arc<Notebook>,
    llm: &'a LlmClient,
    template: &'a PromptTemplate,
    history: ChatHistory,
    top_k: usize,
    context_max_tokens: usize,
    stream: bool,
}

impl<'a> RagChat<'a> {
    pub fn new(
        notebook: Arc<Notebook>,
        llm: &'a LlmClient,
        template: &'a PromptTemplate,
        config: &RagConfig,
    ) -> Self {
        Self {
            notebook,
            llm,
            template,
            history: ChatHistory::new(),
            top_k: config.retrieval.top_k,
            context_max_tokens: config.context_max_tokens,
            stream: config.streaming(),
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Start a new chat.
    pub fn reset(&mut self) {
        self.history.reset();
        info!("Chat history cleared");
    }

    /// Answer `input` from the notes and the conversation so far.
    ///
    /// The prompt is built from the history *before* this turn; the user and
    /// assistant messages are appended only once the model has replied, so a
    /// failed call leaves the history untouched. Text reaches `on_delta`
    /// incrementally when streaming, otherwise once in full.
    ///
    /// Retrieval embeds the question on the blocking thread pool.
    pub async fn answer<F>(&mut self, input: &str, mut on_delta: F) -> Result<RagAnswer>
    where
        F: FnMut(&str),
    {
        let notebook = Arc::clone(&self.notebook);
        let query = input.to_string();
        let top_k = self.top_k;
        let sources =
            tokio::task::spawn_blocking(move || notebook.retrieve(&query, top_k)).await??;
        let prompt = PromptAssembler::new(self.template).assemble(
            input,
            &sources,
            self.history.messages(),
        );
        let prompt_tokens = check_budget(&prompt, self.context_max_tokens)?;
        info!(
            "Asking with {} retrieved chunks and {} prior messages",
            sources.len(),
            self.history.len()
        );

        let text = if self.stream {
            self.llm.stream(&prompt, &mut on_delta).await?
        } else {
            let text = self.llm.complete(&prompt).await?;
            on_delta(&text);
            text
        };

        self.history.push(ChatMessage::user(input));
        self.history.push(ChatMessage::assistant(text.clone()));

        Ok(RagAnswer {
            text,
            sources,
            prompt_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::embeddings::HashingEmbedder;
    use crate::session::{Role, UserSession};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn mock_config(api_base: String, stream: bool) -> RagConfig {
        RagConfig {
            api_key: "mock_api_key".to_string(),
            api_base,
            model: "mock_model".to_string(),
            should_stream: Some(stream),
            ..RagConfig::default()
        }
    }

    fn completion_body(text: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "mock_model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }]
        })
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            let chunk = json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "created": 1_700_000_000,
                "model": "mock_model",
                "choices": [{
                    "index": 0,
                    "delta": { "content": delta },
                    "finish_reason": null
                }]
            });
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn notebook(root: &std::path::Path) -> Arc<Notebook> {
        Arc::new(Notebook::new(
            UserSession::new(root, "chat").unwrap(),
            Chunker::new(2000, 300).unwrap(),
            Arc::new(HashingEmbedder::new(384)),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn test_complete_returns_message_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body("Enable Block Public Access."));
            })
            .await;

        let config = mock_config(server.url("/v1"), false);
        let llm = LlmClient::new(&config, &PromptTemplate::default());
        let text = llm.complete("how?").await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "Enable Block Public Access.");
    }

    #[tokio::test]
    async fn test_stream_delivers_deltas_in_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(sse_body(&["Use ", "bucket ", "policies."]));
            })
            .await;

        let config = mock_config(server.url("/v1"), true);
        let llm = LlmClient::new(&config, &PromptTemplate::default());
        let mut seen = Vec::new();
        let text = llm
            .stream("how?", |delta| seen.push(delta.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Use ", "bucket ", "policies."]);
        assert_eq!(text, "Use bucket policies.");
    }

    #[tokio::test]
    async fn test_empty_reply_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body(""));
            })
            .await;

        let config = mock_config(server.url("/v1"), false);
        let llm = LlmClient::new(&config, &PromptTemplate::default());
        let err = llm.complete("how?").await.unwrap_err();
        assert!(matches!(err, Error::EmptyResponse));
    }

    #[tokio::test]
    async fn test_answer_grounds_on_notes_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let nb = notebook(dir.path());
        nb.save_notes("AWS S3 buckets must block public access by default.")
            .unwrap();

        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_includes("AWS S3 buckets must block public access by default.")
                    .body_includes("My Input:\\nhow do I secure an S3 bucket?");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body("Turn on Block Public Access."));
            })
            .await;

        let config = mock_config(server.url("/v1"), false);
        let template = PromptTemplate::default();
        let llm = LlmClient::new(&config, &template);
        let mut chat = RagChat::new(Arc::clone(&nb), &llm, &template, &config);

        let mut printed = String::new();
        let answer = chat
            .answer("how do I secure an S3 bucket?", |d| printed.push_str(d))
            .await
            .unwrap();

        first.assert_async().await;
        assert_eq!(answer.text, "Turn on Block Public Access.");
        assert_eq!(printed, answer.text);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(
            answer.sources[0].text,
            "AWS S3 buckets must block public access by default."
        );

        let history = chat.history().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Turn on Block Public Access.");
    }

    #[tokio::test]
    async fn test_follow_up_sees_prior_turns_and_reset_clears_them() {
        let dir = tempfile::tempdir().unwrap();
        let nb = notebook(dir.path());

        let server = MockServer::start_async().await;
        let follow_up = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_includes("User: first question\\nAssistant: first answer");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body("second answer"));
            })
            .await;
        let opening = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body("first answer"));
            })
            .await;

        let config = mock_config(server.url("/v1"), false);
        let template = PromptTemplate::default();
        let llm = LlmClient::new(&config, &template);
        let mut chat = RagChat::new(Arc::clone(&nb), &llm, &template, &config);

        chat.answer("first question", |_| {}).await.unwrap();
        let second = chat.answer("second question", |_| {}).await.unwrap();
        assert_eq!(second.text, "second answer");
        assert_eq!(chat.history().len(), 4);
        follow_up.assert_async().await;
        opening.assert_async().await;

        chat.reset();
        assert!(chat.history().is_empty());
    }

    #[tokio::test]
    async fn test_failed_call_leaves_history_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let nb = notebook(dir.path());

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(400)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "error": {
                            "message": "bad request",
                            "type": "invalid_request_error",
                            "param": null,
                            "code": null
                        }
                    }));
            })
            .await;

        let config = mock_config(server.url("/v1"), false);
        let template = PromptTemplate::default();
        let llm = LlmClient::new(&config, &template);
        let mut chat = RagChat::new(Arc::clone(&nb), &llm, &template, &config);

        assert!(chat.answer("anything", |_| {}).await.is_err());
        assert!(chat.history().is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_error_is_returned_before_calling_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let nb = notebook(dir.path());
        nb.save_notes("VPC flow logs capture accepted and rejected traffic.")
            .unwrap();
        std::fs::write(
            nb.session().index_dir.join(crate::vector_store::VECTORS_FILE),
            b"garbage",
        )
        .unwrap();
        nb.invalidate_cache();

        // Nothing listens here; an LLM error would not be CorruptedIndex.
        let config = mock_config("http://127.0.0.1:9/v1".to_string(), false);
        let template = PromptTemplate::default();
        let llm = LlmClient::new(&config, &template);
        let mut chat = RagChat::new(Arc::clone(&nb), &llm, &template, &config);

        let err = chat.answer("what do flow logs record?", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::CorruptedIndex { .. }));
        assert!(chat.history().is_empty());
    }
}

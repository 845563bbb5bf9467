//! Chat-completion backends.
//!
//! [`ChatBackend`] is the seam between the pipeline and a language model.
//! [`OpenAiChat`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint (LM Studio, vLLM, llama.cpp server, OpenAI itself):
//!
//! - `complete` posts once, retrying 429/5xx with backoff;
//! - `stream` sets `"stream": true` and decodes the server-sent events,
//!   yielding each non-empty `choices[0].delta.content` in order.
//!
//! `llm.timeout_secs` is the whole-request deadline for `complete`. A stream
//! has no overall deadline; it fails only when the server goes quiet for
//! that long between reads.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use crate::http::{endpoint, post_json_with_retry};
use crate::prompt::ChatMessage;

/// Sampling parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            max_tokens: 1024,
        }
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Streamed text fragments, in order. An `Err` item ends the stream.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> Result<Completion>;

    async fn stream(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> Result<TextStream>;
}

/// OpenAI-compatible chat client over `reqwest`.
pub struct OpenAiChat {
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
    client: reqwest::Client,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl OpenAiChat {
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: config.resolved_api_key(),
            max_retries: config.max_retries,
            timeout,
            client,
        })
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": stream,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Completion> {
        let json = post_json_with_retry(
            &self.client,
            &endpoint(&self.base_url, "chat/completions"),
            Some(&self.api_key),
            &self.request_body(messages, params, false),
            self.max_retries,
            "Chat",
            Some(self.timeout),
        )
        .await
        .map_err(|e| PipelineError::generation(format!("{:#}", e)))?;
        parse_completion(&json)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TextStream> {
        let url = endpoint(&self.base_url, "chat/completions");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages, params, true))
            .send()
            .await
            .map_err(|e| PipelineError::generation(format!("Chat connection error ({}): {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Generation(format!(
                "Chat API error {}: {}",
                status, body
            )));
        }

        let body = response.bytes_stream().boxed();
        let fragments = stream::unfold(
            Some((body, SseDecoder::default())),
            |state| async move {
                let (mut body, mut decoder) = state?;
                match body.next().await {
                    Some(Ok(bytes)) => Some((decoder.push(&bytes), Some((body, decoder)))),
                    Some(Err(e)) => Some((
                        vec![Err(PipelineError::generation(format!("stream interrupted: {}", e)))],
                        None,
                    )),
                    None => Some((decoder.finish(), None)),
                }
            },
        )
        .flat_map(stream::iter);

        Ok(fragments.boxed())
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            PipelineError::Generation("invalid chat response: missing choices[0].message.content".into())
        })?
        .to_string();
    let usage = json
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());
    Ok(Completion { text, usage })
}

/// Incremental decoder for `text/event-stream` chat deltas.
///
/// Bytes are buffered until a full line arrives, so events and multi-byte
/// characters split across network reads decode correctly. An `error`
/// event ends the stream with [`PipelineError::Generation`].
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.decode_line(&line, &mut out);
        }
        out
    }

    /// Decode whatever is left once the body has ended; the final event
    /// may arrive without a trailing newline.
    fn finish(&mut self) -> Vec<Result<String>> {
        let rest = std::mem::take(&mut self.buf);
        let mut out = Vec::new();
        self.decode_line(&rest, &mut out);
        out
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Result<String>>) {
        if self.done {
            return;
        }
        let line = String::from_utf8_lossy(line);
        let Some(data) = line.trim().strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        let event = match serde_json::from_str::<serde_json::Value>(data) {
            Ok(event) => event,
            Err(e) => {
                out.push(Err(PipelineError::Generation(format!(
                    "malformed stream event: {}",
                    e
                ))));
                return;
            }
        };
        if let Some(error) = event.get("error") {
            self.done = true;
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            out.push(Err(PipelineError::Generation(format!(
                "backend error mid-stream: {}",
                message
            ))));
            return;
        }
        if let Some(delta) = event
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
        {
            if !delta.is_empty() {
                out.push(Ok(delta.to_string()));
            }
        }
    }
}

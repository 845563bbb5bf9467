//! The generation orchestrator.
//!
//! Both modes run the same stages in order: resolve the task, retrieve
//! context, assemble messages, call the model. Retrieval failures degrade
//! to "no material" with a warning; model failures are returned to the
//! caller as [`PipelineError::Generation`].
//!
//! Streaming runs the stages on a spawned task and delivers
//! [`StreamEvent`]s over a bounded channel: zero or more `Delta`s followed
//! by exactly one `Done` or `Error`. Dropping the [`StreamHandle`] or
//! calling [`StreamHandle::cancel`] stops generation; nothing is written to
//! the store on this path.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::StreamExt;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::classify::{resolve_task, TaskHint, TaskType};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::harness::TestResult;
use crate::llm::{ChatBackend, GenerationParams};
use crate::models::{ChunkMeta, SourceKind};
use crate::prompt::{build_messages, ChatMessage};
use crate::retriever::Retriever;
use crate::store::DocumentStore;

pub use crate::retriever::Citation;

const DEFAULT_K: usize = 3;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f32 = 0.4;
const DEFAULT_HISTORY_TURNS: usize = 10;

const SUMMARY_K: usize = 5;
const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_QUERY_CHARS: usize = 500;

/// Query used for the review-notes summary of all registered material.
pub const REVIEW_QUERY: &str = "학습 자료의 핵심 내용을 bullet point로 간결하게 요약해줘.";

const STREAM_BUFFER: usize = 64;

/// One request to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInput {
    pub query: String,
    pub task: TaskHint,
    /// Number of chunks to retrieve.
    pub k: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Prior turns, oldest first. Only the most recent few are sent.
    pub history: Vec<ChatMessage>,
}

impl PipelineInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            task: TaskHint::Auto,
            k: DEFAULT_K,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            history: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: impl Into<TaskHint>) -> Self {
        self.task = task.into();
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Loggable view without the history contents.
    pub fn to_summary(&self) -> InputSummary {
        InputSummary {
            query: self.query.clone(),
            task_type: self.task.to_string(),
            context_k: self.k,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            history_length: self.history.len(),
        }
    }

    fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSummary {
    pub query: String,
    pub task_type: String,
    pub context_k: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub history_length: usize,
}

/// Per-request timings and counts. Times are milliseconds rounded to 0.01.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub total_time_ms: f64,
    pub retrieval_time_ms: f64,
    pub llm_time_ms: f64,
    pub context_chunks: usize,
    pub detected_task_type: TaskType,
    pub input_tokens: usize,
    pub output_tokens: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub response: String,
    pub sources: Vec<Citation>,
    pub task: TaskType,
    pub metrics: PipelineMetrics,
    /// The material block given to the model; empty when none was found.
    pub raw_context: String,
}

impl PipelineOutput {
    pub fn has_context(&self) -> bool {
        !self.raw_context.is_empty()
    }
}

impl Serialize for PipelineOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("PipelineOutput", 5)?;
        s.serialize_field("response", &self.response)?;
        s.serialize_field("sources", &self.sources)?;
        s.serialize_field("task_type", &self.task)?;
        s.serialize_field("metrics", &self.metrics)?;
        s.serialize_field("has_context", &self.has_context())?;
        s.end()
    }
}

/// Events delivered by [`Pipeline::process_stream`].
#[derive(Debug)]
pub enum StreamEvent {
    /// The next text fragment.
    Delta(String),
    /// Generation finished; carries the accumulated output.
    Done(Box<PipelineOutput>),
    /// Generation failed; no further events follow.
    Error(PipelineError),
}

/// Consumer side of a streaming request.
pub struct StreamHandle {
    events: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Next event, or `None` once the producer has finished.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Stop generation. Fragments still buffered are discarded, so
    /// [`recv`](Self::recv) returns `None` from here on.
    pub fn cancel(&mut self) {
        self.task.abort();
        self.events.close();
        while self.events.try_recv().is_ok() {}
    }
}

/// Retrieval and sampling settings applied to every request the pipeline
/// builds itself (harness, summaries, quizzes) and to CLI questions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputDefaults {
    pub k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for InputDefaults {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl InputDefaults {
    /// `retrieval.k`, `generation.temperature` and `generation.max_tokens`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        }
    }
}

/// Everything computed before the model call.
struct Prepared {
    task: TaskType,
    context: String,
    sources: Vec<Citation>,
    messages: Vec<ChatMessage>,
    retrieval_ms: f64,
    started: Instant,
}

/// Retrieval + prompt assembly + generation over shared services.
pub struct Pipeline {
    retriever: Retriever,
    backend: Arc<dyn ChatBackend>,
    history_turns: usize,
    defaults: InputDefaults,
    pub(crate) test_results: Mutex<Vec<TestResult>>,
}

impl Pipeline {
    pub fn new(retriever: Retriever, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            retriever,
            backend,
            history_turns: DEFAULT_HISTORY_TURNS,
            defaults: InputDefaults::default(),
            test_results: Mutex::new(Vec::new()),
        }
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn with_defaults(mut self, defaults: InputDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// A request for `query` carrying this pipeline's configured k,
    /// temperature and token limit.
    pub fn input(&self, query: impl Into<String>) -> PipelineInput {
        PipelineInput::new(query)
            .with_k(self.defaults.k)
            .with_temperature(self.defaults.temperature)
            .with_max_tokens(self.defaults.max_tokens)
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        self.retriever.store()
    }

    async fn prepare(&self, input: &PipelineInput) -> Prepared {
        let started = Instant::now();
        let task = resolve_task(input.task, &input.query);

        let (context, sources) = match self
            .retriever
            .retrieve_with_sources(&input.query, input.k)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("retrieval failed, answering without material: {:#}", e);
                (String::new(), Vec::new())
            }
        };
        let retrieval_ms = elapsed_ms(started);

        let messages = build_messages(
            &input.query,
            &context,
            task,
            &input.history,
            self.history_turns,
        );

        tracing::debug!(task = %task, chunks = sources.len(), "prepared request");
        Prepared {
            task,
            context,
            sources,
            messages,
            retrieval_ms,
            started,
        }
    }

    fn finish(
        prepared: Prepared,
        input: &PipelineInput,
        response: String,
        output_tokens: Option<usize>,
        llm_ms: f64,
        streaming: bool,
    ) -> PipelineOutput {
        let metrics = PipelineMetrics {
            total_time_ms: elapsed_ms(prepared.started),
            retrieval_time_ms: prepared.retrieval_ms,
            llm_time_ms: llm_ms,
            context_chunks: prepared.sources.len(),
            detected_task_type: prepared.task,
            input_tokens: word_count(&input.query),
            output_tokens: output_tokens.unwrap_or_else(|| word_count(&response)),
            streaming,
        };
        tracing::info!(
            task = %prepared.task,
            chunks = metrics.context_chunks,
            total_ms = metrics.total_time_ms,
            llm_ms = metrics.llm_time_ms,
            streaming,
            "generation finished"
        );
        PipelineOutput {
            response,
            sources: prepared.sources,
            task: prepared.task,
            metrics,
            raw_context: prepared.context,
        }
    }

    /// Run the pipeline and wait for the full response.
    pub async fn process(&self, input: &PipelineInput) -> Result<PipelineOutput> {
        let prepared = self.prepare(input).await;

        let llm_start = Instant::now();
        let completion = self
            .backend
            .complete(&prepared.messages, &input.params())
            .await?;
        let llm_ms = elapsed_ms(llm_start);

        let output_tokens = completion.usage.map(|u| u.completion_tokens as usize);
        Ok(Self::finish(
            prepared,
            input,
            completion.text,
            output_tokens,
            llm_ms,
            false,
        ))
    }

    /// Run the pipeline on a background task, delivering fragments as they
    /// arrive.
    pub fn process_stream(self: &Arc<Self>, input: PipelineInput) -> StreamHandle {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let pipeline = Arc::clone(self);

        let task = tokio::spawn(async move {
            let terminal = match pipeline.run_stream(&input, &tx).await {
                Ok(Some(output)) => StreamEvent::Done(Box::new(output)),
                Ok(None) => return,
                Err(e) => StreamEvent::Error(e),
            };
            let _ = tx.send(terminal).await;
        });

        StreamHandle { events: rx, task }
    }

    /// Returns `Ok(None)` when the consumer went away mid-stream.
    async fn run_stream(
        &self,
        input: &PipelineInput,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Option<PipelineOutput>> {
        let prepared = self.prepare(input).await;

        let llm_start = Instant::now();
        let mut fragments = self
            .backend
            .stream(&prepared.messages, &input.params())
            .await?;

        let mut response = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            response.push_str(&fragment);
            if tx.send(StreamEvent::Delta(fragment)).await.is_err() {
                tracing::debug!("stream consumer dropped, stopping generation");
                return Ok(None);
            }
        }
        let llm_ms = elapsed_ms(llm_start);

        Ok(Some(Self::finish(
            prepared, input, response, None, llm_ms, true,
        )))
    }

    /// Stream into `sink`, returning the accumulated output.
    pub async fn process_stream_with<F>(
        self: &Arc<Self>,
        input: PipelineInput,
        mut sink: F,
    ) -> Result<PipelineOutput>
    where
        F: FnMut(&str),
    {
        let mut handle = self.process_stream(input);
        while let Some(event) = handle.recv().await {
            match event {
                StreamEvent::Delta(text) => sink(&text),
                StreamEvent::Done(output) => return Ok(*output),
                StreamEvent::Error(e) => return Err(e),
            }
        }
        Err(PipelineError::Cancelled)
    }

    /// Ingest `text` as temporary material under `source`, then summarize it.
    /// Summaries always read five chunks at a lower temperature; the token
    /// limit follows configuration.
    pub async fn summarize_document(&self, text: &str, source: &str) -> Result<PipelineOutput> {
        self.store()
            .add_document(text, &ChunkMeta::new(source, SourceKind::Temp))
            .await?;

        let head: String = text.chars().take(SUMMARY_QUERY_CHARS).collect();
        let input = self
            .input(format!("다음 내용을 요약해주세요: {}...", head))
            .with_task(TaskType::Summarize)
            .with_k(SUMMARY_K)
            .with_temperature(SUMMARY_TEMPERATURE);
        self.process(&input).await
    }

    /// Bullet-point summary of all registered material, for review notes.
    pub async fn review_summary(&self) -> Result<PipelineOutput> {
        let input = self
            .input(REVIEW_QUERY)
            .with_task(TaskType::Summarize)
            .with_k(SUMMARY_K)
            .with_temperature(SUMMARY_TEMPERATURE);
        self.process(&input).await
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    round2(since.elapsed().as_secs_f64() * 1000.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_defaults() {
        let input = PipelineInput::new("질문");
        assert_eq!(input.task, TaskHint::Auto);
        assert_eq!(input.k, 3);
        assert_eq!(input.max_tokens, 1024);
        assert!((input.temperature - 0.4).abs() < f32::EPSILON);
        assert!(input.history.is_empty());
    }

    #[test]
    fn summary_reports_history_length_only() {
        let input = PipelineInput::new("q")
            .with_task(TaskType::Compare)
            .with_k(5)
            .with_history(vec![ChatMessage::user("a"), ChatMessage::assistant("b")]);
        let summary = input.to_summary();
        assert_eq!(summary.task_type, "compare");
        assert_eq!(summary.context_k, 5);
        assert_eq!(summary.history_length, 2);
    }

    #[test]
    fn output_serializes_has_context() {
        let output = PipelineOutput {
            response: "답".into(),
            sources: Vec::new(),
            task: TaskType::Qa,
            metrics: PipelineMetrics {
                total_time_ms: 1.0,
                retrieval_time_ms: 0.5,
                llm_time_ms: 0.5,
                context_chunks: 0,
                detected_task_type: TaskType::Qa,
                input_tokens: 1,
                output_tokens: 1,
                streaming: false,
            },
            raw_context: String::new(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["has_context"], false);
        assert_eq!(json["task_type"], "qa");
        assert!(json["metrics"].get("streaming").is_none());
        assert!(json.get("raw_context").is_none());
    }

    #[test]
    fn defaults_follow_config() {
        let config = crate::config::parse_config(
            "[retrieval]\nk = 7\n\n[generation]\ntemperature = 0.9\nmax_tokens = 256\n",
        )
        .unwrap();
        let defaults = InputDefaults::from_config(&config);
        assert_eq!(defaults.k, 7);
        assert_eq!(defaults.max_tokens, 256);
        assert!((defaults.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(InputDefaults::from_config(&Config::default()), InputDefaults::default());
    }

    #[test]
    fn rounding_and_word_counts() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(word_count("  RAG 가   뭐야? "), 3);
        assert_eq!(word_count(""), 0);
    }
}

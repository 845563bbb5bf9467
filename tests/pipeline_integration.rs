//! End-to-end tests for ingestion, retrieval, generation, the harness and
//! quizzes.
//!
//! The embedder and chat backend are in-test fakes so every run is
//! deterministic and offline; everything between them is the real crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tempfile::TempDir;

use orange_rag::app::Services;
use orange_rag::classify::{TaskHint, TaskType};
use orange_rag::config::Config;
use orange_rag::embedding::Embedder;
use orange_rag::error::PipelineError;
use orange_rag::harness::default_test_cases;
use orange_rag::index::{IndexEntry, InMemoryIndex, SqliteIndex, VectorIndex};
use orange_rag::llm::{ChatBackend, Completion, GenerationParams, TextStream};
use orange_rag::models::{ChunkMeta, ScoredChunk, SourceKind};
use orange_rag::pipeline::{PipelineInput, StreamEvent};
use orange_rag::prompt::{ChatMessage, Role, NO_MATERIAL_PLACEHOLDER};
use orange_rag::quiz::{self, Difficulty};

// ─── Test Embedder ──────────────────────────────────────────────────

/// Counts occurrences of a fixed vocabulary, plus a constant bias term so
/// no text embeds to the zero vector.
struct KeywordEmbedder;

const VOCAB: [&str; 8] = ["python", "rust", "고양이", "rag", "langchain", "검색", "javascript", "언어"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lowered = t.to_lowercase();
                let mut v: Vec<f32> = VOCAB
                    .iter()
                    .map(|w| lowered.matches(w).count() as f32)
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

// ─── Test Chat Backends ─────────────────────────────────────────────

/// Deterministic backend: answers with a markdown echo of the query and
/// whether material was supplied. Queries containing `fail_on` fail.
struct EchoChat {
    fail_on: Option<&'static str>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl EchoChat {
    fn new() -> Self {
        Self {
            fail_on: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(needle: &'static str) -> Self {
        Self {
            fail_on: Some(needle),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn reply(&self, messages: &[ChatMessage]) -> std::result::Result<String, PipelineError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let query = &messages.last().unwrap().content;
        if let Some(needle) = self.fail_on {
            if query.contains(needle) {
                return Err(PipelineError::Generation("backend down".into()));
            }
        }
        let grounded = !messages[0].content.contains(NO_MATERIAL_PLACEHOLDER);
        Ok(format!(
            "## 답변\n- 질문: {}\n- 자료 사용: {}\n- 요약 정리 핵심 활용 방법 예시",
            query, grounded
        ))
    }

    fn last_messages(&self) -> Vec<ChatMessage> {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChatBackend for EchoChat {
    fn model(&self) -> &str {
        "echo"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> orange_rag::error::Result<Completion> {
        Ok(Completion {
            text: self.reply(messages)?,
            usage: None,
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> orange_rag::error::Result<TextStream> {
        let text = self.reply(messages)?;
        let chars: Vec<char> = text.chars().collect();
        let fragments: Vec<orange_rag::error::Result<String>> = chars
            .chunks(3)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }
}

/// Returns canned replies in order.
struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedChat {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> orange_rag::error::Result<Completion> {
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::Generation("script exhausted".into()))?;
        Ok(Completion { text, usage: None })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> orange_rag::error::Result<TextStream> {
        let completion = self.complete(messages, params).await?;
        Ok(stream::iter(vec![Ok(completion.text)]).boxed())
    }
}

/// Streams numbered fragments with a pause between each, counting how many
/// it has produced.
struct SlowChat {
    produced: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatBackend for SlowChat {
    fn model(&self) -> &str {
        "slow"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> orange_rag::error::Result<Completion> {
        Err(PipelineError::Generation("streaming only".into()))
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> orange_rag::error::Result<TextStream> {
        let produced = Arc::clone(&self.produced);
        let fragments = stream::unfold(0usize, move |i| {
            let produced = Arc::clone(&produced);
            async move {
                if i >= 200 {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                produced.fetch_add(1, Ordering::SeqCst);
                Some((Ok(format!("t{} ", i)), i + 1))
            }
        });
        Ok(fragments.boxed())
    }
}

// ─── Test Index ─────────────────────────────────────────────────────

/// An index whose reads always fail.
struct UnreachableIndex;

#[async_trait]
impl VectorIndex for UnreachableIndex {
    async fn upsert_batch(&self, _entries: &[IndexEntry]) -> Result<()> {
        anyhow::bail!("index unreachable")
    }
    async fn nearest(&self, _query_vec: &[f32], _k: usize) -> Result<Vec<ScoredChunk>> {
        anyhow::bail!("index unreachable")
    }
    async fn delete_by_source(&self, _source: &str) -> Result<usize> {
        anyhow::bail!("index unreachable")
    }
    async fn clear(&self) -> Result<()> {
        anyhow::bail!("index unreachable")
    }
    async fn count(&self) -> Result<usize> {
        anyhow::bail!("index unreachable")
    }
    async fn list_sources(&self) -> Result<Vec<String>> {
        anyhow::bail!("index unreachable")
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn services_with(backend: Arc<dyn ChatBackend>, index: Arc<dyn VectorIndex>) -> Services {
    Services::new(Config::default(), Arc::new(KeywordEmbedder), index, backend)
}

fn services(backend: Arc<dyn ChatBackend>) -> Services {
    services_with(backend, Arc::new(InMemoryIndex::new()))
}

async fn seed(services: &Services) {
    let docs = [
        ("Python은 간결한 언어다.", "doc1"),
        ("Rust는 소유권으로 메모리를 관리한다. rust rust", "doc2"),
        ("고양이는 낮잠을 좋아한다.", "doc3"),
    ];
    for (text, source) in docs {
        services
            .store
            .add_document(text, &ChunkMeta::new(source, SourceKind::Txt))
            .await
            .unwrap();
    }
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn ingested_source_is_retrieved_and_cited() {
    let services = services(Arc::new(EchoChat::new()));
    seed(&services).await;

    let retriever = services.pipeline.retriever();
    let hits = retriever.search("Python이 뭐야?", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "doc1");

    let context = retriever.retrieve_context("Python이 뭐야?", 1).await.unwrap();
    assert!(context.starts_with("[1] (출처: doc1)\n"));
    assert!(context.contains("doc1"));
}

#[tokio::test]
async fn repeated_search_is_stable() {
    let services = services(Arc::new(EchoChat::new()));
    seed(&services).await;

    let retriever = services.pipeline.retriever();
    let first = retriever.search_with_score("언어", 3).await.unwrap();
    let second = retriever.search_with_score("언어", 3).await.unwrap();
    let ids = |hits: &[ScoredChunk]| hits.iter().map(|h| h.chunk.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first[..]), ids(&second[..]));
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn empty_store_yields_empty_context_and_placeholder() {
    let chat = Arc::new(EchoChat::new());
    let services = services(chat.clone());

    let context = services
        .pipeline
        .retriever()
        .retrieve_context("아무 질문", 3)
        .await
        .unwrap();
    assert_eq!(context, "");

    let output = services
        .pipeline
        .process(&PipelineInput::new("아무 질문"))
        .await
        .unwrap();
    assert!(!output.has_context());
    assert!(output.sources.is_empty());

    let messages = chat.last_messages();
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.contains(NO_MATERIAL_PLACEHOLDER));
}

#[tokio::test]
async fn retrieval_failure_degrades_to_no_material() {
    let chat = Arc::new(EchoChat::new());
    let services = services_with(chat.clone(), Arc::new(UnreachableIndex));

    let output = services
        .pipeline
        .process(&PipelineInput::new("Python이 뭐야?"))
        .await
        .unwrap();
    assert!(!output.has_context());
    assert!(output.response.contains("자료 사용: false"));
    assert!(chat.last_messages()[0].content.contains(NO_MATERIAL_PLACEHOLDER));
}

// ─── Orchestration ──────────────────────────────────────────────────

#[tokio::test]
async fn qa_hint_is_overridden_by_summarize_keyword() {
    let services = services(Arc::new(EchoChat::new()));
    seed(&services).await;

    let input = PipelineInput::new("이 내용을 요약해줘").with_task(TaskType::Qa);
    let output = services.pipeline.process(&input).await.unwrap();
    assert_eq!(output.task, TaskType::Summarize);
    assert_eq!(output.metrics.detected_task_type, TaskType::Summarize);
    assert!(!output.metrics.streaming);
}

#[tokio::test]
async fn explicit_task_and_context_reach_the_backend() {
    let chat = Arc::new(EchoChat::new());
    let services = services(chat.clone());
    seed(&services).await;

    let input = PipelineInput::new("Python이 뭐야?")
        .with_task(TaskHint::Task(TaskType::Compare))
        .with_k(2);
    let output = services.pipeline.process(&input).await.unwrap();

    assert_eq!(output.task, TaskType::Compare);
    assert_eq!(output.sources.len(), 2);
    assert_eq!(output.sources[0].source, "doc1");
    assert_eq!(output.sources[0].index, 1);
    assert!(output.raw_context.starts_with("[문서 1] (출처: doc1)"));
    assert_eq!(output.metrics.context_chunks, 2);
    assert_eq!(output.metrics.input_tokens, 2);

    let system = &chat.last_messages()[0].content;
    assert!(system.contains("비교표"));
    assert!(system.contains("Python은 간결한 언어다."));
}

#[tokio::test]
async fn history_is_capped_before_the_query() {
    let chat = Arc::new(EchoChat::new());
    let services = services(chat.clone());

    let history: Vec<ChatMessage> = (0..12)
        .map(|i| {
            if i % 2 == 0 {
                ChatMessage::user(format!("q{}", i))
            } else {
                ChatMessage::assistant(format!("a{}", i))
            }
        })
        .collect();
    let input = PipelineInput::new("지금 질문").with_history(history);
    services.pipeline.process(&input).await.unwrap();

    let messages = chat.last_messages();
    assert_eq!(messages.len(), 12);
    assert_eq!(messages[1], ChatMessage::user("q2"));
    assert_eq!(messages[11], ChatMessage::user("지금 질문"));
}

#[tokio::test]
async fn generation_failure_is_surfaced() {
    let services = services(Arc::new(EchoChat::failing_on("질문")));
    let err = services
        .pipeline
        .process(&PipelineInput::new("질문 있어요"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Generation(_)));
}

// ─── Streaming ──────────────────────────────────────────────────────

#[tokio::test]
async fn streaming_accumulates_to_blocking_response() {
    let services = services(Arc::new(EchoChat::new()));
    seed(&services).await;

    let input = PipelineInput::new("Rust와 Python 비교").with_temperature(0.0);
    let blocking = services.pipeline.process(&input).await.unwrap();

    let mut fragments = Vec::new();
    let streamed = services
        .pipeline
        .process_stream_with(input, |f| fragments.push(f.to_string()))
        .await
        .unwrap();

    assert!(fragments.len() > 1);
    assert_eq!(fragments.concat(), blocking.response);
    assert_eq!(streamed.response, blocking.response);
    assert_eq!(streamed.task, blocking.task);
    assert_eq!(streamed.sources, blocking.sources);
    assert!(streamed.metrics.streaming);
}

#[tokio::test]
async fn stream_ends_with_exactly_one_terminal_event() {
    let services = services(Arc::new(EchoChat::new()));
    let mut handle = services.pipeline.process_stream(PipelineInput::new("안녕"));

    let mut deltas = 0;
    let mut terminals = 0;
    while let Some(event) = handle.recv().await {
        match event {
            StreamEvent::Delta(_) => {
                assert_eq!(terminals, 0, "delta after terminal event");
                deltas += 1;
            }
            StreamEvent::Done(_) | StreamEvent::Error(_) => terminals += 1,
        }
    }
    assert!(deltas > 0);
    assert_eq!(terminals, 1);
}

#[tokio::test]
async fn stream_failure_is_a_terminal_error() {
    let services = services(Arc::new(EchoChat::failing_on("안녕")));
    let err = services
        .pipeline
        .process_stream_with(PipelineInput::new("안녕"), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Generation(_)));
}

#[tokio::test]
async fn cancel_stops_generation_and_delivery() {
    let produced = Arc::new(AtomicUsize::new(0));
    let services = services(Arc::new(SlowChat {
        produced: Arc::clone(&produced),
    }));
    seed(&services).await;
    let before = services.store.stats().await.unwrap().count;

    let mut handle = services.pipeline.process_stream(PipelineInput::new("Python이 뭐야?"));
    match handle.recv().await {
        Some(StreamEvent::Delta(first)) => assert_eq!(first, "t0 "),
        other => panic!("expected a first fragment, got {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    let at_cancel = produced.load(Ordering::SeqCst);
    assert!(at_cancel < 200);

    assert!(handle.recv().await.is_none(), "event delivered after cancel");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        produced.load(Ordering::SeqCst) <= at_cancel + 1,
        "backend kept generating after cancel"
    );
    assert_eq!(services.store.stats().await.unwrap().count, before);
}

#[tokio::test]
async fn config_defaults_reach_pipeline_built_requests() {
    let mut config = Config::default();
    config.retrieval.k = 1;
    let services = Services::new(
        config,
        Arc::new(KeywordEmbedder),
        Arc::new(InMemoryIndex::new()),
        Arc::new(EchoChat::new()),
    );
    seed(&services).await;

    let results = services.pipeline.run_test(&default_test_cases()).await;
    assert!(results.iter().all(|r| r.success));
    for result in &results {
        assert_eq!(result.response_quality.as_ref().unwrap().sources_count, 1);
    }
    assert_eq!(services.pipeline.input("q").k, 1);
}

// ─── Summaries ──────────────────────────────────────────────────────

#[tokio::test]
async fn summarize_document_ingests_temp_material() {
    let chat = Arc::new(EchoChat::new());
    let services = services(chat.clone());

    let text = "LangChain은 LLM 애플리케이션 프레임워크다. ".repeat(40);
    let output = services
        .pipeline
        .summarize_document(&text, "lecture.txt")
        .await
        .unwrap();

    assert_eq!(output.task, TaskType::Summarize);
    assert!(output.has_context());
    assert!(output.sources.len() <= 5);
    assert!(output.sources.iter().all(|c| c.kind == "temp"));
    assert_eq!(services.store.sources().await.unwrap(), vec!["lecture.txt"]);

    let messages = chat.last_messages();
    let query = &messages.last().unwrap().content;
    assert!(query.starts_with("다음 내용을 요약해주세요: LangChain"));
    assert!(query.ends_with("..."));
}

#[tokio::test]
async fn review_summary_uses_all_material() {
    let services = services(Arc::new(EchoChat::new()));
    seed(&services).await;

    let output = services.pipeline.review_summary().await.unwrap();
    assert_eq!(output.task, TaskType::Summarize);
    assert_eq!(output.sources.len(), 3);
}

// ─── Harness ────────────────────────────────────────────────────────

#[tokio::test]
async fn harness_records_failures_and_continues() {
    let services = services(Arc::new(EchoChat::failing_on("차이점")));
    seed(&services).await;

    let results = services.pipeline.run_test(&default_test_cases()).await;
    assert_eq!(results.len(), 5);

    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].task_type, TaskType::Compare);
    assert!(failed[0].error.as_deref().unwrap().contains("backend down"));
    assert_eq!(failed[0].context_relevance, 0.0);
    assert!(failed[0].response_quality.is_none());

    let passed = results.iter().find(|r| r.task_type == TaskType::Summarize).unwrap();
    let quality = passed.response_quality.as_ref().unwrap();
    assert!(quality.has_structure);
    assert_eq!(quality.sources_count, 3);
    assert_eq!(passed.context_relevance, 1.0);

    let summary = services.pipeline.test_summary().unwrap();
    assert_eq!(summary.total_tests, 5);
    assert_eq!(summary.successful, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.success_rate, 80.0);
    assert_eq!(summary.avg_context_relevance, 0.8);
    assert_eq!(summary.by_task_type[&TaskType::Compare].success, 0);

    services.pipeline.clear_test_results();
    assert!(services.pipeline.test_summary().is_none());
}

// ─── Quiz ───────────────────────────────────────────────────────────

#[tokio::test]
async fn quiz_prose_is_a_format_error_not_a_network_error() {
    let services = services(Arc::new(ScriptedChat::new(&["죄송하지만 퀴즈를 만들 수 없어요."])));
    seed(&services).await;

    let err = quiz::generate_quiz(&services.pipeline, 3, Difficulty::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::QuizFormat(_)));

    let err = quiz::generate_quiz(&services.pipeline, 3, Difficulty::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Generation(_)));
}

#[tokio::test]
async fn quiz_round_trip_with_grading() {
    let reply = r#"```json
[
  {"question": "Python은?", "options": ["언어", "고양이", "OS", "DB"], "answer": 0, "explanation": "doc1 참고"},
  {"question": "Rust의 특징은?", "options": ["GC", "소유권", "인터프리터", "없음"], "answer": 1, "explanation": "doc2 참고"}
]
```"#;
    let services = services(Arc::new(ScriptedChat::new(&[reply])));
    seed(&services).await;

    let questions = quiz::generate_quiz(&services.pipeline, 2, Difficulty::Easy)
        .await
        .unwrap();
    assert_eq!(questions.len(), 2);

    let report = quiz::grade(&questions, &[Some(0), Some(0)]);
    assert_eq!(report.score, 1);
    assert_eq!(report.accuracy, 50);
    assert_eq!(report.wrong_notes[0].correct_answer, "소유권");
    assert_eq!(report.wrong_notes[0].your_answer, "GC");
}

// ─── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn sqlite_backed_store_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("orange.sqlite");

    {
        let index = Arc::new(SqliteIndex::open(&path, "documents").await.unwrap());
        let services = services_with(Arc::new(EchoChat::new()), index);
        seed(&services).await;
    }

    let index = Arc::new(SqliteIndex::open(&path, "documents").await.unwrap());
    let services = services_with(Arc::new(EchoChat::new()), index);
    assert_eq!(
        services.store.sources().await.unwrap(),
        vec!["doc1", "doc2", "doc3"]
    );

    let hits = services.pipeline.retriever().search("rust", 1).await.unwrap();
    assert_eq!(hits[0].source, "doc2");

    assert_eq!(services.store.delete_source("doc2").await.unwrap(), 1);
    assert_eq!(services.store.stats().await.unwrap().count, 2);
}

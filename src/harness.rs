//! Canned-query quality harness.
//!
//! Each case runs through [`Pipeline::process`]. A failed case is recorded
//! with its error text and zero scores; the run moves on to the next case.
//! Results accumulate on the pipeline until [`Pipeline::clear_test_results`].

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::classify::TaskType;
use crate::pipeline::{round2, Pipeline};

/// Markdown markers that count as a structured answer.
const STRUCTURE_MARKERS: [&str; 4] = ["##", "**", "- ", "1."];

/// Chunks at which retrieval counts as fully relevant.
const RELEVANCE_SATURATION: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub query: String,
    /// Task hint passed to the pipeline; `Qa` still auto-detects.
    pub task: TaskType,
    pub expected_keywords: Vec<String>,
}

impl TestCase {
    pub fn new(query: &str, task: TaskType, expected_keywords: &[&str]) -> Self {
        Self {
            query: query.to_string(),
            task,
            expected_keywords: expected_keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub keyword_coverage: f64,
    pub response_length: usize,
    pub has_structure: bool,
    pub sources_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub query: String,
    pub task_type: TaskType,
    pub response_time_ms: f64,
    pub token_count: usize,
    pub context_relevance: f64,
    /// `None` for failed cases.
    pub response_quality: Option<QualityReport>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskGroupStats {
    pub count: usize,
    pub success: usize,
    /// Mean latency of the successful runs in this group.
    pub avg_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSummary {
    pub total_tests: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, one decimal.
    pub success_rate: f64,
    /// Mean over successful runs.
    pub avg_response_time_ms: f64,
    /// Mean over all runs; failures count as zero.
    pub avg_context_relevance: f64,
    pub by_task_type: BTreeMap<TaskType, TaskGroupStats>,
}

/// One canned query per task type.
pub fn default_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::new(
            "RAG가 뭐야?",
            TaskType::Concept,
            &["retrieval", "검색", "생성", "augmented"],
        ),
        TestCase::new("이 내용을 요약해줘", TaskType::Summarize, &["핵심", "요약", "정리"]),
        TestCase::new(
            "Python과 JavaScript의 차이점은?",
            TaskType::Compare,
            &["python", "javascript", "차이", "비교"],
        ),
        TestCase::new(
            "이걸 어떻게 활용할 수 있어?",
            TaskType::Apply,
            &["활용", "방법", "예시"],
        ),
        TestCase::new("LangChain의 주요 기능은 뭐야?", TaskType::Qa, &["langchain", "기능"]),
    ]
}

/// Fraction of `keywords` found in `response`, case-insensitively.
/// An empty keyword list scores 1.0.
pub fn keyword_coverage(response: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 1.0;
    }
    let lowered = response.to_lowercase();
    let hits = keywords
        .iter()
        .filter(|kw| lowered.contains(&kw.to_lowercase()))
        .count();
    hits as f64 / keywords.len() as f64
}

/// `min(1, chunks / 3)`: a coarse stand-in for retrieval quality.
pub fn context_relevance(chunks: usize) -> f64 {
    (chunks as f64 / RELEVANCE_SATURATION).min(1.0)
}

pub fn has_structure(response: &str) -> bool {
    STRUCTURE_MARKERS.iter().any(|m| response.contains(m))
}

impl Pipeline {
    /// Run every case in order, recording and returning one result each.
    pub async fn run_test(&self, cases: &[TestCase]) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(cases.len());

        for (i, case) in cases.iter().enumerate() {
            let started = Instant::now();
            let input = self.input(case.query.clone()).with_task(case.task);

            let result = match self.process(&input).await {
                Ok(output) => {
                    let response_time_ms = round2(started.elapsed().as_secs_f64() * 1000.0);
                    let coverage = keyword_coverage(&output.response, &case.expected_keywords);
                    tracing::info!(
                        case = i + 1,
                        total = cases.len(),
                        response_time_ms,
                        keyword_coverage = coverage,
                        "test case passed"
                    );
                    TestResult {
                        query: case.query.clone(),
                        task_type: case.task,
                        response_time_ms,
                        token_count: output.metrics.output_tokens,
                        context_relevance: context_relevance(output.sources.len()),
                        response_quality: Some(QualityReport {
                            keyword_coverage: round2(coverage),
                            response_length: output.response.chars().count(),
                            has_structure: has_structure(&output.response),
                            sources_count: output.sources.len(),
                        }),
                        success: true,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(case = i + 1, total = cases.len(), "test case failed: {}", e);
                    TestResult {
                        query: case.query.clone(),
                        task_type: case.task,
                        response_time_ms: 0.0,
                        token_count: 0,
                        context_relevance: 0.0,
                        response_quality: None,
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };

            self.test_results.lock().unwrap().push(result.clone());
            results.push(result);
        }

        results
    }

    /// Aggregate every recorded result, or `None` when nothing has run.
    pub fn test_summary(&self) -> Option<TestSummary> {
        let results = self.test_results.lock().unwrap();
        summarize(&results)
    }

    pub fn test_results(&self) -> Vec<TestResult> {
        self.test_results.lock().unwrap().clone()
    }

    pub fn clear_test_results(&self) {
        self.test_results.lock().unwrap().clear();
    }
}

fn summarize(results: &[TestResult]) -> Option<TestSummary> {
    if results.is_empty() {
        return None;
    }

    let successful: Vec<&TestResult> = results.iter().filter(|r| r.success).collect();
    let total = results.len();

    let avg_time = mean(successful.iter().map(|r| r.response_time_ms));
    let avg_relevance = results.iter().map(|r| r.context_relevance).sum::<f64>() / total as f64;

    let mut groups: BTreeMap<TaskType, (usize, Vec<f64>)> = BTreeMap::new();
    for r in results {
        let entry = groups.entry(r.task_type).or_default();
        entry.0 += 1;
        if r.success {
            entry.1.push(r.response_time_ms);
        }
    }
    let by_task_type = groups
        .into_iter()
        .map(|(task, (count, times))| {
            let stats = TaskGroupStats {
                count,
                success: times.len(),
                avg_time: round2(mean(times.iter().copied())),
            };
            (task, stats)
        })
        .collect();

    Some(TestSummary {
        total_tests: total,
        successful: successful.len(),
        failed: total - successful.len(),
        success_rate: (successful.len() as f64 / total as f64 * 1000.0).round() / 10.0,
        avg_response_time_ms: round2(avg_time),
        avg_context_relevance: (avg_relevance * 1000.0).round() / 1000.0,
        by_task_type,
    })
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(task: TaskType, success: bool, time: f64, relevance: f64) -> TestResult {
        TestResult {
            query: "q".into(),
            task_type: task,
            response_time_ms: time,
            token_count: 0,
            context_relevance: relevance,
            response_quality: None,
            success,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn coverage_is_case_insensitive() {
        let keywords = vec!["Python".to_string(), "차이".to_string(), "rust".to_string()];
        let score = keyword_coverage("python과 JS의 차이", &keywords);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(keyword_coverage("anything", &[]), 1.0);
    }

    #[test]
    fn relevance_saturates_at_three_chunks() {
        assert_eq!(context_relevance(0), 0.0);
        assert!((context_relevance(2) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(context_relevance(3), 1.0);
        assert_eq!(context_relevance(7), 1.0);
    }

    #[test]
    fn structure_markers() {
        assert!(has_structure("## 정의\n..."));
        assert!(has_structure("**근거:**"));
        assert!(has_structure("1. first"));
        assert!(!has_structure("plain answer"));
    }

    #[test]
    fn default_cases_cover_every_task() {
        let cases = default_test_cases();
        assert_eq!(cases.len(), 5);
        let mut tasks: Vec<TaskType> = cases.iter().map(|c| c.task).collect();
        tasks.sort();
        tasks.dedup();
        assert_eq!(tasks.len(), 5);
    }

    #[test]
    fn empty_summary_is_none() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn failures_stay_in_the_denominator() {
        let results = vec![
            result(TaskType::Qa, true, 100.0, 1.0),
            result(TaskType::Qa, false, 0.0, 0.0),
            result(TaskType::Concept, true, 300.0, 0.5),
            result(TaskType::Apply, false, 0.0, 0.0),
        ];
        let summary = summarize(&results).unwrap();
        assert_eq!(summary.total_tests, 4);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success_rate, 50.0);
        assert_eq!(summary.avg_response_time_ms, 200.0);
        assert_eq!(summary.avg_context_relevance, 0.375);

        let qa = &summary.by_task_type[&TaskType::Qa];
        assert_eq!((qa.count, qa.success, qa.avg_time), (2, 1, 100.0));
        let apply = &summary.by_task_type[&TaskType::Apply];
        assert_eq!((apply.count, apply.success, apply.avg_time), (1, 0, 0.0));
    }
}

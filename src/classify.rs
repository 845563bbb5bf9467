//! Keyword-based intent classification.
//!
//! Matching is lowercase substring containment against an ordered table; the
//! first task whose keyword set matches wins. `"차이점 비교해서 어떻게
//! 활용해?"` is therefore a compare query, because compare is checked before
//! apply. Substring matching can fire inside unrelated words; that is
//! accepted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What the user wants done with the material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Summarize,
    Qa,
    Concept,
    Compare,
    Apply,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Summarize,
        TaskType::Qa,
        TaskType::Concept,
        TaskType::Compare,
        TaskType::Apply,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Summarize => "summarize",
            TaskType::Qa => "qa",
            TaskType::Concept => "concept",
            TaskType::Compare => "compare",
            TaskType::Apply => "apply",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown task type: '{}'. Must be summarize, qa, concept, compare, or apply.",
                    s
                )
            })
    }
}

/// Keyword sets in priority order. Anything unmatched is [`TaskType::Qa`].
pub const KEYWORD_TABLE: [(TaskType, &[&str]); 4] = [
    (TaskType::Summarize, &["요약", "정리", "핵심", "간단히", "줄여"]),
    (TaskType::Concept, &["뭐야", "무엇", "정의", "설명해", "이란", "이란?"]),
    (TaskType::Compare, &["비교", "차이", "vs", "다른점", "공통점", "장단점"]),
    (TaskType::Apply, &["어떻게", "방법", "활용", "적용", "예시", "코드"]),
];

/// Classify a query by first keyword match.
pub fn classify(query: &str) -> TaskType {
    let lowered = query.to_lowercase();
    KEYWORD_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(task, _)| *task)
        .unwrap_or(TaskType::Qa)
}

/// The caller's request for a task.
///
/// `Task(Qa)` is treated like `Auto`: a plain question whose wording says
/// "summarize" gets summarized. Any other explicit task is honoured as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskHint {
    #[default]
    Auto,
    #[serde(untagged)]
    Task(TaskType),
}

impl From<TaskType> for TaskHint {
    fn from(task: TaskType) -> Self {
        TaskHint::Task(task)
    }
}

impl fmt::Display for TaskHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskHint::Auto => f.write_str("auto"),
            TaskHint::Task(task) => task.fmt(f),
        }
    }
}

impl FromStr for TaskHint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(TaskHint::Auto)
        } else {
            s.parse().map(TaskHint::Task)
        }
    }
}

/// Decide the task for `query` under `hint`.
pub fn resolve_task(hint: TaskHint, query: &str) -> TaskType {
    match hint {
        TaskHint::Auto | TaskHint::Task(TaskType::Qa) => classify(query),
        TaskHint::Task(task) => task,
    }
}

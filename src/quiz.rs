//! Multiple-choice quiz generation and grading.
//!
//! The model is asked for a bare JSON array of four-option questions. A
//! reply that does not parse into at least one well-formed question fails
//! the whole attempt with [`PipelineError::QuizFormat`]; nothing is
//! repaired or partially kept.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classify::TaskType;
use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;

const QUIZ_K: usize = 5;
const QUIZ_TEMPERATURE: f32 = 0.7;
const OPTION_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    /// The label used in the prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "쉬움",
            Difficulty::Normal => "보통",
            Difficulty::Hard => "어려움",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "easy" | "쉬움" => Ok(Difficulty::Easy),
            "normal" | "보통" => Ok(Difficulty::Normal),
            "hard" | "어려움" => Ok(Difficulty::Hard),
            other => anyhow::bail!("unknown difficulty: '{}'. Must be easy, normal, or hard.", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    /// Index of the correct option.
    pub answer: usize,
    #[serde(default)]
    pub explanation: String,
}

/// A missed question, kept for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrongNote {
    pub question: String,
    /// Empty when the question was left unanswered.
    pub your_answer: String,
    pub correct_answer: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizReport {
    pub total: usize,
    pub score: usize,
    /// Whole percent, rounded down.
    pub accuracy: u32,
    pub wrong_notes: Vec<WrongNote>,
}

pub fn quiz_prompt(num: usize, difficulty: Difficulty) -> String {
    format!(
        "학습 자료 기반 {} 난이도 4지선다 퀴즈 {}개를 JSON으로 만들어줘.\n\n\
         형식:\n\
         [{{\"question\": \"질문\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \"answer\": 0, \"explanation\": \"설명\"}}]\n\n\
         answer는 정답 인덱스(0-3). JSON만 출력해.",
        difficulty.label(),
        num
    )
}

/// Ask the pipeline for `num` questions grounded in the registered material.
/// Quizzes read five chunks at a higher temperature than answers.
pub async fn generate_quiz(
    pipeline: &Pipeline,
    num: usize,
    difficulty: Difficulty,
) -> Result<Vec<QuizQuestion>> {
    let input = pipeline
        .input(quiz_prompt(num, difficulty))
        .with_task(TaskType::Qa)
        .with_k(QUIZ_K)
        .with_temperature(QUIZ_TEMPERATURE);
    let output = pipeline.process(&input).await?;
    let questions = parse_quiz(&output.response)?;
    tracing::info!(requested = num, generated = questions.len(), %difficulty, "quiz generated");
    Ok(questions)
}

/// Parse a model reply, tolerating a surrounding ```json fence.
pub fn parse_quiz(text: &str) -> Result<Vec<QuizQuestion>> {
    let body = strip_fences(text.trim());
    let questions: Vec<QuizQuestion> =
        serde_json::from_str(body).map_err(|e| PipelineError::QuizFormat(e.to_string()))?;

    if questions.is_empty() {
        return Err(PipelineError::QuizFormat("no questions in reply".into()));
    }
    for (i, q) in questions.iter().enumerate() {
        if q.options.len() != OPTION_COUNT {
            return Err(PipelineError::QuizFormat(format!(
                "question {} has {} options, expected {}",
                i + 1,
                q.options.len(),
                OPTION_COUNT
            )));
        }
        if q.answer >= q.options.len() {
            return Err(PipelineError::QuizFormat(format!(
                "question {} answer index {} is out of range",
                i + 1,
                q.answer
            )));
        }
    }
    Ok(questions)
}

fn strip_fences(text: &str) -> &str {
    let inner = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text;
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

/// Score `answers` (one selected option index per question, `None` when
/// skipped) and collect wrong notes.
pub fn grade(questions: &[QuizQuestion], answers: &[Option<usize>]) -> QuizReport {
    let mut score = 0;
    let mut wrong_notes = Vec::new();

    for (i, q) in questions.iter().enumerate() {
        let chosen = answers.get(i).copied().flatten();
        if chosen == Some(q.answer) {
            score += 1;
            continue;
        }
        wrong_notes.push(WrongNote {
            question: q.question.clone(),
            your_answer: chosen
                .and_then(|a| q.options.get(a))
                .cloned()
                .unwrap_or_default(),
            correct_answer: q.options.get(q.answer).cloned().unwrap_or_default(),
            explanation: q.explanation.clone(),
        });
    }

    let total = questions.len();
    let accuracy = if total == 0 {
        0
    } else {
        (score * 100 / total) as u32
    };
    QuizReport {
        total,
        score,
        accuracy,
        wrong_notes,
    }
}

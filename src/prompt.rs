//! Task-specific prompt assembly.
//!
//! A request becomes one system message (task instructions with the
//! retrieved material embedded), the most recent conversation turns, and
//! the current query as the final user message.

use serde::{Deserialize, Serialize};

use crate::classify::TaskType;

/// Substituted for the material block when retrieval found nothing.
pub const NO_MATERIAL_PLACEHOLDER: &str = "등록된 학습 자료가 없습니다.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn in OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

const SUMMARIZE_TEMPLATE: &str = "당신은 문서 요약 전문가입니다.

<지침>
1. 핵심 내용을 빠짐없이 추출하세요
2. 불필요한 수식어나 반복은 제거하세요
3. 논리적 구조를 유지하며 요약하세요
4. 원문의 의도와 맥락을 보존하세요
</지침>

<출력 형식>
## 핵심 요약
- [핵심 포인트 1]
- [핵심 포인트 2]
- [핵심 포인트 3]

## 주요 내용
[상세 요약 내용]

## 키워드
[관련 키워드 나열]
</출력 형식>

<학습 자료>
{context}
</학습 자료>

위 자료를 기반으로 요약해주세요.";

const QA_TEMPLATE: &str = "당신은 학습 자료 기반 Q&A 전문가 '오렌지'입니다.

<지침>
1. 제공된 학습 자료를 기반으로만 답변하세요
2. 자료에 없는 내용은 추측하지 말고 솔직히 안내하세요
3. 출처를 명확히 밝히세요
4. 이해하기 쉽게 설명하세요
</지침>

<출력 형식>
[질문에 대한 직접적인 답변]

**근거:**
- [출처1]: [관련 내용]
- [출처2]: [관련 내용]

**추가 설명:** (필요시)
[보충 설명]
</출력 형식>

<학습 자료>
{context}
</학습 자료>

위 자료를 바탕으로 질문에 답변해주세요.
자료에 관련 내용이 없다면 \"현재 학습 자료에는 해당 내용이 없습니다.\"라고 안내해주세요.";

const CONCEPT_TEMPLATE: &str = "당신은 개념 설명 전문가 '오렌지'입니다.

<지침>
1. 정의를 먼저 명확히 제시하세요
2. 핵심 포인트를 구조화하여 설명하세요
3. 이해를 돕는 예시를 포함하세요
4. 어려운 용어는 쉽게 풀어서 설명하세요
</지침>

<출력 형식>
## 정의
[개념의 정확한 정의]

## 핵심 포인트
1. [포인트 1]
2. [포인트 2]
3. [포인트 3]

## 예시
[이해를 돕는 구체적 예시]

## 관련 개념
- [연관 개념 1]
- [연관 개념 2]
</출력 형식>

<학습 자료>
{context}
</학습 자료>

위 자료를 바탕으로 개념을 설명해주세요.";

const COMPARE_TEMPLATE: &str = "당신은 비교 분석 전문가 '오렌지'입니다.

<지침>
1. 비교 대상을 명확히 구분하세요
2. 공통점과 차이점을 체계적으로 분석하세요
3. 표 형식으로 시각화하세요
4. 각각의 장단점을 객관적으로 제시하세요
</지침>

<출력 형식>
## 비교 대상
- A: [대상 A 설명]
- B: [대상 B 설명]

## 비교표
| 항목 | A | B |
|------|---|---|
| [항목1] | [내용] | [내용] |
| [항목2] | [내용] | [내용] |

## 공통점
- [공통점 1]

## 차이점
- [차이점 1]

## 결론
[비교 분석 결론]
</출력 형식>

<학습 자료>
{context}
</학습 자료>

위 자료를 바탕으로 비교 분석해주세요.";

const APPLY_TEMPLATE: &str = "당신은 응용/실습 전문가 '오렌지'입니다.

<지침>
1. 실제 활용 방법을 구체적으로 제시하세요
2. 단계별 가이드를 제공하세요
3. 코드가 필요하면 예시 코드를 포함하세요
4. 주의사항이나 팁을 추가하세요
</지침>

<출력 형식>
## 활용 방법
[실제 활용 방법 설명]

## 단계별 가이드
1. **단계 1**: [내용]
2. **단계 2**: [내용]
3. **단계 3**: [내용]

## 예시 코드 (해당시)
```
[코드 예시]
```

## 팁과 주의사항
- [팁 1]
- [주의사항 1]
</출력 형식>

<학습 자료>
{context}
</학습 자료>

위 자료를 바탕으로 실제 활용 방법을 설명해주세요.";

/// Instruction template for `task`, with a `{context}` slot.
pub fn template(task: TaskType) -> &'static str {
    match task {
        TaskType::Summarize => SUMMARIZE_TEMPLATE,
        TaskType::Qa => QA_TEMPLATE,
        TaskType::Concept => CONCEPT_TEMPLATE,
        TaskType::Compare => COMPARE_TEMPLATE,
        TaskType::Apply => APPLY_TEMPLATE,
    }
}

/// System prompt for `task` with `context` (or the placeholder) filled in.
pub fn system_prompt(task: TaskType, context: &str) -> String {
    let material = if context.trim().is_empty() {
        NO_MATERIAL_PLACEHOLDER
    } else {
        context
    };
    template(task).replace("{context}", material)
}

/// System message, the last `max_turns` history turns, then the query.
///
/// History turns keep their order; anything not from the user is replayed
/// as an assistant turn.
pub fn build_messages(
    query: &str,
    context: &str,
    task: TaskType,
    history: &[ChatMessage],
    max_turns: usize,
) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(max_turns)..];

    let mut messages = Vec::with_capacity(recent.len() + 2);
    messages.push(ChatMessage::system(system_prompt(task, context)));
    messages.extend(recent.iter().map(|turn| match turn.role {
        Role::User => ChatMessage::user(turn.content.clone()),
        Role::Assistant | Role::System => ChatMessage::assistant(turn.content.clone()),
    }));
    messages.push(ChatMessage::user(query));
    messages
}

//! LLM 응답 파서
//!
//! 구분된 질문/답변 블록을 추출합니다. 허용하는 변형:
//! - `Q:` / `Question:` / `Q1.` / `**Q:**` / `1. Q:` 형태의 표식
//! - 여러 줄 답변, 같은 줄의 `Q: ... A: ...`
//! - 추론 모델의 `<think>...</think>` 블록 (제거)
//! - `{question, answer}` 객체의 JSON 배열
//!
//! 명확히 구분된 질문과 답변이 하나도 없으면 거부합니다.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::SynthesisError;

/// 검증 전 QA 쌍
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawPair {
    #[serde(alias = "q", alias = "Q")]
    pub question: String,
    #[serde(alias = "a", alias = "A")]
    pub answer: String,
}

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think regex"))
}

fn question_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:#+[ \t]*)?(?:\d+[.)][ \t]*)?(?:\*\*|__)?(?:Q|Question|QUESTION)[ \t]*\d*[ \t]*[:.)][ \t]*(?:\*\*|__)?[ \t]*",
        )
        .expect("valid question regex")
    })
}

/// 줄 시작의 답변 표식
fn answer_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:\d+[.)][ \t]*)?(?:\*\*|__)?(?:A|Answer|ANSWER)[ \t]*\d*[ \t]*[:.)][ \t]*(?:\*\*|__)?[ \t]*",
        )
        .expect("valid answer regex")
    })
}

/// 질문 줄 안의 답변 표식 (`Q: ... A: ...`)
fn inline_answer_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[ \t](?:\*\*)?(?:A|Answer):[ \t]*(?:\*\*|__)?[ \t]*")
            .expect("valid inline answer regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Question,
    Answer,
}

/// 추론 블록 제거
pub fn strip_reasoning(text: &str) -> String {
    let text = think_block().replace_all(text, "");
    // 닫는 태그만 남은 경우 (시작 태그가 잘린 응답)
    match text.rfind("</think>") {
        Some(pos) => text[pos + "</think>".len()..].to_string(),
        None => text.into_owned(),
    }
}

/// 응답을 QA 쌍으로 파싱
pub fn parse_response(response: &str) -> Result<Vec<RawPair>, SynthesisError> {
    let text = strip_reasoning(response);
    let text = text.trim();

    if text.is_empty() {
        return Err(SynthesisError::Parse("empty response".to_string()));
    }

    if let Some(pairs) = parse_json(text) {
        if !pairs.is_empty() {
            return Ok(pairs);
        }
    }

    let pairs = parse_markers(text);
    if pairs.is_empty() {
        return Err(SynthesisError::Parse(
            "no clearly delimited question and answer".to_string(),
        ));
    }
    Ok(pairs)
}

/// JSON 배열 응답 (코드 펜스 안이어도 됨)
fn parse_json(text: &str) -> Option<Vec<RawPair>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<RawPair>>(&text[start..=end])
        .ok()
        .map(|pairs| {
            pairs
                .into_iter()
                .map(|p| RawPair {
                    question: clean(&p.question),
                    answer: clean(&p.answer),
                })
                .collect()
        })
}

/// `Q:` / `A:` 표식 기반 파싱
fn parse_markers(text: &str) -> Vec<RawPair> {
    let mut markers: Vec<(usize, usize, Marker)> = question_marker()
        .find_iter(text)
        .map(|m| (m.start(), m.end(), Marker::Question))
        .chain(
            answer_marker()
                .find_iter(text)
                .map(|m| (m.start(), m.end(), Marker::Answer)),
        )
        .collect();
    markers.sort_by_key(|(start, _, _)| *start);

    // 겹치는 표식 제거 (먼저 시작한 것 우선)
    let mut filtered: Vec<(usize, usize, Marker)> = Vec::with_capacity(markers.len());
    for marker in markers {
        if filtered.last().map(|last| marker.0 < last.1).unwrap_or(false) {
            continue;
        }
        filtered.push(marker);
    }

    // 같은 줄 답변은 아직 답변이 없는 질문 줄에서만 인정
    let inline: Vec<(usize, usize, Marker)> = filtered
        .iter()
        .enumerate()
        .filter(|(i, marker)| {
            marker.2 == Marker::Question
                && filtered.get(i + 1).map(|next| next.2 != Marker::Answer).unwrap_or(true)
        })
        .filter_map(|(_, &(_, q_end, _))| {
            let line_end = text[q_end..].find('\n').map(|p| q_end + p).unwrap_or(text.len());
            inline_answer_marker()
                .find(&text[q_end..line_end])
                .map(|m| (q_end + m.start(), q_end + m.end(), Marker::Answer))
        })
        .collect();
    if !inline.is_empty() {
        filtered.extend(inline);
        filtered.sort_by_key(|(start, _, _)| *start);
    }

    let mut pairs = Vec::new();
    for (i, window) in filtered.windows(2).enumerate() {
        let (_, q_end, q_kind) = window[0];
        let (a_start, a_end, a_kind) = window[1];
        if q_kind != Marker::Question || a_kind != Marker::Answer {
            continue;
        }

        let answer_end = filtered.get(i + 2).map(|m| m.0).unwrap_or(text.len());
        let question = clean(&text[q_end..a_start]);
        let answer = clean(&text[a_end..answer_end]);

        if !question.is_empty() && !answer.is_empty() {
            pairs.push(RawPair { question, answer });
        }
    }

    pairs
}

/// 앞뒤 공백과 강조 기호 정리
fn clean(text: &str) -> String {
    text.trim()
        .trim_matches(|c| c == '*' || c == '_')
        .trim()
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

//! QA 합성 모듈
//!
//! 청크 하나를 로컬 LLM으로 0개 이상의 QA 쌍으로 변환합니다.
//!
//! 시도 예산(`max_attempts`)은 전송 실패와 파싱 실패가 공유합니다.
//! - 전송 실패: 지수 백오프 후 재시도
//! - 파싱/검증 실패: 즉시 재시도
//!
//! 예산을 모두 쓰면 청크는 `Rejected`로 끝나며 절대 대기 상태로 남지 않습니다.
//! 저장은 코디네이터가 담당하고 이 모듈은 LLM 호출만 합니다.

mod parser;
mod prompt;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, ValidationConfig};
use crate::error::{LlmError, SynthesisError};
use crate::knowledge::{Chunk, ChunkOutcome, OutcomeStatus, QaPair};
use crate::llm::LlmClient;

pub use parser::{parse_response, strip_reasoning, RawPair};
pub use prompt::{PromptTemplate, DEFAULT_TEMPLATE};

// ============================================================================
// Validator
// ============================================================================

/// 파싱된 QA 쌍 검증기
pub struct PairValidator {
    config: ValidationConfig,
    template: Arc<PromptTemplate>,
}

impl PairValidator {
    pub fn new(config: ValidationConfig, template: Arc<PromptTemplate>) -> Self {
        Self { config, template }
    }

    /// 통과한 쌍과 탈락 사유 목록
    pub fn validate(&self, pairs: Vec<RawPair>) -> (Vec<RawPair>, Vec<String>) {
        let mut accepted = Vec::new();
        let mut reasons = Vec::new();
        let mut seen = HashSet::new();

        for pair in pairs {
            match self.check(&pair) {
                Err(reason) => reasons.push(reason),
                Ok(()) => {
                    if seen.insert(prompt::normalize(&pair.question)) {
                        accepted.push(pair);
                    } else {
                        reasons.push("duplicate question".to_string());
                    }
                }
            }
        }

        (accepted, reasons)
    }

    fn check(&self, pair: &RawPair) -> Result<(), String> {
        let q_len = pair.question.chars().count();
        let a_len = pair.answer.chars().count();
        let c = &self.config;

        if q_len == 0 || a_len == 0 {
            return Err("empty question or answer".to_string());
        }
        if q_len < c.min_question_chars || q_len > c.max_question_chars {
            return Err(format!("question length {} out of bounds", q_len));
        }
        if a_len < c.min_answer_chars || a_len > c.max_answer_chars {
            return Err(format!("answer length {} out of bounds", a_len));
        }
        if is_placeholder(&pair.question) || is_placeholder(&pair.answer) {
            return Err("template placeholder echoed".to_string());
        }
        if self.template.is_restatement(&pair.answer) {
            return Err("answer restates the instructions".to_string());
        }
        if prompt::normalize(&pair.question) == prompt::normalize(&pair.answer) {
            return Err("answer repeats the question".to_string());
        }
        Ok(())
    }
}

/// `[specific question]` 같은 자리표시자 그대로인지
fn is_placeholder(text: &str) -> bool {
    let t = text.trim();
    t.starts_with('[') && t.ends_with(']') && !t[1..t.len() - 1].contains(['[', ']'])
}

// ============================================================================
// QA Synthesizer
// ============================================================================

/// 청크 → QA 합성기
pub struct QaSynthesizer {
    llm: Arc<dyn LlmClient>,
    template: Arc<PromptTemplate>,
    validator: PairValidator,
    max_attempts: u32,
    call_timeout: Duration,
    backoff: Duration,
}

impl QaSynthesizer {
    /// 설정으로 생성
    pub fn new(
        llm: Arc<dyn LlmClient>,
        template: PromptTemplate,
        llm_config: &LlmConfig,
        validation: ValidationConfig,
    ) -> Self {
        let template = Arc::new(template);
        Self {
            llm,
            validator: PairValidator::new(validation, template.clone()),
            template,
            max_attempts: llm_config.max_attempts.max(1),
            call_timeout: llm_config.timeout(),
            backoff: llm_config.retry_backoff(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 청크 하나 합성 (항상 종결 결과 반환)
    pub async fn synthesize(&self, chunk: &Chunk) -> ChunkOutcome {
        let prompt = self.template.render(chunk);
        let mut failures = Vec::new();
        let mut transport_failures = 0u32;
        let mut last_error: Option<SynthesisError> = None;

        for attempt in 1..=self.max_attempts {
            match self.attempt(&prompt, chunk, attempt).await {
                Ok(pairs) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            "Chunk {} accepted on attempt {}/{}",
                            chunk.id,
                            attempt,
                            self.max_attempts
                        );
                    }
                    return ChunkOutcome {
                        chunk_id: chunk.id.clone(),
                        status: OutcomeStatus::Accepted,
                        attempts: attempt,
                        failure_kind: None,
                        detail: None,
                        failures,
                        pairs,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        "Synthesis attempt {}/{} failed for chunk {}: {}",
                        attempt,
                        self.max_attempts,
                        chunk.id,
                        e
                    );
                    failures.push(e.kind());

                    if attempt < self.max_attempts {
                        if let SynthesisError::Transport(_) = e {
                            let delay = self.backoff * 2u32.saturating_pow(transport_failures);
                            transport_failures += 1;
                            tracing::debug!("Backing off {:?} before retry", delay);
                            tokio::time::sleep(delay).await;
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        let (failure_kind, detail) = match &last_error {
            Some(e) => (Some(e.kind()), Some(e.to_string())),
            None => (None, None),
        };

        ChunkOutcome {
            chunk_id: chunk.id.clone(),
            status: OutcomeStatus::Rejected,
            attempts: self.max_attempts,
            failure_kind,
            detail,
            failures,
            pairs: Vec::new(),
        }
    }

    /// LLM 호출 한 번 + 파싱 + 검증
    async fn attempt(
        &self,
        prompt: &str,
        chunk: &Chunk,
        attempt: u32,
    ) -> Result<Vec<QaPair>, SynthesisError> {
        let response = tokio::time::timeout(self.call_timeout, self.llm.complete(prompt))
            .await
            .map_err(|_| LlmError::Timeout(self.call_timeout))??;

        let parsed = parse_response(&response)?;
        let parsed_count = parsed.len();
        let (valid, reasons) = self.validator.validate(parsed);

        if valid.is_empty() {
            return Err(SynthesisError::Validation(format!(
                "{} parsed, 0 valid ({})",
                parsed_count,
                reasons.join("; ")
            )));
        }
        if !reasons.is_empty() {
            tracing::debug!(
                "Chunk {}: dropped {} invalid pairs ({})",
                chunk.id,
                reasons.len(),
                reasons.join("; ")
            );
        }

        Ok(valid
            .into_iter()
            .map(|p| QaPair {
                question: p.question,
                answer: p.answer,
                source_chunk_id: chunk.id.clone(),
                attempts: attempt,
            })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{DocType, FileType};
    use crate::error::FailureKind;
    use crate::knowledge::ChunkMetadata;
    use crate::llm::{Scripted, ScriptedLlm};

    const VALID: &str = "Q: What does the -sV flag do in nmap?\nA: It enables service and version detection on open ports.";

    fn chunk() -> Chunk {
        let text = "Use nmap -sV to detect service versions on open ports.";
        Chunk {
            id: "chunk-1".to_string(),
            source_path: "/corpus/recon.md".to_string(),
            source_hash: "h".to_string(),
            ordinal: 0,
            text: text.to_string(),
            char_len: text.len(),
            token_estimate: 14,
            start_offset: 0,
            end_offset: text.len(),
            metadata: ChunkMetadata {
                file_type: FileType::Text,
                doc_type: DocType::Text,
                title: Some("recon".to_string()),
                page_start: None,
                page_end: None,
                ocr_confidence: None,
                language: None,
            },
        }
    }

    fn synthesizer(llm: &ScriptedLlm, max_attempts: u32) -> QaSynthesizer {
        let config = LlmConfig {
            max_attempts,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        QaSynthesizer::new(
            Arc::new(llm.clone()),
            PromptTemplate::default(),
            &config,
            ValidationConfig::default(),
        )
    }

    fn validator() -> PairValidator {
        PairValidator::new(ValidationConfig::default(), Arc::new(PromptTemplate::default()))
    }

    fn raw(q: &str, a: &str) -> RawPair {
        RawPair {
            question: q.to_string(),
            answer: a.to_string(),
        }
    }

    #[tokio::test]
    async fn test_malformed_twice_then_valid() {
        let llm = ScriptedLlm::with_replies(["garbage output", "still not a pair", VALID]);
        let outcome = synthesizer(&llm, 3).synthesize(&chunk()).await;

        assert_eq!(outcome.status, OutcomeStatus::Accepted);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.pairs[0].attempts, 3);
        assert_eq!(outcome.pairs[0].source_chunk_id, "chunk-1");
        assert_eq!(
            outcome.failures,
            vec![FailureKind::SynthesisParseFailure, FailureKind::SynthesisParseFailure]
        );
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_rejects() {
        let llm = ScriptedLlm::new().with_default_reply("no pairs here");
        let outcome = synthesizer(&llm, 3).synthesize(&chunk()).await;

        assert_eq!(outcome.status, OutcomeStatus::Rejected);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.failure_kind, Some(FailureKind::SynthesisParseFailure));
        assert!(outcome.pairs.is_empty());
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_failures_share_budget() {
        let llm = ScriptedLlm::new();
        llm.push(Scripted::Unreachable);
        llm.push(Scripted::Timeout);
        let outcome = synthesizer(&llm, 2).synthesize(&chunk()).await;

        assert_eq!(outcome.status, OutcomeStatus::Rejected);
        assert_eq!(outcome.failure_kind, Some(FailureKind::SynthesisTransportFailure));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_then_success() {
        let llm = ScriptedLlm::new();
        llm.push(Scripted::Unreachable);
        llm.push(Scripted::Reply(VALID.to_string()));
        let outcome = synthesizer(&llm, 3).synthesize(&chunk()).await;

        assert!(outcome.is_accepted());
        assert_eq!(outcome.failures, vec![FailureKind::SynthesisTransportFailure]);
    }

    #[tokio::test]
    async fn test_prompt_contains_chunk() {
        let llm = ScriptedLlm::with_replies([VALID]);
        synthesizer(&llm, 1).synthesize(&chunk()).await;
        let prompts = llm.prompts();
        assert!(prompts[0].contains("Use nmap -sV to detect service versions"));
        assert!(prompts[0].contains("Title: recon"));
    }

    #[test]
    fn test_validator_rejections() {
        let v = validator();
        let (ok, reasons) = v.validate(vec![
            raw("[specific question]", "[detailed answer] goes right here ok"),
            raw("Short?", "An answer that is long enough to pass."),
            raw("What is the format?", "Format EXACTLY like this:"),
            raw("What does ASLR randomize?", "What does ASLR randomize?"),
            raw("What does ASLR randomize?", "The base addresses of stack, heap and libraries."),
            raw("what does  ASLR randomize?", "Memory layout of the process at load time."),
        ]);

        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].answer, "The base addresses of stack, heap and libraries.");
        assert_eq!(reasons.len(), 5);
        assert!(reasons.iter().any(|r| r.contains("duplicate")));
        assert!(reasons.iter().any(|r| r.contains("placeholder")));
    }

    #[test]
    fn test_is_placeholder() {
        assert!(is_placeholder("[another answer]"));
        assert!(!is_placeholder("[1] see reference"));
        assert!(!is_placeholder("plain"));
    }
}

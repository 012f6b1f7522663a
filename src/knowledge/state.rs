//! 실행 상태 레코드
//!
//! 두 단계(추출, 합성)의 진행 상황은 `PhaseState`로 표현되며
//! 매 단위 처리 후 저장소에 기록됩니다.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

// ============================================================================
// Phase State
// ============================================================================

/// 실행 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Phase 1: 문서 → 청크
    Extraction,
    /// Phase 2: 청크 → QA
    Synthesis,
}

impl Phase {
    /// run_state 테이블 컬럼 이름
    pub(crate) fn column(self) -> &'static str {
        match self {
            Phase::Extraction => "extraction",
            Phase::Synthesis => "synthesis",
        }
    }
}

/// 마지막으로 완료된 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub units_done: usize,
    pub last_unit: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 단계 완료 통계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub units: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub finished_at: DateTime<Utc>,
}

/// 단계 상태: NotStarted → InProgress → Completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    NotStarted,
    InProgress { checkpoint: Checkpoint },
    Completed { stats: PhaseStats },
}

impl PhaseState {
    /// 단위 하나 완료 후 체크포인트 갱신
    pub fn advance(&self, unit: &str) -> Self {
        let units_done = match self {
            PhaseState::InProgress { checkpoint } => checkpoint.units_done + 1,
            _ => 1,
        };
        PhaseState::InProgress {
            checkpoint: Checkpoint {
                units_done,
                last_unit: Some(unit.to_string()),
                updated_at: Utc::now(),
            },
        }
    }

    /// 새 실행 시작 (완료 상태에서 재실행하면 카운터 초기화)
    pub fn start(&self) -> Self {
        match self {
            PhaseState::InProgress { .. } => self.clone(),
            _ => PhaseState::InProgress {
                checkpoint: Checkpoint {
                    units_done: 0,
                    last_unit: None,
                    updated_at: Utc::now(),
                },
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseState::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PhaseState::NotStarted => "not_started",
            PhaseState::InProgress { .. } => "in_progress",
            PhaseState::Completed { .. } => "completed",
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// 실행 진행 기록 (run id 단위)
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub run_id: String,
    pub extraction: PhaseState,
    pub synthesis: PhaseState,
    /// 하나 이상의 QA 쌍이 채택된 청크 수
    pub accepted: usize,
    /// 재시도 예산을 소진해 거부된 청크 수
    pub rejected: usize,
    /// 채택된 QA 쌍 수
    pub pairs: usize,
    /// Phase 2에서 이미 시도된 청크 ID
    pub attempted: HashSet<String>,
    pub last_checkpoint: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    /// accepted / (accepted + rejected), 시도가 없으면 0
    pub fn conversion_rate(&self) -> f64 {
        conversion_rate(self.accepted, self.rejected)
    }
}

/// 변환율 계산
pub fn conversion_rate(accepted: usize, rejected: usize) -> f64 {
    let attempted = accepted + rejected;
    if attempted == 0 {
        0.0
    } else {
        accepted as f64 / attempted as f64
    }
}

// ============================================================================
// QA Records
// ============================================================================

/// 학습 예제 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    pub source_chunk_id: String,
    /// 이 쌍을 얻기까지 LLM 호출 횟수
    pub attempts: u32,
}

/// 청크 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Accepted,
    Rejected,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Accepted => "accepted",
            OutcomeStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(OutcomeStatus::Accepted),
            "rejected" => Some(OutcomeStatus::Rejected),
            _ => None,
        }
    }
}

/// 청크 하나의 합성 결과 (저장 단위)
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub chunk_id: String,
    pub status: OutcomeStatus,
    pub attempts: u32,
    /// 거부 시 마지막 실패 종류
    pub failure_kind: Option<FailureKind>,
    pub detail: Option<String>,
    /// 시도별 실패 기록 (재시도 포함)
    pub failures: Vec<FailureKind>,
    pub pairs: Vec<QaPair>,
}

impl ChunkOutcome {
    pub fn is_accepted(&self) -> bool {
        self.status == OutcomeStatus::Accepted
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_rate_exact() {
        assert_eq!(conversion_rate(87, 13), 0.87);
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(5, 0), 1.0);
    }

    #[test]
    fn test_phase_state_transitions() {
        let state = PhaseState::NotStarted.start();
        assert_eq!(state.label(), "in_progress");

        let state = state.advance("chunk-a").advance("chunk-b");
        match &state {
            PhaseState::InProgress { checkpoint } => {
                assert_eq!(checkpoint.units_done, 2);
                assert_eq!(checkpoint.last_unit.as_deref(), Some("chunk-b"));
            }
            other => panic!("unexpected state: {:?}", other),
        }

        // 진행 중 상태에서 start는 체크포인트 유지
        assert_eq!(state.start(), state);
    }

    #[test]
    fn test_phase_state_serde_tagged() {
        let json = serde_json::to_string(&PhaseState::NotStarted).unwrap();
        assert_eq!(json, r#"{"state":"not_started"}"#);

        let state = PhaseState::NotStarted.start().advance("x");
        let back: PhaseState = serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(back, state);
    }
}

//! 실행 보고서
//!
//! 단계별 집계 (실패 종류별 개수, 포맷별 분포, 변환율).
//! 실패는 하나도 빠짐없이 어느 한 카운터에 들어갑니다.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::collector::FileType;
use crate::error::FailureKind;
use crate::knowledge::{conversion_rate, OutcomeRow, OutcomeStatus};

/// 포맷별 집계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatBreakdown {
    /// 처리 단위 수 (Phase 1: 문서, Phase 2: 청크)
    pub units: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Phase 1: 생성된 청크 수, Phase 2: 채택된 QA 쌍 수
    pub produced: usize,
}

// ============================================================================
// Phase 1
// ============================================================================

/// Phase 1 (문서 → 청크) 보고서
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub run_id: String,
    pub discovered: usize,
    /// 내용이 바뀌지 않아 건너뛴 문서
    pub skipped: usize,
    pub chunked: usize,
    pub chunks_written: usize,
    pub failures: BTreeMap<FailureKind, usize>,
    /// 종결 상태에 이르지 못한 문서 (재실행 시 재처리)
    pub unresolved: Vec<String>,
    pub per_format: BTreeMap<FileType, FormatBreakdown>,
    pub cancelled: bool,
    pub completed: bool,
}

impl ExtractionReport {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    pub fn record_chunked(&mut self, file_type: FileType, chunks: usize) {
        self.chunked += 1;
        self.chunks_written += chunks;
        let entry = self.per_format.entry(file_type).or_default();
        entry.units += 1;
        entry.succeeded += 1;
        entry.produced += chunks;
    }

    pub fn record_failure(&mut self, file_type: FileType, kind: FailureKind, path: &str) {
        *self.failures.entry(kind).or_default() += 1;
        let entry = self.per_format.entry(file_type).or_default();
        entry.units += 1;
        entry.failed += 1;
        if !kind.is_permanent() {
            self.unresolved.push(path.to_string());
        }
    }

    pub fn record_skipped(&mut self, file_type: FileType) {
        self.skipped += 1;
        self.per_format.entry(file_type).or_default().units += 1;
    }

    pub fn failure_count(&self) -> usize {
        self.failures.values().sum()
    }

    /// 모든 문서가 종결 상태이고 중단되지 않았는지
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.unresolved.is_empty()
    }
}

// ============================================================================
// Phase 2
// ============================================================================

/// Phase 2 (청크 → QA) 보고서
#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesisReport {
    pub run_id: String,
    /// 이번 실행에서 처리한 청크 수
    pub processed: usize,
    /// 실행 시작 시 대기 청크 수
    pub pending_before: usize,
    /// 실행 종료 후 남은 대기 청크 수
    pub remaining: usize,
    /// 실행 전체 (이전 실행 포함) 채택 청크 수
    pub accepted: usize,
    /// 실행 전체 거부 청크 수
    pub rejected: usize,
    /// 실행 전체 채택 QA 쌍 수
    pub pairs: usize,
    /// 살아있는 청크 기준 채택 청크 수 (대체된 청크 제외)
    pub live_accepted: usize,
    /// 살아있는 청크 기준 QA 쌍 수 (데이터셋에 쓰이는 수)
    pub live_pairs: usize,
    /// 이후 세대로 대체된 청크의 결과 수
    pub superseded_outcomes: usize,
    /// 거부 청크의 최종 실패 종류 (실행 전체)
    pub rejections: BTreeMap<FailureKind, usize>,
    /// 이번 실행의 시도별 실패 (재시도 포함)
    pub attempt_failures: BTreeMap<FailureKind, usize>,
    pub per_format: BTreeMap<FileType, FormatBreakdown>,
    pub dataset_path: Option<PathBuf>,
    pub records_written: usize,
    pub cancelled: bool,
    pub completed: bool,
}

impl SynthesisReport {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    /// 저장된 청크별 결과로 실행 전체 집계 채우기
    pub fn absorb_outcomes(&mut self, rows: &[OutcomeRow]) {
        self.rejections.clear();
        self.per_format.clear();
        self.live_accepted = 0;
        self.live_pairs = 0;
        self.superseded_outcomes = 0;

        for row in rows {
            if row.superseded {
                self.superseded_outcomes += 1;
            } else if row.status == OutcomeStatus::Accepted {
                self.live_accepted += 1;
                self.live_pairs += row.pair_count;
            }

            let entry = self
                .per_format
                .entry(row.file_type.unwrap_or(FileType::Text))
                .or_default();
            entry.units += 1;

            match row.status {
                OutcomeStatus::Accepted => {
                    entry.succeeded += 1;
                    entry.produced += row.pair_count;
                }
                OutcomeStatus::Rejected => {
                    entry.failed += 1;
                    let kind = row.failure_kind.unwrap_or(FailureKind::SynthesisParseFailure);
                    *self.rejections.entry(kind).or_default() += 1;
                }
            }
        }
    }

    /// accepted / (accepted + rejected)
    pub fn conversion_rate(&self) -> f64 {
        conversion_rate(self.accepted, self.rejected)
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled
    }
}

// ============================================================================
// Tests
// ============================================================================

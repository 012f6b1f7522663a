//! 단위 작업 실패 분류
//!
//! 문서 하나, 청크 하나 단위의 실패는 배치를 중단시키지 않고 기록됩니다.
//! 저장소(Chunk Store / RunState) 실패만 `anyhow::Error`로 전파되어 실행을 멈춥니다.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Failure Kind
// ============================================================================

/// 실행 통계에 집계되는 실패 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 읽을 수 없거나 지원하지 않거나 손상된 원본
    ExtractionFailure,
    /// OCR 백엔드 없음 (손상과 구분)
    OcrUnavailable,
    /// 의미 있는 텍스트가 임계값 미만
    ChunkingRejection,
    /// 추출 타임아웃 (재시도 가능)
    Timeout,
    /// LLM 연결 실패 / 타임아웃
    SynthesisTransportFailure,
    /// LLM 응답 파싱 실패 (검증 탈락 포함)
    SynthesisParseFailure,
}

impl FailureKind {
    /// 영구 실패 여부 (Phase 1에서 종결 상태로 기록할지 결정)
    pub fn is_permanent(self) -> bool {
        !matches!(self, FailureKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ExtractionFailure => "extraction_failure",
            FailureKind::OcrUnavailable => "ocr_unavailable",
            FailureKind::ChunkingRejection => "chunking_rejection",
            FailureKind::Timeout => "timeout",
            FailureKind::SynthesisTransportFailure => "synthesis_transport_failure",
            FailureKind::SynthesisParseFailure => "synthesis_parse_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extraction_failure" => Some(FailureKind::ExtractionFailure),
            "ocr_unavailable" => Some(FailureKind::OcrUnavailable),
            "chunking_rejection" => Some(FailureKind::ChunkingRejection),
            "timeout" => Some(FailureKind::Timeout),
            "synthesis_transport_failure" => Some(FailureKind::SynthesisTransportFailure),
            "synthesis_parse_failure" => Some(FailureKind::SynthesisParseFailure),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Extraction Errors
// ============================================================================

/// 추출기 실패
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unreadable file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("corrupted {path:?}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

impl ExtractError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::OcrUnavailable(_) => FailureKind::OcrUnavailable,
            ExtractError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::ExtractionFailure,
        }
    }
}

// ============================================================================
// Chunking Errors
// ============================================================================

/// 청킹 거부
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("document has no text")]
    Empty,

    #[error("meaningful character ratio {ratio:.2} below threshold {threshold:.2}")]
    Garbage { ratio: f64, threshold: f64 },
}

/// 문서 하나의 Phase 1 실패 (추출 또는 청킹)
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("chunking rejected: {0}")]
    Chunk(#[from] ChunkError),
}

impl DocumentError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DocumentError::Extract(e) => e.kind(),
            DocumentError::Chunk(_) => FailureKind::ChunkingRejection,
        }
    }
}

// ============================================================================
// LLM / Synthesis Errors
// ============================================================================

/// LLM 전송 계층 실패
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode LLM response: {0}")]
    Decode(String),

    #[error("empty response from {0}")]
    EmptyResponse(String),

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),
}

/// 청크 하나를 QA로 변환하는 한 번의 시도 실패
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("transport: {0}")]
    Transport(#[from] LlmError),

    #[error("unparseable response: {0}")]
    Parse(String),

    #[error("no pair passed validation: {0}")]
    Validation(String),
}

impl SynthesisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SynthesisError::Transport(_) => FailureKind::SynthesisTransportFailure,
            SynthesisError::Parse(_) | SynthesisError::Validation(_) => {
                FailureKind::SynthesisParseFailure
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_roundtrip_names() {
        for kind in [
            FailureKind::ExtractionFailure,
            FailureKind::OcrUnavailable,
            FailureKind::ChunkingRejection,
            FailureKind::Timeout,
            FailureKind::SynthesisTransportFailure,
            FailureKind::SynthesisParseFailure,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse("bogus"), None);
    }

    #[test]
    fn test_only_timeout_is_transient() {
        assert!(!FailureKind::Timeout.is_permanent());
        assert!(FailureKind::OcrUnavailable.is_permanent());
        assert!(FailureKind::ChunkingRejection.is_permanent());
    }

    #[test]
    fn test_extract_error_kind() {
        let err = ExtractError::OcrUnavailable("tesseract not found".into());
        assert_eq!(err.kind(), FailureKind::OcrUnavailable);

        let err = ExtractError::Corrupted {
            path: PathBuf::from("a.pdf"),
            reason: "bad xref".into(),
        };
        assert_eq!(err.kind(), FailureKind::ExtractionFailure);
    }

    #[test]
    fn test_synthesis_error_kind() {
        let err = SynthesisError::Parse("no Q:".into());
        assert_eq!(err.kind(), FailureKind::SynthesisParseFailure);

        let err = SynthesisError::Transport(LlmError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.kind(), FailureKind::SynthesisTransportFailure);
    }

    #[test]
    fn test_document_error_kind() {
        let err: DocumentError = ChunkError::Garbage {
            ratio: 0.1,
            threshold: 0.6,
        }
        .into();
        assert_eq!(err.kind(), FailureKind::ChunkingRejection);

        let err: DocumentError = ExtractError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(err.kind(), FailureKind::Timeout);
    }
}

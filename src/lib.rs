//! secqa - 보안 자료 → QA 파인튜닝 데이터셋 변환 파이프라인
//!
//! Phase 1: 문서 수집 → 포맷별 추출 → 구조 기반 청킹 → 청크 저장소
//! Phase 2: 청크 → 로컬 LLM (Ollama) QA 합성 → 검증 → 데이터셋
//!
//! 두 단계 모두 단위마다 체크포인트를 남기므로 중단 후 이어서 실행할 수 있습니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod llm;
pub mod synth;

// Re-exports
pub use collector::{DocType, FileCollector, FileType, SourceDocument};
pub use config::{LlmConfig, OcrConfig, PipelineConfig, ValidationConfig};
pub use coordinator::{
    Coordinator, DatasetFormat, DatasetRecord, ExtractionReport, Shutdown, SynthesisOptions,
    SynthesisReport,
};
pub use error::{ChunkError, ExtractError, FailureKind, LlmError, SynthesisError};
pub use extractor::{ContentExtractor, Extracted, Extractor};
pub use knowledge::{
    get_data_dir, Chunk, ChunkConfig, ChunkStore, Chunker, PhaseState, QaPair, RunState,
    StructuralChunker,
};
pub use llm::{LlmClient, OllamaClient, ScriptedLlm};
pub use synth::{PromptTemplate, QaSynthesizer};

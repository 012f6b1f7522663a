//! Knowledge 모듈 - 청크 생성과 영속 저장
//!
//! - Chunker: 구조 인식 텍스트 분할 (결정적 청크 ID)
//! - Store: SQLite 청크 저장소 + RunState 체크포인트
//! - State: 단계 상태 / QA 레코드 타입

mod chunker;
mod state;
mod store;

// Re-exports
pub use chunker::{
    chunk_id, meaningful_ratio, Chunk, ChunkConfig, ChunkMetadata, Chunker, StructuralChunker,
};
pub use state::{
    conversion_rate, Checkpoint, ChunkOutcome, OutcomeStatus, Phase, PhaseState, PhaseStats,
    QaPair, RunState,
};
pub use store::{
    get_data_dir, ChunkStore, DocumentRecord, DocumentStatus, OutcomeRow, PairRecord, StoreStats,
    DB_FILE,
};

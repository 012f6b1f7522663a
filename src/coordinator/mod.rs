//! Run Coordinator
//!
//! Phase 1 (문서 → 청크)과 Phase 2 (청크 → QA)를 각각 재개 가능한 배치로 실행합니다.
//!
//! 워커는 결과만 돌려주고, 저장소 쓰기는 코디네이터 루프 한 곳에서만 일어납니다.
//! 매 단위 처리 직후 체크포인트를 기록하므로 중단 후 재실행하면 이어서 진행합니다.

mod dataset;
mod extract;
mod report;
mod synthesize;

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::PipelineConfig;
use crate::extractor::ContentExtractor;
use crate::knowledge::ChunkStore;

pub use dataset::{read_dataset, write_dataset, DatasetFormat, DatasetRecord, DatasetSummary};
pub use report::{ExtractionReport, FormatBreakdown, SynthesisReport};
pub use synthesize::SynthesisOptions;

/// 기본 run id
pub const DEFAULT_RUN_ID: &str = "default";

/// 진행 로그 간격 (단위 수)
const PROGRESS_EVERY: usize = 10;

// ============================================================================
// Shutdown
// ============================================================================

/// 단위 사이 중단 신호
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// 중단 요청
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// 중단 요청까지 대기
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Ctrl-C 수신 시 중단 요청
    pub fn listen_ctrl_c(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                return;
            }
            tracing::info!("Received shutdown signal, stopping after the current unit");
            shutdown.trigger();
        });
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// 실행 코디네이터 (run id 하나)
pub struct Coordinator {
    store: Arc<ChunkStore>,
    config: PipelineConfig,
    run_id: String,
    shutdown: Shutdown,
    extractor: Arc<ContentExtractor>,
}

impl Coordinator {
    /// 설정의 기본 추출기로 생성
    pub fn new(store: Arc<ChunkStore>, config: PipelineConfig, run_id: impl Into<String>) -> Self {
        let extractor = Arc::new(ContentExtractor::from_config(&config));
        Self {
            store,
            config,
            run_id: run_id.into(),
            shutdown: Shutdown::new(),
            extractor,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 추출기 레지스트리 교체
    pub fn with_extractor(mut self, extractor: ContentExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

// ============================================================================
// Tests
// ============================================================================

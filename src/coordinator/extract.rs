//! Phase 1: 문서 → 청크

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};

use super::{Coordinator, ExtractionReport, PROGRESS_EVERY};
use crate::collector::{CollectorConfig, FileCollector, SourceDocument};
use crate::error::{DocumentError, ExtractError};
use crate::extractor::ContentExtractor;
use crate::knowledge::{Chunk, ChunkConfig, Chunker, Phase, PhaseState, PhaseStats, StructuralChunker};

impl Coordinator {
    /// Phase 1 실행
    ///
    /// 내용 해시가 같고 이미 종결 상태인 문서는 건너뜁니다 (`force`면 다시 청킹).
    /// 문서 단위 실패는 기록만 하고 계속 진행하며, 저장소 오류만 실행을 중단시킵니다.
    pub async fn run_extraction(&self, source_dir: &Path, force: bool) -> Result<ExtractionReport> {
        if !source_dir.is_dir() {
            bail!("Source directory not found: {:?}", source_dir);
        }

        let collector = FileCollector::new(CollectorConfig::from(&self.config));
        let dir = source_dir.to_path_buf();
        let documents = tokio::task::spawn_blocking(move || collector.collect_directory(&dir))
            .await
            .context("Collector task failed")??;

        let mut report = ExtractionReport::new(&self.run_id);
        report.discovered = documents.len();
        tracing::info!(
            "Phase 1 started: {} documents discovered in {:?}",
            documents.len(),
            source_dir
        );

        let run = self.store.load_run_state(&self.run_id)?;
        let mut phase = run.extraction.start();
        self.store.save_phase(&self.run_id, Phase::Extraction, &phase)?;

        let mut work = Vec::with_capacity(documents.len());
        for doc in documents {
            if !force {
                if let Some(record) = self.store.document_record(&doc.key())? {
                    if record.content_hash == doc.content_hash && record.status.is_terminal() {
                        tracing::debug!("Skipping unchanged document {}", doc.key());
                        report.record_skipped(doc.file_type);
                        continue;
                    }
                }
            }
            work.push(doc);
        }

        let total = work.len();
        let chunker = Arc::new(StructuralChunker::new(ChunkConfig::from(&self.config)));
        let timeout = self.config.extract_timeout();

        let mut results = stream::iter(work.into_iter().map(|doc| {
            let extractor = self.extractor.clone();
            let chunker = chunker.clone();
            async move {
                let result = process_document(&extractor, chunker.as_ref(), &doc, timeout).await;
                (doc, result)
            }
        }))
        .buffer_unordered(self.config.extract_concurrency.max(1));

        let mut done = 0usize;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.wait() => {
                    tracing::warn!("Phase 1 interrupted after {}/{} documents", done, total);
                    report.cancelled = true;
                    break;
                }

                next = results.next() => {
                    let Some((doc, result)) = next else { break };
                    let key = doc.key();

                    match result {
                        Ok(chunks) => {
                            self.store.commit_generation(&doc, &chunks)?;
                            report.record_chunked(doc.file_type, chunks.len());
                        }
                        Err(e) => {
                            let kind = e.kind();
                            tracing::warn!("Document {} failed ({}): {}", key, kind, e);
                            self.store.record_document_failure(&doc, kind, &e.to_string())?;
                            report.record_failure(doc.file_type, kind, &key);
                        }
                    }

                    phase = phase.advance(&key);
                    self.store.save_phase(&self.run_id, Phase::Extraction, &phase)?;

                    done += 1;
                    if done % PROGRESS_EVERY == 0 {
                        tracing::info!(
                            "Processed {}/{} documents ({} chunks, {} failures)",
                            done,
                            total,
                            report.chunks_written,
                            report.failure_count()
                        );
                    }
                }
            }
        }

        if !report.cancelled && report.unresolved.is_empty() {
            let stats = self.store.stats()?;
            let phase = PhaseState::Completed {
                stats: PhaseStats {
                    units: report.discovered,
                    succeeded: stats.chunked_documents,
                    failed: stats.failed_documents,
                    finished_at: Utc::now(),
                },
            };
            self.store.save_phase(&self.run_id, Phase::Extraction, &phase)?;
            report.completed = true;
        }

        tracing::info!(
            "Phase 1 finished: {} chunked, {} skipped, {} failed, {} unresolved",
            report.chunked,
            report.skipped,
            report.failure_count(),
            report.unresolved.len()
        );

        Ok(report)
    }
}

/// 문서 하나 추출 + 청킹 (저장하지 않음)
async fn process_document(
    extractor: &ContentExtractor,
    chunker: &dyn Chunker,
    doc: &SourceDocument,
    timeout: Duration,
) -> Result<Vec<Chunk>, DocumentError> {
    let extracted = tokio::time::timeout(timeout, extractor.extract(doc))
        .await
        .map_err(|_| ExtractError::Timeout(timeout))??;

    let chunks = chunker.chunk(doc, &extracted)?;
    tracing::debug!("{} -> {} chunks via {}", doc.key(), chunks.len(), chunker.name());
    Ok(chunks)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::FailureKind;
    use crate::knowledge::{ChunkStore, DocumentStatus};
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, Coordinator) {
        let corpus = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open_in(data.path()).unwrap());
        let config = PipelineConfig {
            enable_ocr: false,
            ..Default::default()
        };
        let coordinator = Coordinator::new(store, config, "test");
        (corpus, data, coordinator)
    }

    fn paragraph(seed: &str, len: usize) -> String {
        let sentence = format!("The {} host exposes an outdated service banner. ", seed);
        sentence.repeat(len / sentence.len() + 1)[..len].trim_end().to_string() + "."
    }

    #[tokio::test]
    async fn test_extraction_records_chunks_and_failures() {
        let (corpus, _data, coordinator) = setup();
        std::fs::write(corpus.path().join("note.md"), paragraph("alpha", 600)).unwrap();
        std::fs::write(corpus.path().join("shot.png"), b"\x89PNG\r\n\x1a\n").unwrap();

        let report = coordinator.run_extraction(corpus.path(), false).await.unwrap();

        assert_eq!(report.discovered, 2);
        assert_eq!(report.chunked, 1);
        assert_eq!(report.failures[&FailureKind::OcrUnavailable], 1);
        assert!(report.completed);

        let store = coordinator.store();
        assert_eq!(store.live_chunks().unwrap().len(), 1);
        let run = store.load_run_state("test").unwrap();
        assert!(run.extraction.is_completed());

        let image = corpus.path().join("shot.png");
        let record = store
            .document_record(&image.to_string_lossy())
            .unwrap()
            .unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn test_changed_document_supersedes_generation() {
        let (corpus, _data, coordinator) = setup();
        let path = corpus.path().join("note.md");
        std::fs::write(&path, paragraph("alpha", 600)).unwrap();
        coordinator.run_extraction(corpus.path(), false).await.unwrap();
        let first = coordinator.store().live_chunks().unwrap();

        std::fs::write(&path, paragraph("bravo", 700)).unwrap();
        let report = coordinator.run_extraction(corpus.path(), false).await.unwrap();
        assert_eq!(report.skipped, 0);

        let second = coordinator.store().live_chunks().unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].id, second[0].id);
        assert_eq!(coordinator.store().stats().unwrap().superseded_chunks, 1);
        assert!(coordinator.store().get_chunk(&first[0].id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (corpus, _data, coordinator) = setup();
        std::fs::write(corpus.path().join("note.md"), paragraph("alpha", 600)).unwrap();

        let shutdown = crate::coordinator::Shutdown::new();
        shutdown.trigger();
        let coordinator = coordinator.with_shutdown(shutdown);

        let report = coordinator.run_extraction(corpus.path(), false).await.unwrap();
        assert!(report.cancelled);
        assert!(!report.is_success());
        assert_eq!(coordinator.store().live_chunks().unwrap().len(), 0);
        assert!(!coordinator.store().load_run_state("test").unwrap().extraction.is_completed());
    }

    #[tokio::test]
    async fn test_missing_source_dir() {
        let (corpus, _data, coordinator) = setup();
        let missing = corpus.path().join("nope");
        assert!(coordinator.run_extraction(&missing, false).await.is_err());
    }
}

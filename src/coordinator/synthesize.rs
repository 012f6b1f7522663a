//! Phase 2: 청크 → QA

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use super::dataset::{write_dataset, DatasetFormat, DatasetRecord};
use super::{Coordinator, SynthesisReport, PROGRESS_EVERY};
use crate::knowledge::{Phase, PhaseState, PhaseStats};
use crate::synth::QaSynthesizer;

/// Phase 2 실행 옵션
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    /// 이번 실행에서 처리할 최대 청크 수
    pub limit: Option<usize>,
    /// 데이터셋 출력 경로
    pub output: PathBuf,
    pub format: DatasetFormat,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            limit: None,
            output: PathBuf::from("qa_dataset.jsonl"),
            format: DatasetFormat::Jsonl,
        }
    }
}

impl Coordinator {
    /// Phase 2 실행
    ///
    /// 이 run에서 아직 결과가 없는 살아있는 청크만 처리합니다.
    /// 대기 청크가 모두 처리되면 단계를 완료로 표시하고 데이터셋을 씁니다.
    pub async fn run_synthesis(
        &self,
        synthesizer: Arc<QaSynthesizer>,
        options: &SynthesisOptions,
    ) -> Result<SynthesisReport> {
        let mut report = SynthesisReport::new(&self.run_id);

        let run = self.store.load_run_state(&self.run_id)?;
        let mut pending = self.store.pending_chunks(&self.run_id)?;
        report.pending_before = pending.len();
        if let Some(limit) = options.limit {
            pending.truncate(limit);
        }

        let total = pending.len();
        tracing::info!(
            "Phase 2 started: {} pending chunks ({} this run, {} already attempted)",
            report.pending_before,
            total,
            run.attempted.len()
        );

        let mut phase = run.synthesis.start();
        self.store.save_phase(&self.run_id, Phase::Synthesis, &phase)?;

        let mut results = stream::iter(pending.into_iter().map(|chunk| {
            let synthesizer = synthesizer.clone();
            async move { synthesizer.synthesize(&chunk).await }
        }))
        .buffer_unordered(self.config.llm.concurrency.max(1));

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.wait() => {
                    tracing::warn!(
                        "Phase 2 interrupted after {}/{} chunks",
                        report.processed,
                        total
                    );
                    report.cancelled = true;
                    break;
                }

                next = results.next() => {
                    let Some(outcome) = next else { break };

                    for kind in &outcome.failures {
                        *report.attempt_failures.entry(*kind).or_default() += 1;
                    }

                    let checkpoint = phase.advance(&outcome.chunk_id);
                    if self
                        .store
                        .record_synthesis_outcome(&self.run_id, &outcome, &checkpoint)?
                    {
                        phase = checkpoint;
                        report.processed += 1;
                        if report.processed % PROGRESS_EVERY == 0 {
                            tracing::info!("Processed {}/{} chunks", report.processed, total);
                        }
                    }

                    if outcome.is_accepted() {
                        tracing::debug!(
                            "Chunk {} accepted: {} pairs after {} attempts",
                            outcome.chunk_id,
                            outcome.pairs.len(),
                            outcome.attempts
                        );
                    } else {
                        tracing::warn!(
                            "Chunk {} rejected after {} attempts: {}",
                            outcome.chunk_id,
                            outcome.attempts,
                            outcome.detail.as_deref().unwrap_or("unknown failure")
                        );
                    }
                }
            }
        }

        let run = self.store.load_run_state(&self.run_id)?;
        report.accepted = run.accepted;
        report.rejected = run.rejected;
        report.pairs = run.pairs;
        report.absorb_outcomes(&self.store.run_outcomes(&self.run_id)?);
        report.remaining = self.store.pending_chunks(&self.run_id)?.len();

        if !report.cancelled && report.remaining == 0 {
            let records: Vec<DatasetRecord> = self
                .store
                .accepted_pairs(&self.run_id)?
                .into_iter()
                .map(DatasetRecord::from)
                .collect();
            report.records_written = write_dataset(&options.output, &records, options.format)?;
            report.dataset_path = Some(options.output.clone());

            let phase = PhaseState::Completed {
                stats: PhaseStats {
                    units: run.accepted + run.rejected,
                    succeeded: run.accepted,
                    failed: run.rejected,
                    finished_at: Utc::now(),
                },
            };
            self.store.save_phase(&self.run_id, Phase::Synthesis, &phase)?;
            report.completed = true;
        }

        tracing::info!(
            "Phase 2 finished: {} accepted, {} rejected, {} pairs, conversion rate {:.2}, {} remaining",
            report.accepted,
            report.rejected,
            report.pairs,
            report.conversion_rate(),
            report.remaining
        );

        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! End-to-end pipeline tests
//!
//! Phase 1 on a temp corpus, Phase 2 against scripted LLMs, both on an on-disk store.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use secqa::coordinator::read_dataset;
use secqa::llm::Scripted;
use secqa::{
    ChunkStore, Coordinator, FailureKind, LlmClient, LlmConfig, LlmError, PipelineConfig,
    PromptTemplate, QaSynthesizer, ScriptedLlm, Shutdown, SynthesisOptions,
};

const SHORT: &str = "Use hashcat -m 1000 to crack NTLM password hashes.";

const VALID: &str = "Q: How does pass the hash authenticate?\nA: It reuses the NTLM hash directly instead of the plaintext password.";

fn long_document() -> String {
    [
        "Enumerate SMB shares on the domain controller with null sessions first. ",
        "Kerberoasting requests service tickets and cracks them offline later on. ",
        "Pass the hash reuses NTLM hashes to authenticate without the password. ",
    ]
    .iter()
    .map(|s| s.repeat(23).trim_end().to_string())
    .collect::<Vec<_>>()
    .join("\n\n")
}

fn config() -> PipelineConfig {
    PipelineConfig {
        enable_ocr: false,
        llm: LlmConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn write_corpus(dir: &Path) {
    std::fs::write(dir.join("short.txt"), SHORT).unwrap();
    std::fs::write(dir.join("broken.pdf"), b"this was never a pdf").unwrap();
    std::fs::write(dir.join("long.txt"), long_document()).unwrap();
}

fn coordinator(data: &TempDir, run_id: &str) -> Coordinator {
    let store = Arc::new(ChunkStore::open_in(data.path()).unwrap());
    Coordinator::new(store, config(), run_id)
}

fn synthesizer(llm: Arc<dyn LlmClient>) -> Arc<QaSynthesizer> {
    let config = config();
    Arc::new(QaSynthesizer::new(
        llm,
        PromptTemplate::default(),
        &config.llm,
        config.validation.clone(),
    ))
}

/// 프롬프트 내용으로만 응답을 정하는 LLM (처리 순서와 무관)
struct ContentLlm {
    calls: AtomicUsize,
}

impl ContentLlm {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for ContentLlm {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("Kerberoasting") {
            Ok("I am unable to produce pairs for this content.".to_string())
        } else {
            Ok(VALID.to_string())
        }
    }

    fn name(&self) -> &str {
        "content"
    }
}

// ============================================================================
// Phase 1
// ============================================================================

#[tokio::test]
async fn three_document_corpus() {
    let corpus = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    write_corpus(corpus.path());

    let coordinator = coordinator(&data, "default");
    let report = coordinator.run_extraction(corpus.path(), false).await.unwrap();

    assert_eq!(report.discovered, 3);
    assert_eq!(report.chunked, 2);
    assert_eq!(report.chunks_written, 4);
    assert_eq!(report.failures.get(&FailureKind::ExtractionFailure), Some(&1));
    assert_eq!(report.failure_count(), 1);
    assert!(report.is_success());

    let store = coordinator.store();

    let short = store
        .chunks_for(&corpus.path().join("short.txt").to_string_lossy())
        .unwrap();
    assert_eq!(short.len(), 1);
    assert_eq!(short[0].text, SHORT);

    let long = store
        .chunks_for(&corpus.path().join("long.txt").to_string_lossy())
        .unwrap();
    assert_eq!(long.len(), 3);
    for chunk in &long {
        assert!(chunk.char_len >= 200 && chunk.char_len <= 2000, "{}", chunk.char_len);
        assert!(!chunk.text.contains("\n\n"));
    }
    assert!(long[0].text.starts_with("Enumerate SMB"));
    assert!(long[1].text.starts_with("Kerberoasting"));
    assert!(long[2].text.starts_with("Pass the hash"));

    let broken = store
        .chunks_for(&corpus.path().join("broken.pdf").to_string_lossy())
        .unwrap();
    assert!(broken.is_empty());
}

#[tokio::test]
async fn rerun_on_unchanged_corpus_is_idempotent() {
    let corpus = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    write_corpus(corpus.path());

    let coordinator = coordinator(&data, "default");
    coordinator.run_extraction(corpus.path(), false).await.unwrap();
    let before = coordinator.store().live_chunks().unwrap();

    let report = coordinator.run_extraction(corpus.path(), false).await.unwrap();
    assert_eq!(report.skipped, 3);
    assert_eq!(report.chunked, 0);
    assert_eq!(report.failure_count(), 0);

    let after = coordinator.store().live_chunks().unwrap();
    let ids = |chunks: &[secqa::Chunk]| chunks.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&before), ids(&after));
    assert_eq!(coordinator.store().stats().unwrap().superseded_chunks, 0);
}

#[tokio::test]
async fn forced_rerun_keeps_chunk_ids() {
    let corpus = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    write_corpus(corpus.path());

    let coordinator = coordinator(&data, "default");
    coordinator.run_extraction(corpus.path(), false).await.unwrap();
    let before = coordinator.store().live_chunks().unwrap();

    let report = coordinator.run_extraction(corpus.path(), true).await.unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(report.chunked, 2);

    let after = coordinator.store().live_chunks().unwrap();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.text, b.text);
    }
}

// ============================================================================
// Phase 2
// ============================================================================

#[tokio::test]
async fn interrupted_synthesis_matches_uninterrupted_run() {
    let corpus = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    write_corpus(corpus.path());
    coordinator(&data, "default")
        .run_extraction(corpus.path(), false)
        .await
        .unwrap();

    // 중단 없이 한 번에
    let full = coordinator(&data, "full");
    let full_report = full
        .run_synthesis(
            synthesizer(Arc::new(ContentLlm::new())),
            &SynthesisOptions {
                output: data.path().join("full.jsonl"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(full_report.completed);
    assert_eq!((full_report.accepted, full_report.rejected), (3, 1));
    assert_eq!(full_report.conversion_rate(), 0.75);

    // 시작 직후 중단
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let cancelled = coordinator(&data, "resumed")
        .with_shutdown(shutdown)
        .run_synthesis(
            synthesizer(Arc::new(ContentLlm::new())),
            &SynthesisOptions::default(),
        )
        .await
        .unwrap();
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.processed, 0);

    // 두 청크 처리 후 멈춤
    let output = data.path().join("resumed.jsonl");
    let partial = coordinator(&data, "resumed")
        .run_synthesis(
            synthesizer(Arc::new(ContentLlm::new())),
            &SynthesisOptions {
                limit: Some(2),
                output: output.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(partial.processed, 2);
    assert_eq!(partial.remaining, 2);
    assert!(!output.exists());

    // 재개
    let llm = Arc::new(ContentLlm::new());
    let resumed = coordinator(&data, "resumed")
        .run_synthesis(
            synthesizer(llm.clone()),
            &SynthesisOptions {
                output: output.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(resumed.completed);
    assert_eq!(resumed.processed, 2);
    assert_eq!(
        (resumed.accepted, resumed.rejected, resumed.pairs),
        (full_report.accepted, full_report.rejected, full_report.pairs)
    );
    assert_eq!(
        read_dataset(&output).unwrap().len(),
        read_dataset(&data.path().join("full.jsonl")).unwrap().len()
    );

    let state = coordinator(&data, "resumed")
        .store()
        .load_run_state("resumed")
        .unwrap();
    assert_eq!(state.attempted.len(), 4);
    assert!(state.synthesis.is_completed());
}

#[tokio::test]
async fn changed_source_separates_live_counts() {
    let corpus = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let path = corpus.path().join("short.txt");
    std::fs::write(&path, SHORT).unwrap();

    let coordinator = coordinator(&data, "default");
    coordinator.run_extraction(corpus.path(), false).await.unwrap();

    let output = data.path().join("dataset.jsonl");
    let options = SynthesisOptions {
        output: output.clone(),
        ..Default::default()
    };
    let llm = ScriptedLlm::new().with_default_reply(VALID);
    coordinator
        .run_synthesis(synthesizer(Arc::new(llm.clone())), &options)
        .await
        .unwrap();

    std::fs::write(&path, "Use john --format=nt to crack NTLM hashes offline.").unwrap();
    coordinator.run_extraction(corpus.path(), false).await.unwrap();

    let report = coordinator
        .run_synthesis(synthesizer(Arc::new(llm.clone())), &options)
        .await
        .unwrap();

    assert!(report.completed);
    assert_eq!(report.processed, 1);
    assert_eq!((report.accepted, report.pairs), (2, 2));
    assert_eq!((report.live_accepted, report.live_pairs), (1, 1));
    assert_eq!(report.superseded_outcomes, 1);
    assert_eq!(report.records_written, report.live_pairs);
    assert_eq!(read_dataset(&output).unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_twice_then_valid() {
    let corpus = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(corpus.path().join("short.txt"), SHORT).unwrap();

    let coordinator = coordinator(&data, "default");
    coordinator.run_extraction(corpus.path(), false).await.unwrap();

    let llm = ScriptedLlm::new();
    llm.push(Scripted::Reply("no pairs here".to_string()));
    llm.push(Scripted::Reply("Q: dangling question without an answer".to_string()));
    llm.push(Scripted::Reply(VALID.to_string()));

    let output = data.path().join("dataset.jsonl");
    let report = coordinator
        .run_synthesis(
            synthesizer(Arc::new(llm.clone())),
            &SynthesisOptions {
                output: output.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(llm.calls(), 3);
    assert_eq!((report.accepted, report.rejected, report.pairs), (1, 0, 1));
    assert_eq!(report.attempt_failures.get(&FailureKind::SynthesisParseFailure), Some(&2));

    let records = read_dataset(&output).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 3);
    assert_eq!(records[0].question, "How does pass the hash authenticate?");
}

#[tokio::test]
async fn retry_budget_exhaustion_rejects_chunk() {
    let corpus = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(corpus.path().join("short.txt"), SHORT).unwrap();

    let coordinator = coordinator(&data, "default");
    coordinator.run_extraction(corpus.path(), false).await.unwrap();

    let llm = ScriptedLlm::new();
    llm.push(Scripted::Unreachable);
    llm.push(Scripted::Reply("garbled".to_string()));
    llm.push(Scripted::Unreachable);
    llm.push(Scripted::Reply(VALID.to_string()));

    let report = coordinator
        .run_synthesis(
            synthesizer(Arc::new(llm.clone())),
            &SynthesisOptions {
                output: data.path().join("dataset.jsonl"),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(llm.calls(), 3);
    assert_eq!((report.accepted, report.rejected), (0, 1));
    assert_eq!(report.remaining, 0);
    assert_eq!(
        report.rejections.get(&FailureKind::SynthesisTransportFailure),
        Some(&1)
    );
    assert_eq!(report.records_written, 0);

    // 다시 실행해도 같은 청크를 재시도하지 않음
    let again = coordinator
        .run_synthesis(
            synthesizer(Arc::new(llm.clone())),
            &SynthesisOptions {
                output: data.path().join("dataset.jsonl"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(llm.calls(), 3);
    assert_eq!((again.accepted, again.rejected), (0, 1));
}

//! CLI 모듈
//!
//! secqa CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::collector::FileType;
use crate::config::PipelineConfig;
use crate::coordinator::{
    read_dataset, Coordinator, DatasetFormat, DatasetRecord, DatasetSummary, ExtractionReport,
    FormatBreakdown, Shutdown, SynthesisOptions, SynthesisReport, DEFAULT_RUN_ID,
};
use crate::extractor::backend_from_config;
use crate::knowledge::{get_data_dir, ChunkStore, PhaseState};
use crate::llm::OllamaClient;
use crate::synth::{PromptTemplate, QaSynthesizer};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "secqa")]
#[command(version, about = "보안 자료를 QA 파인튜닝 데이터셋으로 변환", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: ~/.local/share/.secqa)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON 설정 파일
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Phase 1: 소스 폴더의 문서를 청크로 변환
    Extract(ExtractArgs),

    /// Phase 2: 청크를 로컬 LLM으로 QA 쌍 변환
    Synthesize(SynthesizeArgs),

    /// 저장소 및 실행 상태 확인
    Status {
        /// 실행 ID (생략 시 전체)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// 데이터셋 품질 요약
    Stats {
        /// 데이터셋 파일 (생략 시 저장소의 채택 쌍)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// 실행 ID
        #[arg(long, default_value = DEFAULT_RUN_ID)]
        run_id: String,
    },

    /// OCR 백엔드와 LLM 엔드포인트 점검
    Check {
        /// Ollama 주소
        #[arg(long)]
        endpoint: Option<String>,

        /// 모델 이름
        #[arg(short, long)]
        model: Option<String>,
    },

    /// 실행 상태 초기화
    Reset {
        /// 초기화할 실행 ID
        #[arg(long, default_value = DEFAULT_RUN_ID)]
        run_id: String,

        /// 청크 저장소까지 전부 삭제
        #[arg(long)]
        all: bool,

        /// 확인 없이 실행
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args)]
pub struct ExtractArgs {
    /// 소스 폴더 경로 (재귀)
    pub source_dir: PathBuf,

    /// 최소 청크 크기 (문자 수)
    #[arg(long)]
    pub min_chunk_chars: Option<usize>,

    /// 최대 청크 크기 (문자 수)
    #[arg(long)]
    pub max_chunk_chars: Option<usize>,

    /// OCR 끄기 (이미지는 OcrUnavailable로 기록)
    #[arg(long)]
    pub no_ocr: bool,

    /// 처리할 포맷 (쉼표 구분: text,pdf,image,code)
    #[arg(long, value_delimiter = ',')]
    pub formats: Option<Vec<String>>,

    /// 변경되지 않은 문서도 다시 청킹
    #[arg(long)]
    pub force: bool,

    /// 동시 처리 문서 수
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// 실행 ID
    #[arg(long, default_value = DEFAULT_RUN_ID)]
    pub run_id: String,
}

#[derive(Args)]
pub struct SynthesizeArgs {
    /// Ollama 주소
    #[arg(long)]
    pub endpoint: Option<String>,

    /// 모델 이름
    #[arg(short, long)]
    pub model: Option<String>,

    /// 실행 ID
    #[arg(long, default_value = DEFAULT_RUN_ID)]
    pub run_id: String,

    /// 데이터셋 출력 경로
    #[arg(short, long, default_value = "qa_dataset.jsonl")]
    pub output: PathBuf,

    /// 출력 포맷
    #[arg(long, value_enum, default_value_t = DatasetFormat::Jsonl)]
    pub format: DatasetFormat,

    /// 동시 LLM 요청 수
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// 청크당 최대 LLM 호출 횟수
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// 이번 실행에서 처리할 최대 청크 수
    #[arg(long)]
    pub limit: Option<usize>,

    /// 프롬프트 템플릿 파일 ({content} 자리표시자 필수)
    #[arg(long)]
    pub template: Option<PathBuf>,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(get_data_dir);
    let config_path = cli.config;

    match cli.command {
        Commands::Extract(args) => cmd_extract(&data_dir, config_path.as_deref(), args).await,
        Commands::Synthesize(args) => {
            cmd_synthesize(&data_dir, config_path.as_deref(), args).await
        }
        Commands::Status { run_id } => cmd_status(&data_dir, run_id.as_deref()),
        Commands::Stats { input, run_id } => cmd_stats(&data_dir, input.as_deref(), &run_id),
        Commands::Check { endpoint, model } => {
            cmd_check(config_path.as_deref(), endpoint, model).await
        }
        Commands::Reset { run_id, all, yes } => cmd_reset(&data_dir, &run_id, all, yes),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Phase 1 명령어 (extract)
///
/// 소스 폴더를 수집하여 청크 저장소를 갱신합니다.
/// 미해결 문서가 남으면 오류로 종료하며, 다시 실행하면 이어서 처리합니다.
async fn cmd_extract(data_dir: &Path, config_path: Option<&Path>, args: ExtractArgs) -> Result<()> {
    let mut config = PipelineConfig::load_or_default(config_path)?;
    if let Some(min) = args.min_chunk_chars {
        config.min_chunk_chars = min;
    }
    if let Some(max) = args.max_chunk_chars {
        config.max_chunk_chars = max;
    }
    if args.no_ocr {
        config.enable_ocr = false;
    }
    if let Some(formats) = args.formats {
        config.formats = parse_formats(&formats)?;
    }
    if let Some(n) = args.concurrency {
        config.extract_concurrency = n;
    }
    config.validate()?;

    let store = Arc::new(ChunkStore::open_in(data_dir).context("청크 저장소 열기 실패")?);

    println!("[*] 소스 폴더: {}", args.source_dir.display());
    println!(
        "    청크 크기: {}-{} 문자, OCR: {}",
        config.min_chunk_chars,
        config.max_chunk_chars,
        if config.enable_ocr { "사용" } else { "사용 안 함" }
    );
    if args.force {
        println!("[!] --force: 변경되지 않은 문서도 다시 청킹합니다.");
    }

    let shutdown = Shutdown::new();
    shutdown.listen_ctrl_c();

    let coordinator = Coordinator::new(store, config, args.run_id).with_shutdown(shutdown);
    let report = coordinator
        .run_extraction(&args.source_dir, args.force)
        .await
        .context("Phase 1 실패")?;

    print_extraction_report(&report);

    if report.cancelled {
        bail!("중단됨 - 다시 실행하면 마지막 체크포인트부터 이어서 처리합니다");
    }
    if !report.unresolved.is_empty() {
        bail!(
            "미해결 문서 {} 개 - 다시 실행하면 이어서 처리합니다",
            report.unresolved.len()
        );
    }

    Ok(())
}

/// Phase 2 명령어 (synthesize)
///
/// 대기 청크를 로컬 LLM으로 QA 쌍으로 변환하고, 모두 처리되면 데이터셋을 씁니다.
async fn cmd_synthesize(
    data_dir: &Path,
    config_path: Option<&Path>,
    args: SynthesizeArgs,
) -> Result<()> {
    let mut config = PipelineConfig::load_or_default(config_path)?;
    if let Some(endpoint) = args.endpoint {
        config.llm.endpoint = endpoint;
    }
    if let Some(model) = args.model {
        config.llm.model = model;
    }
    if let Some(n) = args.concurrency {
        config.llm.concurrency = n;
    }
    if let Some(n) = args.max_attempts {
        config.llm.max_attempts = n;
    }
    if let Some(template) = args.template {
        config.llm.template_path = Some(template);
    }
    config.validate()?;

    let template = PromptTemplate::load_or_default(config.llm.template_path.as_deref())?;

    // 엔드포인트 / 모델 확인
    let client = OllamaClient::from_config(&config.llm)?;
    println!("[*] LLM: {} ({})", client.model(), client.endpoint());

    let health = client
        .health_check()
        .await
        .with_context(|| format!("LLM 엔드포인트에 연결할 수 없습니다: {}", client.endpoint()))?;
    if !health.model_present {
        bail!(
            "모델 '{}'이 설치되어 있지 않습니다.\n\n\
             설치된 모델: {}\n\
             설치: ollama pull {}",
            health.model,
            if health.available_models.is_empty() {
                "-".to_string()
            } else {
                health.available_models.join(", ")
            },
            health.model
        );
    }
    println!("[OK] 모델 확인됨");

    let store = Arc::new(ChunkStore::open_in(data_dir).context("청크 저장소 열기 실패")?);
    let synthesizer = Arc::new(QaSynthesizer::new(
        Arc::new(client),
        template,
        &config.llm,
        config.validation.clone(),
    ));

    let shutdown = Shutdown::new();
    shutdown.listen_ctrl_c();

    let options = SynthesisOptions {
        limit: args.limit,
        output: args.output,
        format: args.format,
    };
    let coordinator = Coordinator::new(store, config, args.run_id).with_shutdown(shutdown);
    let report = coordinator
        .run_synthesis(synthesizer, &options)
        .await
        .context("Phase 2 실패")?;

    print_synthesis_report(&report);

    if !report.is_success() {
        bail!("중단됨 - 다시 실행하면 남은 청크부터 이어서 처리합니다");
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(data_dir: &Path, run_id: Option<&str>) -> Result<()> {
    println!("secqa v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    let store = ChunkStore::open_in(data_dir).context("청크 저장소 열기 실패")?;
    let stats = store.stats().context("통계 조회 실패")?;

    println!(
        "[OK] 문서: {} 건 (청킹 {}, 실패 {}, 미해결 {})",
        stats.document_count,
        stats.chunked_documents,
        stats.failed_documents,
        stats.unresolved_documents
    );
    println!(
        "[OK] 청크: {} 개 (이전 세대 {})",
        stats.live_chunks, stats.superseded_chunks
    );
    println!("[OK] QA 쌍: {} 개", stats.qa_pairs);

    let run_ids = match run_id {
        Some(id) => vec![id.to_string()],
        None => store.run_ids()?,
    };

    if run_ids.is_empty() {
        println!("[!] 기록된 실행이 없습니다.");
        return Ok(());
    }

    for id in run_ids {
        let state = store.load_run_state(&id)?;
        let pending = store.pending_chunks(&id)?.len();

        println!();
        println!("  실행: {}", id);
        println!("    Phase 1: {}", describe_phase(&state.extraction));
        println!("    Phase 2: {}", describe_phase(&state.synthesis));
        println!(
            "    채택 {} / 거부 {} / 대기 {} (QA 쌍 {}, 변환율 {:.2})",
            state.accepted,
            state.rejected,
            pending,
            state.pairs,
            state.conversion_rate()
        );
        let superseded = store.run_outcomes(&id)?.iter().filter(|r| r.superseded).count();
        if superseded > 0 {
            println!("    대체된 청크 결과 {} 건 (데이터셋에서 제외)", superseded);
        }
        if let Some(ts) = state.last_checkpoint {
            println!("    마지막 체크포인트: {}", ts.format("%Y-%m-%d %H:%M:%S"));
        }
    }

    Ok(())
}

/// 통계 명령어 (stats)
fn cmd_stats(data_dir: &Path, input: Option<&Path>, run_id: &str) -> Result<()> {
    let records: Vec<DatasetRecord> = match input {
        Some(path) => read_dataset(path)?,
        None => {
            let store = ChunkStore::open_in(data_dir).context("청크 저장소 열기 실패")?;
            store
                .accepted_pairs(run_id)?
                .into_iter()
                .map(DatasetRecord::from)
                .collect()
        }
    };

    if records.is_empty() {
        println!("[!] QA 쌍이 없습니다.");
        return Ok(());
    }

    let summary = DatasetSummary::from_records(&records);
    println!("[OK] 데이터셋 요약");
    println!("    QA 쌍: {} 개 (청크 {} 개)", summary.total_pairs, summary.unique_chunks);
    println!("    평균 질문 길이: {:.1} 문자", summary.avg_question_chars);
    println!("    평균 답변 길이: {:.1} 문자", summary.avg_answer_chars);
    println!();
    println!("    문서 종류별:");
    for (doc_type, count) in &summary.by_doc_type {
        println!("      {:<16} {}", doc_type.as_str(), count);
    }

    Ok(())
}

/// 점검 명령어 (check)
async fn cmd_check(
    config_path: Option<&Path>,
    endpoint: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let mut config = PipelineConfig::load_or_default(config_path)?;
    if let Some(endpoint) = endpoint {
        config.llm.endpoint = endpoint;
    }
    if let Some(model) = model {
        config.llm.model = model;
    }
    config.validate()?;

    // OCR
    if config.enable_ocr {
        let backend = backend_from_config(&config);
        if backend.is_available().await {
            println!("[OK] OCR: {} 사용 가능", backend.name());
        } else {
            println!("[!] OCR: {} 사용 불가 (이미지는 OcrUnavailable로 기록됩니다)", backend.name());
        }
    } else {
        println!("[!] OCR: 비활성화됨");
    }

    // LLM
    let client = OllamaClient::from_config(&config.llm)?;
    match client.health_check().await {
        Ok(health) => {
            println!("[OK] LLM 엔드포인트: {}", health.endpoint);
            if health.model_present {
                println!("[OK] 모델: {}", health.model);
            } else {
                println!("[!] 모델 '{}' 미설치", health.model);
                println!("    설치: ollama pull {}", health.model);
            }
        }
        Err(e) => {
            println!("[!] LLM 엔드포인트 연결 실패: {}", e);
            println!("    실행: ollama serve");
        }
    }

    Ok(())
}

/// 초기화 명령어 (reset)
fn cmd_reset(data_dir: &Path, run_id: &str, all: bool, yes: bool) -> Result<()> {
    if !yes {
        bail!("초기화는 되돌릴 수 없습니다. --yes 로 확인하세요");
    }

    let store = ChunkStore::open_in(data_dir).context("청크 저장소 열기 실패")?;

    if all {
        store.reset_all()?;
        println!("[OK] 청크 저장소와 모든 실행 상태를 삭제했습니다.");
    } else {
        let discarded = store.reset_run(run_id)?;
        println!("[OK] 실행 '{}' 초기화 (결과 {} 개 삭제)", run_id, discarded);
    }

    Ok(())
}

// ============================================================================
// Report Output
// ============================================================================

fn print_extraction_report(report: &ExtractionReport) {
    println!();
    println!(
        "[OK] Phase 1 완료: 문서 {} (청킹 {}, 건너뜀 {}, 실패 {})",
        report.discovered,
        report.chunked,
        report.skipped,
        report.failure_count()
    );
    println!("    생성된 청크: {}", report.chunks_written);

    for (kind, count) in &report.failures {
        println!("    실패 [{}]: {}", kind, count);
    }
    print_breakdown(&report.per_format, "청크");

    if !report.unresolved.is_empty() {
        println!();
        println!("[!] 미해결 문서 ({} 개):", report.unresolved.len());
        for path in &report.unresolved {
            println!("    {}", path);
        }
    }
}

fn print_synthesis_report(report: &SynthesisReport) {
    println!();
    println!(
        "[OK] Phase 2: 이번 실행 {} 청크 처리, 대기 {} 청크",
        report.processed, report.remaining
    );
    println!(
        "    채택 {} / 거부 {} (QA 쌍 {})",
        report.accepted, report.rejected, report.pairs
    );
    println!("    변환율: {:.2}", report.conversion_rate());
    if report.superseded_outcomes > 0 {
        println!(
            "    현재 청크 기준: 채택 {} (QA 쌍 {}), 대체된 청크 결과 {} 건은 데이터셋에서 제외",
            report.live_accepted, report.live_pairs, report.superseded_outcomes
        );
    }

    for (kind, count) in &report.rejections {
        println!("    거부 [{}]: {}", kind, count);
    }
    for (kind, count) in &report.attempt_failures {
        println!("    시도 실패 [{}]: {}", kind, count);
    }
    print_breakdown(&report.per_format, "QA");

    match &report.dataset_path {
        Some(path) => println!(
            "[OK] 데이터셋: {} ({} 레코드)",
            path.display(),
            report.records_written
        ),
        None if report.remaining > 0 => {
            println!("[*] 대기 청크가 남아 있어 데이터셋은 아직 쓰지 않았습니다.")
        }
        None => {}
    }
}

fn print_breakdown(per_format: &std::collections::BTreeMap<FileType, FormatBreakdown>, produced: &str) {
    if per_format.is_empty() {
        return;
    }
    println!("    포맷별:");
    for (file_type, b) in per_format {
        println!(
            "      {:<6} 단위 {:>5} | 성공 {:>5} | 실패 {:>5} | {} {:>6}",
            format_label(*file_type),
            b.units,
            b.succeeded,
            b.failed,
            produced,
            b.produced
        );
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 포맷 목록 파싱
fn parse_formats(values: &[String]) -> Result<std::collections::BTreeSet<FileType>> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| {
            FileType::parse(v).with_context(|| {
                format!("알 수 없는 포맷: '{}' (text, pdf, image, code 중 선택)", v)
            })
        })
        .collect()
}

/// 포맷 표시 라벨
fn format_label(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Text => "TXT",
        FileType::Pdf => "PDF",
        FileType::Image => "IMG",
        FileType::Code => "CODE",
    }
}

/// 단계 상태 설명
fn describe_phase(state: &PhaseState) -> String {
    match state {
        PhaseState::NotStarted => "시작 전".to_string(),
        PhaseState::InProgress { checkpoint } => format!(
            "진행 중 ({} 단위 완료, 마지막: {})",
            checkpoint.units_done,
            checkpoint
                .last_unit
                .as_deref()
                .map(|u| truncate_text(u, 60))
                .unwrap_or_else(|| "-".to_string())
        ),
        PhaseState::Completed { stats } => format!(
            "완료 (단위 {}, 성공 {}, 실패 {}, {})",
            stats.units,
            stats.succeeded,
            stats.failed,
            stats.finished_at.format("%Y-%m-%d %H:%M")
        ),
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

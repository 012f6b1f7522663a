//! 파이프라인 설정
//!
//! JSON 설정 파일(`--config`)에서 읽고, CLI 플래그가 있으면 덮어씁니다.
//! 모든 필드에 기본값이 있으므로 빈 `{}`도 유효한 설정입니다.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::collector::FileType;

// ============================================================================
// Pipeline Config
// ============================================================================

/// 전체 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 최소 청크 크기 (문자 수)
    pub min_chunk_chars: usize,
    /// 최대 청크 크기 (문자 수)
    pub max_chunk_chars: usize,
    /// OCR 사용 여부
    pub enable_ocr: bool,
    /// 처리할 포맷
    pub formats: BTreeSet<FileType>,
    /// 의미 있는 문자 최소 비율 (이하면 청킹 거부)
    pub min_meaningful_ratio: f64,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 문서 하나의 추출 타임아웃 (초)
    pub extract_timeout_secs: u64,
    /// Phase 1 동시 처리 문서 수
    pub extract_concurrency: usize,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    pub validation: ValidationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 200,
            max_chunk_chars: 2000,
            enable_ocr: true,
            formats: FileType::ALL.into_iter().collect(),
            min_meaningful_ratio: 0.6,
            max_file_size: 32 * 1024 * 1024,
            include_hidden: false,
            respect_gitignore: true,
            extract_timeout_secs: 120,
            extract_concurrency: 4,
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// JSON 파일에서 설정 로드
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// 경로가 주어지면 로드, 아니면 기본값
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_chars == 0 {
            bail!("max_chunk_chars must be greater than 0");
        }
        if self.min_chunk_chars > self.max_chunk_chars {
            bail!(
                "min_chunk_chars ({}) must not exceed max_chunk_chars ({})",
                self.min_chunk_chars,
                self.max_chunk_chars
            );
        }
        if !(0.0..=1.0).contains(&self.min_meaningful_ratio) {
            bail!(
                "min_meaningful_ratio must be within [0, 1], got {}",
                self.min_meaningful_ratio
            );
        }
        if self.formats.is_empty() {
            bail!("formats must name at least one format");
        }
        if self.extract_concurrency == 0 || self.llm.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.llm.max_attempts == 0 {
            bail!("llm.max_attempts must be at least 1");
        }
        if self.validation.min_question_chars > self.validation.max_question_chars
            || self.validation.min_answer_chars > self.validation.max_answer_chars
        {
            bail!("validation minimum lengths must not exceed maximum lengths");
        }
        url::Url::parse(&self.llm.endpoint)
            .with_context(|| format!("Invalid LLM endpoint: {}", self.llm.endpoint))?;
        Ok(())
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

// ============================================================================
// OCR Config
// ============================================================================

/// OCR 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackendKind {
    /// 로컬 tesseract 바이너리
    Tesseract,
    /// Ollama 비전 모델
    Vision,
}

/// OCR 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub backend: OcrBackendKind,
    pub tesseract_cmd: PathBuf,
    pub language: String,
    pub vision_model: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackendKind::Tesseract,
            tesseract_cmd: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            vision_model: "llava".to_string(),
        }
    }
}

// ============================================================================
// LLM Config
// ============================================================================

/// 로컬 LLM 엔드포인트 및 재시도 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama 주소
    pub endpoint: String,
    /// 모델 이름
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_p: f32,
    /// 동시 요청 수 (로컬 모델은 보통 1)
    pub concurrency: usize,
    /// 청크당 최대 LLM 호출 횟수
    pub max_attempts: u32,
    /// 전송 실패 시 초기 백오프 (ms)
    pub retry_backoff_ms: u64,
    /// 외부 프롬프트 템플릿 파일
    pub template_path: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "deepseek-r1:32b".to_string(),
            timeout_secs: 120,
            temperature: 0.3,
            top_p: 0.9,
            concurrency: 1,
            max_attempts: 3,
            retry_backoff_ms: 2000,
            template_path: None,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ============================================================================
// Validation Config
// ============================================================================

/// QA 쌍 검증 기준
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_question_chars: usize,
    pub min_answer_chars: usize,
    pub max_question_chars: usize,
    pub max_answer_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_question_chars: 10,
            min_answer_chars: 20,
            max_question_chars: 1000,
            max_answer_chars: 8000,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

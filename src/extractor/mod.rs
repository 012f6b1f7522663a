//! 콘텐츠 추출 모듈
//!
//! 포맷별 추출기가 하나의 `Extractor` 트레이트 뒤에 있습니다.
//! - 텍스트 / 코드: 직접 읽기 + 공백 정규화
//! - PDF: pdf-extract로 페이지별 추출, 페이지 경계를 메타데이터로 보존
//! - 이미지: OCR 백엔드 (tesseract 또는 Ollama 비전 모델)
//!
//! 추출기는 파일을 읽기만 하며 아무것도 쓰지 않습니다.

pub mod image;
pub mod pdf;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::collector::{FileType, SourceDocument};
use crate::config::PipelineConfig;
use crate::error::ExtractError;

pub use image::{backend_from_config, ImageExtractor, OcrBackend, OcrOutput, TesseractOcr, VisionOcr};
pub use pdf::PdfExtractor;

// ============================================================================
// Extracted Content
// ============================================================================

/// 추출 결과 (정규화된 텍스트 + 메타데이터)
#[derive(Debug, Clone)]
pub struct Extracted {
    /// 정규화된 텍스트
    pub text: String,
    pub metadata: ExtractionMetadata,
}

/// PDF 페이지가 정규화 텍스트에서 차지하는 바이트 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    /// 페이지 번호 (1부터 시작)
    pub number: usize,
    pub start: usize,
    pub end: usize,
}

/// 추출 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// 사용한 추출기 ("text", "code", "pdf", "ocr:tesseract" ...)
    pub extractor: String,
    /// 문서 제목
    pub title: Option<String>,
    /// 페이지 경계 (PDF)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageSpan>,
    /// 총 페이지 수 (PDF)
    pub total_pages: Option<usize>,
    /// OCR 평균 신뢰도 (0.0 ~ 1.0)
    pub ocr_confidence: Option<f32>,
    /// 코드 언어 (확장자)
    pub language: Option<String>,
}

impl ExtractionMetadata {
    /// 바이트 오프셋이 속한 페이지 번호
    pub fn page_at(&self, offset: usize) -> Option<usize> {
        self.pages
            .iter()
            .find(|p| offset >= p.start && offset < p.end)
            .or_else(|| self.pages.iter().rev().find(|p| offset >= p.start))
            .map(|p| p.number)
    }
}

// ============================================================================
// Extractor Trait
// ============================================================================

/// 포맷별 추출기
#[async_trait]
pub trait Extractor: Send + Sync {
    /// 담당 포맷
    fn file_type(&self) -> FileType;

    /// 파일에서 텍스트와 메타데이터 추출
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError>;
}

/// 파일 전체 읽기 (I/O 실패는 Unreadable)
pub(crate) async fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ExtractError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
}

// ============================================================================
// Text / Code Extractors
// ============================================================================

/// 평문 텍스트 추출기
pub struct TextExtractor;

#[async_trait]
impl Extractor for TextExtractor {
    fn file_type(&self) -> FileType {
        FileType::Text
    }

    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let bytes = read_bytes(path).await?;
        let text = normalize_whitespace(&String::from_utf8_lossy(&bytes));

        Ok(Extracted {
            text,
            metadata: ExtractionMetadata {
                extractor: "text".to_string(),
                ..Default::default()
            },
        })
    }
}

/// 소스 코드 추출기 (들여쓰기 보존)
pub struct CodeExtractor;

#[async_trait]
impl Extractor for CodeExtractor {
    fn file_type(&self) -> FileType {
        FileType::Code
    }

    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let bytes = read_bytes(path).await?;
        let text = normalize_whitespace(&String::from_utf8_lossy(&bytes));
        let language = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        Ok(Extracted {
            text,
            metadata: ExtractionMetadata {
                extractor: "code".to_string(),
                language,
                ..Default::default()
            },
        })
    }
}

// ============================================================================
// Content Extractor (registry)
// ============================================================================

/// 포맷 감지 결과에 따라 추출기를 선택하는 레지스트리
pub struct ContentExtractor {
    extractors: HashMap<FileType, Arc<dyn Extractor>>,
}

impl ContentExtractor {
    /// 빈 레지스트리
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// 설정으로 기본 추출기 구성
    pub fn from_config(config: &PipelineConfig) -> Self {
        let ocr = if config.enable_ocr {
            Some(image::backend_from_config(config))
        } else {
            None
        };

        Self::empty()
            .with_extractor(Arc::new(TextExtractor))
            .with_extractor(Arc::new(CodeExtractor))
            .with_extractor(Arc::new(PdfExtractor))
            .with_extractor(Arc::new(ImageExtractor::new(ocr)))
    }

    /// 추출기 등록 (같은 포맷이면 교체)
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(extractor.file_type(), extractor);
        self
    }

    /// 문서에서 콘텐츠 추출
    pub async fn extract(&self, doc: &SourceDocument) -> Result<Extracted, ExtractError> {
        let extractor = self
            .extractors
            .get(&doc.file_type)
            .ok_or_else(|| ExtractError::Unsupported(doc.file_type.to_string()))?;

        let mut extracted = extractor.extract(&doc.path).await?;
        if extracted.metadata.title.is_none() {
            extracted.metadata.title = Some(doc.title());
        }

        Ok(extracted)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 공백 정규화
///
/// CRLF → LF, 줄 끝 공백 제거, 3줄 이상 연속 빈 줄을 빈 줄 하나로 축약.
/// 줄 앞 들여쓰기와 탭은 그대로 둡니다.
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim_matches('\n').to_string()
}

// ============================================================================
// Tests
// ============================================================================

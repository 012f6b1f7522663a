//! 이미지 텍스트 추출 모듈 (OCR)
//!
//! OCR은 선택 기능입니다. 백엔드가 없으면 이미지 문서는 `OcrUnavailable`로
//! 기록되며, 빈 텍스트로 조용히 넘어가지 않습니다.
//!
//! - `TesseractOcr`: 로컬 tesseract 바이너리 (TSV 출력으로 신뢰도 계산)
//! - `VisionOcr`: Ollama 비전 모델에 base64 이미지를 전송

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::{normalize_whitespace, read_bytes, Extracted, ExtractionMetadata, Extractor};
use crate::collector::FileType;
use crate::config::{OcrBackendKind, PipelineConfig};
use crate::error::ExtractError;

// ============================================================================
// OCR Backend Trait
// ============================================================================

/// OCR 결과
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// 평균 신뢰도 (0.0 ~ 1.0), 백엔드가 제공하지 않으면 None
    pub confidence: Option<f32>,
}

/// OCR 백엔드
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// 백엔드 이름 ("tesseract", "vision")
    fn name(&self) -> &str;

    /// 백엔드 사용 가능 여부
    async fn is_available(&self) -> bool;

    /// 이미지에서 텍스트 인식
    async fn recognize(&self, path: &Path) -> Result<OcrOutput, ExtractError>;
}

/// 설정으로 OCR 백엔드 생성
pub fn backend_from_config(config: &PipelineConfig) -> Arc<dyn OcrBackend> {
    match config.ocr.backend {
        OcrBackendKind::Tesseract => Arc::new(TesseractOcr::new(
            config.ocr.tesseract_cmd.clone(),
            config.ocr.language.clone(),
        )),
        OcrBackendKind::Vision => Arc::new(VisionOcr::new(
            &config.llm.endpoint,
            config.ocr.vision_model.clone(),
            config.llm.timeout(),
        )),
    }
}

// ============================================================================
// Image Extractor
// ============================================================================

/// 이미지 추출기
pub struct ImageExtractor {
    backend: Option<Arc<dyn OcrBackend>>,
}

impl ImageExtractor {
    /// `backend`가 None이면 OCR 비활성
    pub fn new(backend: Option<Arc<dyn OcrBackend>>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Extractor for ImageExtractor {
    fn file_type(&self) -> FileType {
        FileType::Image
    }

    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| ExtractError::OcrUnavailable("OCR disabled".to_string()))?;

        if !backend.is_available().await {
            return Err(ExtractError::OcrUnavailable(format!(
                "{} backend not available",
                backend.name()
            )));
        }

        let output = backend.recognize(path).await?;
        if output.text.trim().is_empty() {
            tracing::warn!("No text extracted from image: {:?}", path);
        }

        Ok(Extracted {
            text: normalize_whitespace(&output.text),
            metadata: ExtractionMetadata {
                extractor: format!("ocr:{}", backend.name()),
                ocr_confidence: output.confidence,
                ..Default::default()
            },
        })
    }
}

// ============================================================================
// Tesseract
// ============================================================================

/// tesseract CLI 백엔드
pub struct TesseractOcr {
    cmd: PathBuf,
    language: String,
    available: OnceCell<bool>,
}

impl TesseractOcr {
    pub fn new(cmd: PathBuf, language: String) -> Self {
        Self {
            cmd,
            language,
            available: OnceCell::new(),
        }
    }
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                match Command::new(&self.cmd).arg("--version").output().await {
                    Ok(out) => out.status.success(),
                    Err(e) => {
                        tracing::warn!("tesseract not available ({:?}): {}", self.cmd, e);
                        false
                    }
                }
            })
            .await
    }

    async fn recognize(&self, path: &Path) -> Result<OcrOutput, ExtractError> {
        let output = Command::new(&self.cmd)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::OcrUnavailable(format!("{:?} not found", self.cmd))
                } else {
                    ExtractError::Unreadable {
                        path: path.to_path_buf(),
                        source: e,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(ExtractError::Corrupted {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_tesseract_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// tesseract TSV 출력을 텍스트 + 평균 신뢰도로 변환
///
/// 단어(level 5) 행만 사용합니다. 같은 줄은 공백, 줄 변경은 개행,
/// 블록/문단 변경은 빈 줄로 이어 붙입니다.
pub fn parse_tesseract_tsv(tsv: &str) -> OcrOutput {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut last: Option<[u32; 4]> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }

        let word = cols[11].trim();
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let key = [num(1), num(2), num(3), num(4)];

        match last {
            Some(prev) if prev == key => text.push(' '),
            Some(prev) if prev[..3] != key[..3] => text.push_str("\n\n"),
            Some(_) => text.push('\n'),
            None => {}
        }

        text.push_str(word);
        confidences.push(conf);
        last = Some(key);
    }

    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f32>() / confidences.len() as f32 / 100.0)
    };

    OcrOutput { text, confidence }
}

// ============================================================================
// Ollama Vision
// ============================================================================

/// 이미지 텍스트 추출 프롬프트
const EXTRACTION_PROMPT: &str = r#"Transcribe all text visible in this image.

Instructions:
1. Extract every piece of text: documents, terminal output, code, tables, diagrams
2. Keep the original structure and line breaks
3. Output plain text only, no commentary
4. If the image contains no text, output nothing

Text:"#;

/// Ollama 비전 모델 백엔드
pub struct VisionOcr {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl VisionOcr {
    pub fn new(endpoint: &str, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[derive(Debug, Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    options: VisionOptions,
}

#[derive(Debug, Serialize)]
struct VisionOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    #[serde(default)]
    response: String,
}

#[async_trait]
impl OcrBackend for VisionOcr {
    fn name(&self) -> &str {
        "vision"
    }

    async fn is_available(&self) -> bool {
        match crate::llm::list_models(&self.client, &self.endpoint).await {
            Ok(models) => models.iter().any(|m| crate::llm::model_matches(m, &self.model)),
            Err(e) => {
                tracing::warn!("Vision OCR endpoint unreachable: {}", e);
                false
            }
        }
    }

    async fn recognize(&self, path: &Path) -> Result<OcrOutput, ExtractError> {
        let image_data = read_bytes(path).await?;

        let request = VisionRequest {
            model: &self.model,
            prompt: EXTRACTION_PROMPT,
            images: vec![STANDARD.encode(&image_data)],
            stream: false,
            options: VisionOptions { temperature: 0.1 },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Timeout(Duration::ZERO)
                } else {
                    ExtractError::OcrUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ExtractError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("vision model error ({}): {}", status, body),
            });
        }

        let parsed: VisionResponse =
            serde_json::from_str(&body).map_err(|e| ExtractError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("bad vision response: {}", e),
            })?;

        Ok(OcrOutput {
            text: parsed.response,
            confidence: None,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t
5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\tnmap
5\t1\t1\t1\t1\t2\t0\t0\t10\t10\t80\t-sV
5\t1\t1\t1\t2\t1\t0\t0\t10\t10\t70\tPORT
5\t1\t2\t1\t1\t1\t0\t0\t10\t10\t60\t22/tcp
5\t1\t2\t1\t1\t2\t0\t0\t10\t10\t-1\t
";

    #[test]
    fn test_parse_tesseract_tsv() {
        let out = parse_tesseract_tsv(TSV);
        assert_eq!(out.text, "nmap -sV\nPORT\n\n22/tcp");
        let conf = out.confidence.unwrap();
        assert!((conf - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_parse_tesseract_tsv_empty() {
        let out = parse_tesseract_tsv("level\tpage_num\n");
        assert!(out.text.is_empty());
        assert!(out.confidence.is_none());
    }

    #[tokio::test]
    async fn test_disabled_ocr_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"\x89PNG").unwrap();

        let err = ImageExtractor::new(None).extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::OcrUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_tesseract_binary_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"\x89PNG").unwrap();

        let backend = TesseractOcr::new(
            PathBuf::from("/nonexistent/bin/tesseract-xyz"),
            "eng".to_string(),
        );
        assert!(!backend.is_available().await);

        let extractor = ImageExtractor::new(Some(Arc::new(backend)));
        let err = extractor.extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::OcrUnavailable(_)));
    }

    struct FixedOcr;

    #[async_trait]
    impl OcrBackend for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn recognize(&self, _path: &Path) -> Result<OcrOutput, ExtractError> {
            Ok(OcrOutput {
                text: "flag{ocr}   \n".to_string(),
                confidence: Some(0.9),
            })
        }
    }

    #[tokio::test]
    async fn test_ocr_metadata_recorded() {
        let extractor = ImageExtractor::new(Some(Arc::new(FixedOcr)));
        let out = extractor.extract(Path::new("any.png")).await.unwrap();
        assert_eq!(out.text, "flag{ocr}");
        assert_eq!(out.metadata.ocr_confidence, Some(0.9));
        assert_eq!(out.metadata.extractor, "ocr:fixed");
    }
}

//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.
//! 읽기 순서를 유지하고 페이지 경계를 `PageSpan`으로 남깁니다.

use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::{normalize_whitespace, read_bytes, Extracted, ExtractionMetadata, Extractor, PageSpan};
use crate::collector::FileType;
use crate::error::ExtractError;

/// PDF 추출기
pub struct PdfExtractor;

#[async_trait]
impl Extractor for PdfExtractor {
    fn file_type(&self) -> FileType {
        FileType::Pdf
    }

    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let bytes = read_bytes(path).await?;

        if !bytes.starts_with(b"%PDF") {
            return Err(ExtractError::Corrupted {
                path: path.to_path_buf(),
                reason: "missing %PDF header".to_string(),
            });
        }

        // PDF 추출은 CPU 바운드이고 손상 파일에서 패닉할 수 있으므로 spawn_blocking 사용
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| ExtractError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("PDF parser aborted: {}", e),
            })?
            .map_err(|e| ExtractError::Corrupted {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if text.trim().is_empty() {
            tracing::warn!(
                "No text extracted from PDF: {:?}. It might be a scanned document.",
                path
            );
        }

        let pages = split_pdf_pages(&text);
        let total_pages = pages.len();
        let (text, spans) = join_pages(pages);

        Ok(Extracted {
            text,
            metadata: ExtractionMetadata {
                extractor: "pdf".to_string(),
                pages: spans,
                total_pages: Some(total_pages),
                ..Default::default()
            },
        })
    }
}

/// 페이지 구분자 패턴 (예: "--- Page 1 ---")
fn page_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
            .expect("valid page separator regex")
    })
}

/// PDF 텍스트를 페이지별로 분리
///
/// (페이지 번호, 텍스트) 목록을 반환합니다. 빈 페이지도 번호를 유지하기 위해 포함됩니다.
pub fn split_pdf_pages(text: &str) -> Vec<(usize, String)> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    let pages: Vec<&str> = text.split('\x0c').collect();
    if pages.len() > 1 {
        return number_pages(pages);
    }

    // 페이지 구분자 패턴으로 시도 (일부 PDF에서 사용)
    let re = page_separator();
    if re.is_match(text) {
        let pages: Vec<&str> = re.split(text).collect();
        if pages.len() > 1 {
            return number_pages(pages);
        }
    }

    // 분리 실패 - 전체를 하나의 페이지로
    vec![(1, text.to_string())]
}

fn number_pages(pages: Vec<&str>) -> Vec<(usize, String)> {
    // 마지막 폼피드 뒤의 빈 꼬리는 페이지가 아님
    let mut pages = pages;
    while pages.len() > 1 && pages.last().map(|p| p.trim().is_empty()).unwrap_or(false) {
        pages.pop();
    }

    pages
        .into_iter()
        .enumerate()
        .map(|(i, page)| (i + 1, page.to_string()))
        .collect()
}

/// 페이지를 정규화하여 빈 줄로 이어 붙이고 각 페이지의 바이트 범위를 기록
pub fn join_pages(pages: Vec<(usize, String)>) -> (String, Vec<PageSpan>) {
    let mut text = String::new();
    let mut spans = Vec::with_capacity(pages.len());

    for (number, page) in pages {
        let page = normalize_whitespace(&page);
        if page.trim().is_empty() {
            continue;
        }

        if !text.is_empty() {
            text.push_str("\n\n");
        }
        let start = text.len();
        text.push_str(&page);
        spans.push(PageSpan {
            number,
            start,
            end: text.len(),
        });
    }

    (text, spans)
}

// ============================================================================
// Tests
// ============================================================================

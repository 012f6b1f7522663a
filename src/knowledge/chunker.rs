//! Text Chunking Module
//!
//! 추출된 문서 텍스트를 구조 경계(헤더, 코드 블록, 페이지)에서 먼저 나누고,
//! 최대 크기를 넘는 구간은 문단 → 줄 → 문장 → 단어 순으로 재귀 분할합니다.
//! 최소 크기에 못 미치는 구간은 이웃과 병합하고, 합친 길이가 최대 크기를 넘으면
//! 나머지도 최소 크기 이상이 되도록 다시 나눕니다.
//!
//! 모든 청크는 정규화된 텍스트의 연속 구간(바이트 범위)이므로
//! 같은 입력과 설정이면 경계와 ID가 항상 같습니다.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::collector::{DocType, FileType, SourceDocument};
use crate::config::PipelineConfig;
use crate::error::ChunkError;
use crate::extractor::Extracted;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최소 청크 크기 (문자 수)
    pub min_characters: usize,
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 의미 있는 문자 최소 비율
    pub min_meaningful_ratio: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_characters: 200,
            max_characters: 2000,
            min_meaningful_ratio: 0.6,
        }
    }
}

impl From<&PipelineConfig> for ChunkConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            min_characters: config.min_chunk_chars,
            max_characters: config.max_chunk_chars,
            min_meaningful_ratio: config.min_meaningful_ratio,
        }
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 청크 메타데이터 (출처 추적용)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_type: FileType,
    pub doc_type: DocType,
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// 한 문서에서 나온 텍스트 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// sha256(source_hash, ordinal, start, end) 앞 32자
    pub id: String,
    pub source_path: String,
    pub source_hash: String,
    pub ordinal: usize,
    pub text: String,
    pub char_len: usize,
    pub token_estimate: usize,
    /// 정규화 텍스트 내 바이트 오프셋
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
}

/// 결정적 청크 ID
pub fn chunk_id(source_hash: &str, ordinal: usize, start: usize, end: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:{}", source_hash, ordinal, start, end).as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..32].to_string()
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 정규화 텍스트를 청크 범위로 분할
    ///
    /// `page_starts`는 페이지가 시작하는 바이트 오프셋입니다 (PDF).
    fn split(&self, text: &str, page_starts: &[usize]) -> Result<Vec<Range<usize>>, ChunkError>;

    /// 청커 이름
    fn name(&self) -> &'static str;

    /// 문서 하나의 청크 생성
    fn chunk(&self, doc: &SourceDocument, extracted: &Extracted) -> Result<Vec<Chunk>, ChunkError> {
        let text = extracted.text.as_str();
        let meta = &extracted.metadata;
        let page_starts: Vec<usize> = meta.pages.iter().map(|p| p.start).collect();

        let ranges = self.split(text, &page_starts)?;
        let source_path = doc.key();
        let doc_type = doc.doc_type();

        let chunks = ranges
            .into_iter()
            .enumerate()
            .map(|(ordinal, range)| {
                let body = text[range.clone()].to_string();
                let char_len = body.chars().count();
                Chunk {
                    id: chunk_id(&doc.content_hash, ordinal, range.start, range.end),
                    source_path: source_path.clone(),
                    source_hash: doc.content_hash.clone(),
                    ordinal,
                    text: body,
                    char_len,
                    token_estimate: char_len.div_ceil(4),
                    start_offset: range.start,
                    end_offset: range.end,
                    metadata: ChunkMetadata {
                        file_type: doc.file_type,
                        doc_type,
                        title: meta.title.clone(),
                        page_start: meta.page_at(range.start),
                        page_end: meta.page_at(range.end.saturating_sub(1)),
                        ocr_confidence: meta.ocr_confidence,
                        language: meta.language.clone(),
                    },
                }
            })
            .collect();

        Ok(chunks)
    }
}

// ============================================================================
// StructuralChunker
// ============================================================================

/// 분할 단계 (큰 경계부터 시도)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitLevel {
    Paragraph,
    Line,
    Sentence,
    Word,
    Hard,
}

impl SplitLevel {
    const ORDER: [SplitLevel; 5] = [
        SplitLevel::Paragraph,
        SplitLevel::Line,
        SplitLevel::Sentence,
        SplitLevel::Word,
        SplitLevel::Hard,
    ];

    /// `c` 바로 앞에서 자를 수 있는지
    fn is_boundary(self, prev: Option<char>, c: char, next: Option<char>) -> bool {
        match self {
            SplitLevel::Paragraph => c == '\n' && next == Some('\n') && prev != Some('\n'),
            SplitLevel::Line => c == '\n',
            SplitLevel::Sentence => {
                c.is_whitespace() && matches!(prev, Some('.') | Some('?') | Some('!'))
            }
            SplitLevel::Word => c.is_whitespace() && prev.map(|p| !p.is_whitespace()).unwrap_or(false),
            SplitLevel::Hard => true,
        }
    }
}

/// 구조 인식 청커
///
/// - 코드 블록 밖의 Markdown 헤더에서 섹션 분리
/// - 코드 블록은 독립 섹션
/// - PDF 페이지 시작에서 섹션 분리
pub struct StructuralChunker {
    config: ChunkConfig,
}

impl StructuralChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 바이너리/깨진 텍스트 거부
    fn check_meaningful(&self, text: &str) -> Result<(), ChunkError> {
        if text.trim().is_empty() {
            return Err(ChunkError::Empty);
        }

        let ratio = meaningful_ratio(text);
        if ratio < self.config.min_meaningful_ratio {
            return Err(ChunkError::Garbage {
                ratio,
                threshold: self.config.min_meaningful_ratio,
            });
        }
        Ok(())
    }

    /// 구조 경계로 섹션 분리
    fn split_sections(&self, text: &str, page_starts: &[usize]) -> Vec<Range<usize>> {
        let mut sections = Vec::new();
        let mut section_start = 0;
        let mut offset = 0;
        let mut in_code_block = false;
        let mut after_code_block = false;

        for line in text.split_inclusive('\n') {
            let is_fence = {
                let t = line.trim_start();
                t.starts_with("```") || t.starts_with("~~~")
            };
            let is_header = !in_code_block && header_pattern().is_match(line);

            let boundary = offset > 0
                && (page_starts.contains(&offset)
                    || after_code_block
                    || (!in_code_block && (is_header || is_fence)));

            if boundary {
                push_trimmed(text, section_start..offset, &mut sections);
                section_start = offset;
            }

            after_code_block = false;
            if is_fence {
                in_code_block = !in_code_block;
                after_code_block = !in_code_block;
            }

            offset += line.len();
        }

        push_trimmed(text, section_start..text.len(), &mut sections);
        sections
    }

    /// 최대 크기를 넘는 구간을 재귀 분할
    ///
    /// 나머지가 최소 크기 이상 남는 분할점을 먼저 찾고, 없으면 상한만 지킵니다.
    fn split_oversize(&self, text: &str, range: Range<usize>) -> Vec<Range<usize>> {
        let max = self.config.max_characters;
        let min = self.config.min_characters;
        let mut pieces = Vec::new();
        let mut cursor = range.start;

        loop {
            cursor += leading_whitespace(&text[cursor..range.end]);
            if cursor >= range.end {
                break;
            }

            let remaining = cursor..range.end;
            let total = char_len(&text[remaining.clone()]);
            if total <= max {
                pieces.push(remaining);
                break;
            }

            let split = [min, 0].iter().find_map(|&rest_min| {
                SplitLevel::ORDER
                    .iter()
                    .find_map(|level| self.best_split(text, remaining.clone(), *level, total, rest_min))
            });

            match split {
                Some(piece) => {
                    cursor = piece.end;
                    pieces.push(piece);
                }
                None => {
                    pieces.push(remaining);
                    break;
                }
            }
        }

        pieces
    }

    /// 주어진 단계에서 상한에 가장 가까운 분할점 찾기
    ///
    /// 왼쪽 조각(끝 공백 제외)의 길이가 [min, max] 안이고
    /// 오른쪽 나머지(앞 공백 제외)가 `rest_min` 이상인 후보 중 가장 긴 것을 고릅니다.
    fn best_split(
        &self,
        text: &str,
        range: Range<usize>,
        level: SplitLevel,
        total: usize,
        rest_min: usize,
    ) -> Option<Range<usize>> {
        let slice = &text[range.clone()];
        let lo = self.config.min_characters.max(1);
        let hi = self.config.max_characters;
        let mut best = None;
        let mut count = 0;
        let mut trimmed_count = 0;
        let mut trimmed_end = 0;
        let mut prev = None;
        let mut iter = slice.char_indices().peekable();

        while let Some((i, c)) = iter.next() {
            if trimmed_count > hi {
                break;
            }

            let next = iter.peek().map(|(_, n)| *n);
            if i > 0
                && level.is_boundary(prev, c, next)
                && trimmed_count >= lo
                && trimmed_count <= hi
            {
                let gap = slice[i..].chars().take_while(|c| c.is_whitespace()).count();
                if total.saturating_sub(count + gap) >= rest_min {
                    best = Some(range.start..range.start + trimmed_end);
                }
            }

            count += 1;
            if !c.is_whitespace() {
                trimmed_count = count;
                trimmed_end = i + c.len_utf8();
            }
            prev = Some(c);
        }

        best
    }

    /// 작은 조각을 이웃과 병합
    ///
    /// 앞의 짧은 섹션(헤더, 소개)은 뒤 섹션에 붙습니다.
    /// 합친 길이가 최대 크기를 넘으면 합친 구간을 다시 분할합니다.
    fn merge_small(&self, text: &str, pieces: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let min = self.config.min_characters;
        let max = self.config.max_characters;
        let mut result: Vec<Range<usize>> = Vec::with_capacity(pieces.len());

        for piece in pieces {
            result.push(piece);

            while result.len() >= 2 {
                let n = result.len();
                let (prev, last) = (result[n - 2].clone(), result[n - 1].clone());
                if char_len(&text[prev.clone()]) >= min && char_len(&text[last.clone()]) >= min {
                    break;
                }

                let combined = prev.start..last.end;
                result.truncate(n - 2);
                if char_len(&text[combined.clone()]) <= max {
                    result.push(combined);
                } else {
                    result.extend(self.split_oversize(text, combined));
                    break;
                }
            }
        }

        result
    }
}

impl Chunker for StructuralChunker {
    fn split(&self, text: &str, page_starts: &[usize]) -> Result<Vec<Range<usize>>, ChunkError> {
        self.check_meaningful(text)?;

        // 문서 전체가 최대 크기 이하면 한 청크 (최소 크기 미만 문서 포함)
        let whole = match trim_range(text, 0..text.len()) {
            Some(r) => r,
            None => return Err(ChunkError::Empty),
        };
        if char_len(&text[whole.clone()]) <= self.config.max_characters {
            return Ok(vec![whole]);
        }

        let pieces: Vec<Range<usize>> = self
            .split_sections(text, page_starts)
            .into_iter()
            .flat_map(|section| {
                if char_len(&text[section.clone()]) <= self.config.max_characters {
                    vec![section]
                } else {
                    self.split_oversize(text, section)
                }
            })
            .collect();

        Ok(self.merge_small(text, pieces))
    }

    fn name(&self) -> &'static str {
        "StructuralChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Markdown 헤더 패턴
fn header_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#{1,6}\s").expect("valid header regex"))
}

/// 의미 있는 문자 비율 (영숫자, 공백, ASCII 구두점)
pub fn meaningful_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut meaningful = 0usize;
    for c in text.chars() {
        total += 1;
        if c.is_alphanumeric() || c.is_whitespace() || c.is_ascii_punctuation() {
            meaningful += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        meaningful as f64 / total as f64
    }
}

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[inline]
fn leading_whitespace(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

/// 앞뒤 공백을 제외한 범위 (비어 있으면 None)
fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = range.start + leading_whitespace(slice);
    Some(start..start + trimmed.len())
}

fn push_trimmed(text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    if let Some(r) = trim_range(text, range) {
        out.push(r);
    }
}

// ============================================================================
// Tests
// ============================================================================

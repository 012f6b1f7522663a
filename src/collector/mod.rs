//! 원본 문서 수집 모듈
//!
//! 소스 디렉토리를 재귀적으로 훑어 처리 대상 문서(SourceDocument)를 찾습니다.
//! .gitignore 패턴을 존중하고, 지원 포맷만 수집하며, 내용 해시를 계산합니다.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::PipelineConfig;

// ============================================================================
// File Types
// ============================================================================

/// 지원하는 파일 포맷
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// 텍스트 / 마크다운 / 라이트업
    Text,
    /// PDF 파일
    Pdf,
    /// 이미지 파일 (OCR로 처리)
    Image,
    /// 소스 코드 / 익스플로잇
    Code,
}

impl FileType {
    pub const ALL: [FileType; 4] = [FileType::Text, FileType::Pdf, FileType::Image, FileType::Code];

    /// 확장자로 파일 타입 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "txt" | "md" | "markdown" | "rst" | "html" | "htm" | "json" | "yaml" | "yml"
            | "toml" | "csv" | "xml" => Some(FileType::Text),

            "py" | "c" | "cpp" | "cc" | "h" | "hpp" | "sh" | "bash" | "js" | "ts" | "java"
            | "php" | "rb" | "go" | "rs" | "pl" | "ps1" | "asm" | "s" | "sql" => {
                Some(FileType::Code)
            }

            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" => {
                Some(FileType::Image)
            }

            "pdf" => Some(FileType::Pdf),

            _ => None,
        }
    }

    /// 파일 경로에서 타입 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Text => "text",
            FileType::Pdf => "pdf",
            FileType::Image => "image",
            FileType::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Some(FileType::Text),
            "pdf" => Some(FileType::Pdf),
            "image" => Some(FileType::Image),
            "code" => Some(FileType::Code),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Document Type
// ============================================================================

/// 경로 키워드로 추정한 문서 성격 (데이터셋 분포 집계용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Writeup,
    ResearchPaper,
    Challenge,
    Reference,
    Documentation,
    Code,
    Image,
    Log,
    Text,
}

impl DocType {
    /// 경로와 포맷으로 문서 성격 분류
    pub fn classify(path: &Path, file_type: FileType) -> Self {
        match file_type {
            FileType::Code => return DocType::Code,
            FileType::Image => return DocType::Image,
            _ => {}
        }

        let lower = path.to_string_lossy().to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if has(&["writeup", "write-up", "solution", "walkthrough"]) {
            DocType::Writeup
        } else if has(&["research", "paper", "analysis", "evaluation"]) {
            DocType::ResearchPaper
        } else if has(&["challenge", "ctf", "competition"]) {
            DocType::Challenge
        } else if has(&["cheat", "reference", "resource"]) {
            DocType::Reference
        } else if has(&["readme", "documentation", "guide"]) {
            DocType::Documentation
        } else if has(&["output", "log"]) {
            DocType::Log
        } else {
            DocType::Text
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Writeup => "writeup",
            DocType::ResearchPaper => "research_paper",
            DocType::Challenge => "challenge",
            DocType::Reference => "reference",
            DocType::Documentation => "documentation",
            DocType::Code => "code",
            DocType::Image => "image",
            DocType::Log => "log",
            DocType::Text => "text",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Source Document
// ============================================================================

/// 수집된 원본 문서 (불변, 출처 추적용)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 파일 타입
    pub file_type: FileType,
    /// 파일 크기 (바이트)
    pub size: u64,
    /// SHA-256 내용 해시 (hex)
    pub content_hash: String,
}

impl SourceDocument {
    /// 파일에서 SourceDocument 생성
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        // 파일 타입 확인
        let file_type = match FileType::from_path(&path) {
            Some(ft) => ft,
            None => return Ok(None), // 지원하지 않는 확장자
        };

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        let content_hash = hash_file(&path)?;

        Ok(Some(Self {
            path,
            file_type,
            size: metadata.len(),
            content_hash,
        }))
    }

    /// 저장소 키로 쓰는 경로 문자열
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn doc_type(&self) -> DocType {
        DocType::classify(&self.path, self.file_type)
    }

    /// 사람이 읽을 제목 (파일 이름 기반)
    pub fn title(&self) -> String {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        match self.file_type {
            FileType::Code => format!("Code: {}", name),
            FileType::Image => format!("Image: {}", name),
            _ => self
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(name)
                .replace(['-', '_'], " "),
        }
    }
}

/// 파일 내용의 SHA-256 (hex)
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("Failed to open: {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// File Collector
// ============================================================================

/// 수집에서 항상 제외하는 확장자 (로그, 압축 파일)
const SKIPPED_EXTENSIONS: &[&str] = &["log", "zip", "tar", "gz", "tgz", "7z", "rar"];

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 수집할 포맷
    pub formats: BTreeSet<FileType>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 32 * 1024 * 1024,
            formats: FileType::ALL.into_iter().collect(),
        }
    }
}

impl From<&PipelineConfig> for CollectorConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            respect_gitignore: config.respect_gitignore,
            include_hidden: config.include_hidden,
            max_file_size: config.max_file_size,
            formats: config.formats.clone(),
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    /// 새 수집기 생성
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 폴더 재귀 수집 (경로 순 정렬)
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<SourceDocument>> {
        let abs_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        if !abs_path.exists() {
            anyhow::bail!("Directory not found: {:?}", abs_path);
        }

        if !abs_path.is_dir() {
            anyhow::bail!("Not a directory: {:?}", abs_path);
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(&abs_path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            if is_skipped(entry.path()) {
                continue;
            }

            match SourceDocument::from_path(entry.path().to_path_buf()) {
                Ok(Some(doc)) => {
                    if self.should_include(&doc) {
                        files.push(doc);
                    }
                }
                Ok(None) => {} // 지원하지 않는 확장자
                Err(e) => {
                    tracing::warn!("Failed to collect file: {:#}", e);
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!("Collected {} files from {:?}", files.len(), abs_path);
        Ok(files)
    }

    /// 문서가 필터 조건을 만족하는지 확인
    fn should_include(&self, doc: &SourceDocument) -> bool {
        if self.config.max_file_size > 0 && doc.size > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", doc.path, doc.size);
            return false;
        }

        self.config.formats.contains(&doc.file_type)
    }
}

/// 로그, 압축 파일은 수집하지 않음
fn is_skipped(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SKIPPED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub text_files: usize,
    pub pdf_files: usize,
    pub image_files: usize,
    pub code_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    /// 수집된 문서 목록에서 통계 계산
    pub fn from_documents(docs: &[SourceDocument]) -> Self {
        let mut stats = Self::default();

        for doc in docs {
            stats.total_files += 1;
            stats.total_size += doc.size;

            match doc.file_type {
                FileType::Text => stats.text_files += 1,
                FileType::Pdf => stats.pdf_files += 1,
                FileType::Image => stats.image_files += 1,
                FileType::Code => stats.code_files += 1,
            }
        }

        stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("md"), Some(FileType::Text));
        assert_eq!(FileType::from_extension("py"), Some(FileType::Code));
        assert_eq!(FileType::from_extension("png"), Some(FileType::Image));
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("exe"), None);
    }

    #[test]
    fn test_doc_type_classify() {
        assert_eq!(
            DocType::classify(Path::new("/data/htb/writeups/box.md"), FileType::Text),
            DocType::Writeup
        );
        assert_eq!(
            DocType::classify(Path::new("/data/ctf/pwn1.txt"), FileType::Text),
            DocType::Challenge
        );
        assert_eq!(
            DocType::classify(Path::new("/data/writeups/exploit.py"), FileType::Code),
            DocType::Code
        );
        assert_eq!(
            DocType::classify(Path::new("/data/misc/notes.txt"), FileType::Text),
            DocType::Text
        );
    }

    #[test]
    fn test_title() {
        let doc = SourceDocument {
            path: PathBuf::from("/data/sql-injection_basics.md"),
            file_type: FileType::Text,
            size: 1,
            content_hash: String::new(),
        };
        assert_eq!(doc.title(), "sql injection basics");

        let code = SourceDocument {
            path: PathBuf::from("/data/exploit.py"),
            file_type: FileType::Code,
            ..doc
        };
        assert_eq!(code.title(), "Code: exploit.py");
    }

    #[test]
    fn test_hash_is_stable_and_content_based() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "same").unwrap();
        std::fs::write(&b, "same").unwrap();

        let ha = hash_file(&a).unwrap();
        assert_eq!(ha, hash_file(&b).unwrap());
        assert_eq!(ha.len(), 64);

        std::fs::write(&b, "different").unwrap();
        assert_ne!(ha, hash_file(&b).unwrap());
    }

    #[test]
    fn test_collect_directory_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.md"), "beta").unwrap();
        std::fs::write(dir.path().join("a.py"), "print(1)").unwrap();
        std::fs::write(dir.path().join("run.log"), "log line").unwrap();
        std::fs::write(dir.path().join("bundle.zip"), "zip").unwrap();
        std::fs::write(dir.path().join("tool.exe"), "bin").unwrap();
        std::fs::write(dir.path().join("shot.png"), "png").unwrap();

        let mut config = CollectorConfig::default();
        config.formats.remove(&FileType::Image);
        let docs = FileCollector::new(config)
            .collect_directory(dir.path())
            .unwrap();

        let names: Vec<_> = docs
            .iter()
            .map(|d| d.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.py", "b.md"]);

        let stats = CollectionStats::from_documents(&docs);
        assert_eq!(stats.code_files, 1);
        assert_eq!(stats.text_files, 1);
    }
}

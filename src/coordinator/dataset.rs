//! 데이터셋 아티팩트
//!
//! 채택된 QA 쌍을 JSONL (기본) 또는 JSON 배열로 씁니다.
//! 임시 파일에 쓴 뒤 rename하므로 중간에 끊겨도 반쯤 쓴 파일이 남지 않습니다.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::collector::DocType;
use crate::knowledge::PairRecord;

/// 출력 포맷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    /// 줄마다 레코드 하나
    #[default]
    Jsonl,
    /// 레코드 배열 하나
    Json,
}

/// 데이터셋 레코드 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub question: String,
    pub answer: String,
    pub source_chunk_id: String,
    pub source_path: String,
    pub doc_type: DocType,
    pub attempts: u32,
}

impl From<PairRecord> for DatasetRecord {
    fn from(record: PairRecord) -> Self {
        Self {
            question: record.pair.question,
            answer: record.pair.answer,
            source_chunk_id: record.pair.source_chunk_id,
            source_path: record.source_path,
            doc_type: record.doc_type,
            attempts: record.pair.attempts,
        }
    }
}

/// 데이터셋 파일 쓰기 (임시 파일 → rename)
///
/// 쓴 레코드 수를 반환합니다.
pub fn write_dataset(path: &Path, records: &[DatasetRecord], format: DatasetFormat) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
    }

    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)
            .with_context(|| format!("Failed to create dataset file: {:?}", tmp))?;
        let mut writer = BufWriter::new(file);

        match format {
            DatasetFormat::Jsonl => {
                for record in records {
                    serde_json::to_writer(&mut writer, record)?;
                    writer.write_all(b"\n")?;
                }
            }
            DatasetFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, records)?;
                writer.write_all(b"\n")?;
            }
        }

        writer.flush().context("Failed to flush dataset file")?;
    }

    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move dataset into place: {:?}", path))?;

    tracing::info!("Wrote {} records to {:?}", records.len(), path);
    Ok(records.len())
}

/// 데이터셋 파일 읽기 (JSON 배열 / JSONL 자동 감지)
pub fn read_dataset(path: &Path) -> Result<Vec<DatasetRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {:?}", path))?;

    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON dataset: {:?}", path));
    }

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid record at {:?} line {}", path, i + 1))
        })
        .collect()
}

// ============================================================================
// Summary
// ============================================================================

/// 데이터셋 품질 요약 (`stats` 명령어)
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetSummary {
    pub total_pairs: usize,
    pub unique_chunks: usize,
    pub avg_question_chars: f64,
    pub avg_answer_chars: f64,
    pub by_doc_type: BTreeMap<DocType, usize>,
}

impl DatasetSummary {
    pub fn from_records(records: &[DatasetRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let mut by_doc_type = BTreeMap::new();
        let mut chunks = HashSet::new();
        let mut question_chars = 0usize;
        let mut answer_chars = 0usize;

        for record in records {
            *by_doc_type.entry(record.doc_type).or_insert(0) += 1;
            chunks.insert(record.source_chunk_id.as_str());
            question_chars += record.question.chars().count();
            answer_chars += record.answer.chars().count();
        }

        let total = records.len();
        Self {
            total_pairs: total,
            unique_chunks: chunks.len(),
            avg_question_chars: question_chars as f64 / total as f64,
            avg_answer_chars: answer_chars as f64 / total as f64,
            by_doc_type,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(question: &str, answer: &str, chunk: &str, doc_type: DocType) -> DatasetRecord {
        DatasetRecord {
            question: question.to_string(),
            answer: answer.to_string(),
            source_chunk_id: chunk.to_string(),
            source_path: "/corpus/a.md".to_string(),
            doc_type,
            attempts: 1,
        }
    }

    #[test]
    fn test_write_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/dataset.jsonl");
        let records = vec![
            record("What is XSS?", "Script injection into a page.", "c1", DocType::Writeup),
            record("What is SSRF?", "Server-side request forgery.", "c2", DocType::Reference),
        ];

        assert_eq!(write_dataset(&path, &records, DatasetFormat::Jsonl).unwrap(), 2);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["source_chunk_id"], "c1");
        assert_eq!(first["doc_type"], "writeup");
        assert!(!path.with_extension("tmp").exists());

        assert_eq!(read_dataset(&path).unwrap(), records);
    }

    #[test]
    fn test_write_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset.json");
        let records = vec![record("Q one here?", "An answer long enough.", "c1", DocType::Code)];

        write_dataset(&path, &records, DatasetFormat::Json).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value.is_array());
        assert_eq!(read_dataset(&path).unwrap(), records);
    }

    #[test]
    fn test_summary() {
        let records = vec![
            record("abcd", "123456", "c1", DocType::Writeup),
            record("ab", "12", "c1", DocType::Writeup),
            record("abcdef", "1234", "c2", DocType::Code),
        ];

        let summary = DatasetSummary::from_records(&records);
        assert_eq!(summary.total_pairs, 3);
        assert_eq!(summary.unique_chunks, 2);
        assert_eq!(summary.avg_question_chars, 4.0);
        assert_eq!(summary.avg_answer_chars, 4.0);
        assert_eq!(summary.by_doc_type[&DocType::Writeup], 2);

        assert_eq!(DatasetSummary::from_records(&[]).total_pairs, 0);
    }
}

//! Chunk Store - rusqlite 기반 청크 / 실행 상태 저장소
//!
//! 청크, 문서 처리 상태, RunState, 청크별 합성 결과, 채택된 QA 쌍을 저장합니다.
//! 저장 위치: ~/.local/share/.secqa/secqa.db (플랫폼별 data_local_dir)
//!
//! 한 문서의 청크 세대 기록과 한 청크의 합성 결과 기록은 각각 하나의
//! 트랜잭션이므로, 중간에 프로세스가 죽어도 부분 상태가 남지 않습니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use super::chunker::{Chunk, ChunkMetadata};
use super::state::{
    ChunkOutcome, OutcomeStatus, Phase, PhaseState, QaPair, RunState,
};
use crate::collector::{DocType, FileType, SourceDocument};
use crate::error::FailureKind;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.local/share/.secqa/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".secqa")
}

/// DB 파일 이름
pub const DB_FILE: &str = "secqa.db";

// ============================================================================
// Types
// ============================================================================

/// 문서 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// 청크 세대 기록 완료
    Chunked,
    /// 영구 실패 (재실행 시 건너뜀)
    Failed,
    /// 일시 실패 (재실행 시 다시 처리)
    Unresolved,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Unresolved => "unresolved",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "chunked" => DocumentStatus::Chunked,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Unresolved,
        }
    }

    /// 종결 상태 여부
    pub fn is_terminal(self) -> bool {
        !matches!(self, DocumentStatus::Unresolved)
    }
}

/// 문서 처리 기록
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub path: String,
    pub content_hash: String,
    pub file_type: FileType,
    pub status: DocumentStatus,
    pub failure_kind: Option<FailureKind>,
    pub detail: Option<String>,
    pub generation: u32,
    pub chunk_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// 청크 단위 합성 결과 행 (보고서용)
#[derive(Debug, Clone)]
pub struct OutcomeRow {
    pub chunk_id: String,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub failure_kind: Option<FailureKind>,
    pub pair_count: usize,
    pub file_type: Option<FileType>,
    /// 청크가 이후 세대로 대체됨 (데이터셋에서 제외)
    pub superseded: bool,
}

/// 데이터셋에 쓸 QA 쌍 + 출처
#[derive(Debug, Clone)]
pub struct PairRecord {
    pub pair: QaPair,
    pub source_path: String,
    pub file_type: FileType,
    pub doc_type: DocType,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunked_documents: usize,
    pub failed_documents: usize,
    pub unresolved_documents: usize,
    pub live_chunks: usize,
    pub superseded_chunks: usize,
    pub qa_pairs: usize,
    pub runs: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// ChunkStore
// ============================================================================

/// Chunk Store - 동기 저장소
///
/// 모든 쓰기는 코디네이터 한 곳에서만 호출됩니다.
pub struct ChunkStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ChunkStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 데이터 디렉토리에서 열기 (`<data_dir>/secqa.db`)
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }
        Self::open(&data_dir.join(DB_FILE))
    }

    /// 기본 위치에서 열기
    pub fn open_default() -> Result<Self> {
        Self::open_in(&get_data_dir())
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                file_type TEXT NOT NULL,
                status TEXT NOT NULL,
                failure_kind TEXT,
                detail TEXT,
                generation INTEGER NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source_path TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                generation INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                char_len INTEGER NOT NULL,
                token_estimate INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                metadata TEXT NOT NULL,
                superseded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_path, superseded);

            CREATE TABLE IF NOT EXISTS run_state (
                run_id TEXT PRIMARY KEY,
                extraction TEXT NOT NULL,
                synthesis TEXT NOT NULL,
                accepted INTEGER NOT NULL DEFAULT 0,
                rejected INTEGER NOT NULL DEFAULT 0,
                pairs INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS chunk_outcomes (
                run_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                failure_kind TEXT,
                detail TEXT,
                pair_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (run_id, chunk_id)
            );

            CREATE TABLE IF NOT EXISTS qa_pairs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (run_id, chunk_id, ordinal)
            );
            "#,
        )
        .context("Failed to create schema")?;

        tracing::debug!("Chunk store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ========================================================================
    // Documents / Chunks (Phase 1)
    // ========================================================================

    /// 문서 처리 기록 조회
    pub fn document_record(&self, path: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.lock()?;

        let record = conn
            .query_row(
                "SELECT path, content_hash, file_type, status, failure_kind, detail,
                        generation, chunk_count, updated_at
                 FROM documents WHERE path = ?1",
                params![path],
                row_to_document,
            )
            .optional()
            .context("Failed to query document")?;

        Ok(record)
    }

    /// 모든 문서 기록 (경로 순)
    pub fn document_records(&self) -> Result<Vec<DocumentRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT path, content_hash, file_type, status, failure_kind, detail,
                    generation, chunk_count, updated_at
             FROM documents ORDER BY path",
        )?;

        let records = stmt
            .query_map([], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list documents")?;

        Ok(records)
    }

    /// 문서의 새 청크 세대 기록 (하나의 트랜잭션)
    ///
    /// 이전 세대의 살아있는 청크는 삭제하지 않고 superseded로 표시합니다.
    /// 같은 ID의 청크(내용 동일)는 제자리에서 되살립니다.
    pub fn commit_generation(&self, doc: &SourceDocument, chunks: &[Chunk]) -> Result<u32> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let key = doc.key();
        let now = Utc::now().to_rfc3339();

        let previous: Option<u32> = tx
            .query_row(
                "SELECT generation FROM documents WHERE path = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let generation = previous.unwrap_or(0) + 1;

        tx.execute(
            "UPDATE chunks SET superseded = 1 WHERE source_path = ?1 AND superseded = 0",
            params![key],
        )
        .context("Failed to supersede previous chunks")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, source_path, source_hash, generation, ordinal, text,
                                     char_len, token_estimate, start_offset, end_offset,
                                     metadata, superseded, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                     source_path = excluded.source_path,
                     generation = excluded.generation,
                     text = excluded.text,
                     metadata = excluded.metadata,
                     superseded = 0",
            )?;

            for chunk in chunks {
                let metadata = serde_json::to_string(&chunk.metadata)
                    .context("Failed to serialize chunk metadata")?;
                stmt.execute(params![
                    chunk.id,
                    chunk.source_path,
                    chunk.source_hash,
                    generation,
                    chunk.ordinal as i64,
                    chunk.text,
                    chunk.char_len as i64,
                    chunk.token_estimate as i64,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                    metadata,
                    now,
                ])
                .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
            }
        }

        tx.execute(
            "INSERT INTO documents (path, content_hash, file_type, status, failure_kind, detail,
                                    generation, chunk_count, updated_at)
             VALUES (?1, ?2, ?3, 'chunked', NULL, NULL, ?4, ?5, ?6)
             ON CONFLICT(path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 file_type = excluded.file_type,
                 status = 'chunked',
                 failure_kind = NULL,
                 detail = NULL,
                 generation = excluded.generation,
                 chunk_count = excluded.chunk_count,
                 updated_at = excluded.updated_at",
            params![
                key,
                doc.content_hash,
                doc.file_type.as_str(),
                generation,
                chunks.len() as i64,
                now
            ],
        )
        .context("Failed to upsert document")?;

        tx.commit().context("Failed to commit chunk generation")?;

        tracing::debug!(
            "Committed generation {} for {} ({} chunks)",
            generation,
            key,
            chunks.len()
        );
        Ok(generation)
    }

    /// 문서 실패 기록 (하나의 트랜잭션)
    ///
    /// 영구 실패면 종결 상태(`failed`), 아니면 `unresolved`로 남습니다.
    /// 내용이 바뀐 문서의 이전 청크는 더 이상 유효하지 않으므로 superseded 처리합니다.
    pub fn record_document_failure(
        &self,
        doc: &SourceDocument,
        kind: FailureKind,
        detail: &str,
    ) -> Result<DocumentStatus> {
        let status = if kind.is_permanent() {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Unresolved
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let key = doc.key();
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "UPDATE chunks SET superseded = 1
             WHERE source_path = ?1 AND superseded = 0 AND source_hash != ?2",
            params![key, doc.content_hash],
        )?;

        tx.execute(
            "INSERT INTO documents (path, content_hash, file_type, status, failure_kind, detail,
                                    generation, chunk_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7)
             ON CONFLICT(path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 file_type = excluded.file_type,
                 status = excluded.status,
                 failure_kind = excluded.failure_kind,
                 detail = excluded.detail,
                 chunk_count = 0,
                 updated_at = excluded.updated_at",
            params![
                key,
                doc.content_hash,
                doc.file_type.as_str(),
                status.as_str(),
                kind.as_str(),
                detail,
                now
            ],
        )
        .context("Failed to record document failure")?;

        tx.commit().context("Failed to commit document failure")?;
        Ok(status)
    }

    /// ID로 청크 조회
    pub fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let conn = self.lock()?;

        let chunk = conn
            .query_row(
                &format!("SELECT {} FROM chunks WHERE id = ?1", CHUNK_COLUMNS),
                params![id],
                row_to_chunk,
            )
            .optional()
            .context("Failed to query chunk")?;

        Ok(chunk)
    }

    /// 살아있는 (superseded 아닌) 모든 청크 (경로, 순번 순)
    pub fn live_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE superseded = 0 ORDER BY source_path, ordinal",
            CHUNK_COLUMNS
        ))?;

        let chunks = stmt
            .query_map([], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list chunks")?;

        Ok(chunks)
    }

    /// 특정 문서의 살아있는 청크
    pub fn chunks_for(&self, source_path: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE source_path = ?1 AND superseded = 0 ORDER BY ordinal",
            CHUNK_COLUMNS
        ))?;

        let chunks = stmt
            .query_map(params![source_path], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list document chunks")?;

        Ok(chunks)
    }

    // ========================================================================
    // Run State (Phase 2)
    // ========================================================================

    /// 실행에서 아직 시도되지 않은 살아있는 청크
    pub fn pending_chunks(&self, run_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let columns = CHUNK_COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks c
             LEFT JOIN chunk_outcomes o ON o.chunk_id = c.id AND o.run_id = ?1
             WHERE c.superseded = 0 AND o.chunk_id IS NULL
             ORDER BY c.source_path, c.ordinal",
            columns
        ))?;

        let chunks = stmt
            .query_map(params![run_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list pending chunks")?;

        Ok(chunks)
    }

    /// RunState 로드 (없으면 NotStarted)
    pub fn load_run_state(&self, run_id: &str) -> Result<RunState> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT extraction, synthesis, accepted, rejected, pairs, updated_at
                 FROM run_state WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query run state")?;

        let mut state = RunState::new(run_id);
        if let Some((extraction, synthesis, accepted, rejected, pairs, updated_at)) = row {
            state.extraction = serde_json::from_str(&extraction)
                .with_context(|| format!("Corrupted extraction state for run {}", run_id))?;
            state.synthesis = serde_json::from_str(&synthesis)
                .with_context(|| format!("Corrupted synthesis state for run {}", run_id))?;
            state.accepted = accepted as usize;
            state.rejected = rejected as usize;
            state.pairs = pairs as usize;
            state.last_checkpoint = updated_at.map(parse_datetime);
        }

        let mut stmt = conn.prepare("SELECT chunk_id FROM chunk_outcomes WHERE run_id = ?1")?;
        state.attempted = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()
            .context("Failed to load attempted chunks")?;

        Ok(state)
    }

    /// 단계 상태 저장 (체크포인트 타임스탬프 갱신)
    pub fn save_phase(&self, run_id: &str, phase: Phase, state: &PhaseState) -> Result<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(state).context("Failed to serialize phase state")?;
        let now = Utc::now().to_rfc3339();

        ensure_run(&conn, run_id)?;
        conn.execute(
            &format!(
                "UPDATE run_state SET {} = ?2, updated_at = ?3 WHERE run_id = ?1",
                phase.column()
            ),
            params![run_id, json, now],
        )
        .context("Failed to save phase state")?;

        Ok(())
    }

    /// 청크 하나의 합성 결과 기록 (하나의 트랜잭션)
    ///
    /// 결과 행, 채택된 QA 쌍, 카운터, 체크포인트를 함께 씁니다.
    /// 이미 기록된 청크면 아무것도 바꾸지 않고 false를 반환합니다.
    pub fn record_synthesis_outcome(
        &self,
        run_id: &str,
        outcome: &ChunkOutcome,
        checkpoint: &PhaseState,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let now = Utc::now().to_rfc3339();

        ensure_run(&tx, run_id)?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO chunk_outcomes
                     (run_id, chunk_id, status, attempts, failure_kind, detail, pair_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run_id,
                    outcome.chunk_id,
                    outcome.status.as_str(),
                    outcome.attempts,
                    outcome.failure_kind.map(|k| k.as_str()),
                    outcome.detail,
                    outcome.pairs.len() as i64,
                    now
                ],
            )
            .context("Failed to insert chunk outcome")?;

        if inserted == 0 {
            tracing::debug!("Outcome for {} already recorded", outcome.chunk_id);
            return Ok(false);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO qa_pairs (run_id, chunk_id, ordinal, question, answer, attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (i, pair) in outcome.pairs.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    pair.source_chunk_id,
                    i as i64,
                    pair.question,
                    pair.answer,
                    pair.attempts,
                    now
                ])
                .context("Failed to insert QA pair")?;
            }
        }

        let (accepted, rejected) = match outcome.status {
            OutcomeStatus::Accepted => (1, 0),
            OutcomeStatus::Rejected => (0, 1),
        };
        let json = serde_json::to_string(checkpoint).context("Failed to serialize checkpoint")?;

        tx.execute(
            "UPDATE run_state SET
                 accepted = accepted + ?2,
                 rejected = rejected + ?3,
                 pairs = pairs + ?4,
                 synthesis = ?5,
                 updated_at = ?6
             WHERE run_id = ?1",
            params![run_id, accepted, rejected, outcome.pairs.len() as i64, json, now],
        )
        .context("Failed to update run counters")?;

        tx.commit().context("Failed to commit synthesis outcome")?;
        Ok(true)
    }

    /// 실행의 청크별 결과 (포맷 포함)
    pub fn run_outcomes(&self, run_id: &str) -> Result<Vec<OutcomeRow>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT o.chunk_id, o.status, o.attempts, o.failure_kind, o.pair_count, c.metadata,
                    COALESCE(c.superseded, 1)
             FROM chunk_outcomes o
             LEFT JOIN chunks c ON c.id = o.chunk_id
             WHERE o.run_id = ?1
             ORDER BY o.chunk_id",
        )?;

        let rows = stmt
            .query_map(params![run_id], |row| {
                let status: String = row.get(1)?;
                let failure_kind: Option<String> = row.get(3)?;
                let metadata: Option<String> = row.get(5)?;
                Ok(OutcomeRow {
                    chunk_id: row.get(0)?,
                    status: OutcomeStatus::parse(&status).unwrap_or(OutcomeStatus::Rejected),
                    attempts: row.get(2)?,
                    failure_kind: failure_kind.as_deref().and_then(FailureKind::parse),
                    pair_count: row.get::<_, i64>(4)? as usize,
                    file_type: metadata
                        .and_then(|m| serde_json::from_str::<ChunkMetadata>(&m).ok())
                        .map(|m| m.file_type),
                    superseded: row.get::<_, i64>(6)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list outcomes")?;

        Ok(rows)
    }

    /// 데이터셋용 채택 QA 쌍 (살아있는 청크만, 경로/순번 순)
    pub fn accepted_pairs(&self, run_id: &str) -> Result<Vec<PairRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT p.question, p.answer, p.chunk_id, p.attempts, c.source_path, c.metadata
             FROM qa_pairs p
             JOIN chunks c ON c.id = p.chunk_id
             WHERE p.run_id = ?1 AND c.superseded = 0
             ORDER BY c.source_path, c.ordinal, p.ordinal",
        )?;

        let rows = stmt
            .query_map(params![run_id], |row| {
                let metadata: String = row.get(5)?;
                Ok((
                    QaPair {
                        question: row.get(0)?,
                        answer: row.get(1)?,
                        source_chunk_id: row.get(2)?,
                        attempts: row.get(3)?,
                    },
                    row.get::<_, String>(4)?,
                    metadata,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list QA pairs")?;

        rows.into_iter()
            .map(|(pair, source_path, metadata)| {
                let meta: ChunkMetadata = serde_json::from_str(&metadata)
                    .with_context(|| format!("Corrupted metadata for chunk {}", pair.source_chunk_id))?;
                Ok(PairRecord {
                    pair,
                    source_path,
                    file_type: meta.file_type,
                    doc_type: meta.doc_type,
                })
            })
            .collect()
    }

    /// 저장된 run id 목록
    pub fn run_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT run_id FROM run_state ORDER BY run_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// 실행 초기화 (RunState, 결과, QA 쌍 삭제)
    pub fn reset_run(&self, run_id: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let outcomes = tx.execute("DELETE FROM chunk_outcomes WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM qa_pairs WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM run_state WHERE run_id = ?1", params![run_id])?;

        tx.commit().context("Failed to reset run")?;
        tracing::info!("Reset run {} ({} outcomes discarded)", run_id, outcomes);
        Ok(outcomes)
    }

    /// 전체 초기화 (청크 저장소 포함)
    pub fn reset_all(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "BEGIN;
             DELETE FROM qa_pairs;
             DELETE FROM chunk_outcomes;
             DELETE FROM run_state;
             DELETE FROM chunks;
             DELETE FROM documents;
             COMMIT;",
        )
        .context("Failed to reset store")?;
        tracing::info!("Reset chunk store at {:?}", self.db_path);
        Ok(())
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            document_count: count("SELECT COUNT(*) FROM documents")?,
            chunked_documents: count("SELECT COUNT(*) FROM documents WHERE status = 'chunked'")?,
            failed_documents: count("SELECT COUNT(*) FROM documents WHERE status = 'failed'")?,
            unresolved_documents: count(
                "SELECT COUNT(*) FROM documents WHERE status = 'unresolved'",
            )?,
            live_chunks: count("SELECT COUNT(*) FROM chunks WHERE superseded = 0")?,
            superseded_chunks: count("SELECT COUNT(*) FROM chunks WHERE superseded = 1")?,
            qa_pairs: count("SELECT COUNT(*) FROM qa_pairs")?,
            runs: count("SELECT COUNT(*) FROM run_state")?,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

const CHUNK_COLUMNS: &str = "id, source_path, source_hash, ordinal, text, char_len, token_estimate, start_offset, end_offset, metadata";

/// run_state 행이 없으면 NotStarted로 생성
fn ensure_run(conn: &Connection, run_id: &str) -> Result<()> {
    let not_started = serde_json::to_string(&PhaseState::NotStarted)?;
    conn.execute(
        "INSERT OR IGNORE INTO run_state (run_id, extraction, synthesis) VALUES (?1, ?2, ?2)",
        params![run_id, not_started],
    )
    .context("Failed to create run state")?;
    Ok(())
}

fn json_error(idx: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let metadata: String = row.get(9)?;
    Ok(Chunk {
        id: row.get(0)?,
        source_path: row.get(1)?,
        source_hash: row.get(2)?,
        ordinal: row.get::<_, i64>(3)? as usize,
        text: row.get(4)?,
        char_len: row.get::<_, i64>(5)? as usize,
        token_estimate: row.get::<_, i64>(6)? as usize,
        start_offset: row.get::<_, i64>(7)? as usize,
        end_offset: row.get::<_, i64>(8)? as usize,
        metadata: serde_json::from_str(&metadata).map_err(|e| json_error(9, e))?,
    })
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let file_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let failure_kind: Option<String> = row.get(4)?;
    Ok(DocumentRecord {
        path: row.get(0)?,
        content_hash: row.get(1)?,
        file_type: FileType::parse(&file_type).unwrap_or(FileType::Text),
        status: DocumentStatus::parse(&status),
        failure_kind: failure_kind.as_deref().and_then(FailureKind::parse),
        detail: row.get(5)?,
        generation: row.get(6)?,
        chunk_count: row.get::<_, i64>(7)? as usize,
        updated_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::chunk_id;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, ChunkStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = ChunkStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn doc(path: &str, hash: &str) -> SourceDocument {
        SourceDocument {
            path: PathBuf::from(path),
            file_type: FileType::Text,
            size: 100,
            content_hash: hash.to_string(),
        }
    }

    fn chunk(doc: &SourceDocument, ordinal: usize, text: &str) -> Chunk {
        let start = ordinal * 1000;
        let end = start + text.len();
        Chunk {
            id: chunk_id(&doc.content_hash, ordinal, start, end),
            source_path: doc.key(),
            source_hash: doc.content_hash.clone(),
            ordinal,
            text: text.to_string(),
            char_len: text.chars().count(),
            token_estimate: text.len() / 4,
            start_offset: start,
            end_offset: end,
            metadata: ChunkMetadata {
                file_type: doc.file_type,
                doc_type: doc.doc_type(),
                title: Some("notes".to_string()),
                page_start: None,
                page_end: None,
                ocr_confidence: None,
                language: None,
            },
        }
    }

    fn accepted(chunk: &Chunk, question: &str) -> ChunkOutcome {
        ChunkOutcome {
            chunk_id: chunk.id.clone(),
            status: OutcomeStatus::Accepted,
            attempts: 1,
            failure_kind: None,
            detail: None,
            failures: vec![],
            pairs: vec![QaPair {
                question: question.to_string(),
                answer: "An answer long enough to count.".to_string(),
                source_chunk_id: chunk.id.clone(),
                attempts: 1,
            }],
        }
    }

    #[test]
    fn test_commit_and_lookup() {
        let (_dir, store) = create_test_store();
        let d = doc("/corpus/a.txt", "h1");
        let chunks = vec![chunk(&d, 0, "first"), chunk(&d, 1, "second")];

        let generation = store.commit_generation(&d, &chunks).unwrap();
        assert_eq!(generation, 1);

        let got = store.get_chunk(&chunks[1].id).unwrap().unwrap();
        assert_eq!(got, chunks[1]);
        assert!(store.get_chunk("missing").unwrap().is_none());

        let record = store.document_record("/corpus/a.txt").unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Chunked);
        assert_eq!(record.chunk_count, 2);
        assert_eq!(record.content_hash, "h1");
    }

    #[test]
    fn test_changed_source_supersedes() {
        let (_dir, store) = create_test_store();
        let v1 = doc("/corpus/a.txt", "h1");
        let v2 = doc("/corpus/a.txt", "h2");

        store.commit_generation(&v1, &[chunk(&v1, 0, "old")]).unwrap();
        let generation = store.commit_generation(&v2, &[chunk(&v2, 0, "new")]).unwrap();
        assert_eq!(generation, 2);

        let live = store.live_chunks().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].text, "new");

        let stats = store.stats().unwrap();
        assert_eq!(stats.superseded_chunks, 1);
        assert_eq!(stats.live_chunks, 1);
    }

    #[test]
    fn test_recommit_same_ids_revives() {
        let (_dir, store) = create_test_store();
        let d = doc("/corpus/a.txt", "h1");
        let chunks = vec![chunk(&d, 0, "same")];

        store.commit_generation(&d, &chunks).unwrap();
        store.commit_generation(&d, &chunks).unwrap();

        let live = store.live_chunks().unwrap();
        assert_eq!(live, chunks);
        assert_eq!(store.stats().unwrap().superseded_chunks, 0);
    }

    #[test]
    fn test_failure_status() {
        let (_dir, store) = create_test_store();
        let d = doc("/corpus/scan.png", "h1");

        let status = store
            .record_document_failure(&d, FailureKind::OcrUnavailable, "tesseract missing")
            .unwrap();
        assert_eq!(status, DocumentStatus::Failed);

        let status = store
            .record_document_failure(&d, FailureKind::Timeout, "timed out")
            .unwrap();
        assert_eq!(status, DocumentStatus::Unresolved);

        let record = store.document_record("/corpus/scan.png").unwrap().unwrap();
        assert_eq!(record.failure_kind, Some(FailureKind::Timeout));
        assert!(!record.status.is_terminal());
    }

    #[test]
    fn test_outcome_recorded_once() {
        let (_dir, store) = create_test_store();
        let d = doc("/corpus/a.txt", "h1");
        let chunks = vec![chunk(&d, 0, "first"), chunk(&d, 1, "second")];
        store.commit_generation(&d, &chunks).unwrap();

        assert_eq!(store.pending_chunks("run").unwrap().len(), 2);

        let checkpoint = PhaseState::NotStarted.start().advance(&chunks[0].id);
        let outcome = accepted(&chunks[0], "What is a stack canary?");
        assert!(store.record_synthesis_outcome("run", &outcome, &checkpoint).unwrap());
        assert!(!store.record_synthesis_outcome("run", &outcome, &checkpoint).unwrap());

        let state = store.load_run_state("run").unwrap();
        assert_eq!(state.accepted, 1);
        assert_eq!(state.pairs, 1);
        assert!(state.attempted.contains(&chunks[0].id));
        assert_eq!(state.synthesis, checkpoint);

        let pending = store.pending_chunks("run").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, chunks[1].id);

        // 다른 run은 독립
        assert_eq!(store.pending_chunks("other").unwrap().len(), 2);
    }

    #[test]
    fn test_accepted_pairs_skip_superseded() {
        let (_dir, store) = create_test_store();
        let v1 = doc("/corpus/a.txt", "h1");
        let c1 = chunk(&v1, 0, "old");
        store.commit_generation(&v1, &[c1.clone()]).unwrap();

        let checkpoint = PhaseState::NotStarted.start();
        store
            .record_synthesis_outcome("run", &accepted(&c1, "What is ROP?"), &checkpoint)
            .unwrap();
        assert_eq!(store.accepted_pairs("run").unwrap().len(), 1);

        let v2 = doc("/corpus/a.txt", "h2");
        store.commit_generation(&v2, &[chunk(&v2, 0, "new")]).unwrap();
        assert!(store.accepted_pairs("run").unwrap().is_empty());

        let rows = store.run_outcomes("run").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].superseded);
    }

    #[test]
    fn test_run_outcomes_and_reset() {
        let (_dir, store) = create_test_store();
        let d = doc("/corpus/a.txt", "h1");
        let c = chunk(&d, 0, "body");
        store.commit_generation(&d, &[c.clone()]).unwrap();

        let outcome = ChunkOutcome {
            chunk_id: c.id.clone(),
            status: OutcomeStatus::Rejected,
            attempts: 3,
            failure_kind: Some(FailureKind::SynthesisParseFailure),
            detail: Some("no Q: markers".to_string()),
            failures: vec![FailureKind::SynthesisParseFailure; 3],
            pairs: vec![],
        };
        store
            .record_synthesis_outcome("run", &outcome, &PhaseState::NotStarted.start())
            .unwrap();

        let rows = store.run_outcomes("run").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].superseded);
        assert_eq!(rows[0].status, OutcomeStatus::Rejected);
        assert_eq!(rows[0].attempts, 3);
        assert_eq!(rows[0].file_type, Some(FileType::Text));
        assert_eq!(store.run_ids().unwrap(), vec!["run".to_string()]);

        store.reset_run("run").unwrap();
        let state = store.load_run_state("run").unwrap();
        assert_eq!(state.rejected, 0);
        assert_eq!(state.synthesis, PhaseState::NotStarted);
        assert_eq!(store.pending_chunks("run").unwrap().len(), 1);

        store.reset_all().unwrap();
        assert_eq!(store.stats().unwrap().live_chunks, 0);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        let d = doc("/corpus/a.txt", "h1");
        {
            let store = ChunkStore::open_in(dir.path()).unwrap();
            store.commit_generation(&d, &[chunk(&d, 0, "durable")]).unwrap();
            store
                .save_phase("run", Phase::Extraction, &PhaseState::NotStarted.start())
                .unwrap();
        }

        let store = ChunkStore::open_in(dir.path()).unwrap();
        assert_eq!(store.live_chunks().unwrap().len(), 1);
        let state = store.load_run_state("run").unwrap();
        assert_eq!(state.extraction.label(), "in_progress");
        assert!(state.last_checkpoint.is_some());
    }
}

//! SQLite persistence for targets, diagnostic runs, healing executions and
//! learned patterns.
//!
//! Single connection behind an async mutex; every statement runs on the
//! blocking pool. Structured fields (check results, diagnosis, execution
//! logs) are stored as JSON columns.

use chrono::{DateTime, SecondsFormat, Utc};
use healer_common::{
    DiagnosticExecution, HealerError, HealerResult, HealingExecution, HealingPattern, Target,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS targets (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS diagnostic_executions (
    id TEXT PRIMARY KEY,
    target_id TEXT NOT NULL,
    health_score INTEGER NOT NULL,
    triggered_by TEXT NOT NULL,
    results TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_diag_target ON diagnostic_executions(target_id, created_at);

CREATE TABLE IF NOT EXISTS healing_executions (
    id TEXT PRIMARY KEY,
    target_id TEXT NOT NULL,
    status TEXT NOT NULL,
    data TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_heal_target ON healing_executions(target_id, started_at);
CREATE INDEX IF NOT EXISTS idx_heal_status ON healing_executions(status);

CREATE TABLE IF NOT EXISTS healing_patterns (
    signature TEXT PRIMARY KEY,
    success_count INTEGER NOT NULL,
    failure_count INTEGER NOT NULL,
    confidence REAL NOT NULL,
    auto_approved INTEGER NOT NULL,
    data TEXT NOT NULL,
    last_used_at TEXT
);
";

#[derive(Clone)]
pub struct HealerDb {
    conn: Arc<Mutex<Connection>>,
}

impl HealerDb {
    /// Open or create the database file, creating parent directories
    pub async fn open(path: &Path) -> HealerResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HealerError::Internal(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        info!("Opening healer database at {}", path.display());

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> HealerResult<Connection> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(conn)
        })
        .await
        .map_err(join_error)??;

        Self::init(conn).await
    }

    pub async fn open_in_memory() -> HealerResult<Self> {
        Self::init(Connection::open_in_memory()?).await
    }

    async fn init(conn: Connection) -> HealerResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        debug!("Healer schema ready");
        Ok(db)
    }

    async fn with_conn<T, F>(&self, f: F) -> HealerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> HealerResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&*conn)
        })
        .await
        .map_err(join_error)?
    }

    // ========================================================================
    // Targets
    // ========================================================================

    pub async fn upsert_target(&self, target: &Target) -> HealerResult<()> {
        let id = target.id.clone();
        let data = serde_json::to_string(target)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO targets (id, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                params![id, data, ts(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_target(&self, id: &str) -> HealerResult<Option<Target>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row("SELECT data FROM targets WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
        })
        .await
    }

    pub async fn list_targets(&self) -> HealerResult<Vec<Target>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM targets ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut targets = Vec::new();
            for row in rows {
                targets.push(serde_json::from_str(&row?)?);
            }
            Ok(targets)
        })
        .await
    }

    // ========================================================================
    // Diagnostic executions
    // ========================================================================

    pub async fn insert_diagnostic(&self, execution: &DiagnosticExecution) -> HealerResult<()> {
        let execution = execution.clone();
        let results = serde_json::to_string(&execution.results)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO diagnostic_executions
                 (id, target_id, health_score, triggered_by, results, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    execution.id,
                    execution.target_id,
                    execution.health_score,
                    execution.triggered_by,
                    results,
                    ts(execution.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_diagnostic(&self, id: &str) -> HealerResult<Option<DiagnosticExecution>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, target_id, health_score, triggered_by, results, created_at
                 FROM diagnostic_executions WHERE id = ?1",
                params![id],
                diagnostic_row,
            )
            .optional()?
            .map(finish_diagnostic)
            .transpose()
        })
        .await
    }

    /// Newest first
    pub async fn list_diagnostics(
        &self,
        target_id: &str,
        limit: usize,
    ) -> HealerResult<Vec<DiagnosticExecution>> {
        let target_id = target_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, target_id, health_score, triggered_by, results, created_at
                 FROM diagnostic_executions WHERE target_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![target_id, limit as i64], diagnostic_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(finish_diagnostic(row?)?);
            }
            Ok(out)
        })
        .await
    }

    // ========================================================================
    // Healing executions
    // ========================================================================

    pub async fn save_execution(&self, execution: &HealingExecution) -> HealerResult<()> {
        let data = serde_json::to_string(execution)?;
        let id = execution.id.clone();
        let target_id = execution.target_id.clone();
        let status = execution.status.as_str();
        let started_at = ts(execution.started_at);
        let finished_at = execution.finished_at.map(ts);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO healing_executions (id, target_id, status, data, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    data = excluded.data,
                    finished_at = excluded.finished_at",
                params![id, target_id, status, data, started_at, finished_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_execution(&self, id: &str) -> HealerResult<Option<HealingExecution>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM healing_executions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
        })
        .await
    }

    /// Newest first
    pub async fn list_executions(
        &self,
        target_id: &str,
        limit: usize,
    ) -> HealerResult<Vec<HealingExecution>> {
        let target_id = target_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM healing_executions WHERE target_id = ?1
                 ORDER BY started_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![target_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(serde_json::from_str(&row?)?);
            }
            Ok(out)
        })
        .await
    }

    /// Executions not in a terminal status, oldest first
    pub async fn active_executions(&self) -> HealerResult<Vec<HealingExecution>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM healing_executions
                 WHERE status NOT IN ('HEALTHY', 'SUCCESS', 'FAILED', 'ROLLED_BACK')
                 ORDER BY started_at",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(serde_json::from_str(&row?)?);
            }
            Ok(out)
        })
        .await
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    pub async fn upsert_pattern(&self, pattern: &HealingPattern) -> HealerResult<()> {
        let data = serde_json::to_string(pattern)?;
        let p = pattern.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO healing_patterns
                 (signature, success_count, failure_count, confidence, auto_approved, data, last_used_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(signature) DO UPDATE SET
                    success_count = excluded.success_count,
                    failure_count = excluded.failure_count,
                    confidence = excluded.confidence,
                    auto_approved = excluded.auto_approved,
                    data = excluded.data,
                    last_used_at = excluded.last_used_at",
                params![
                    p.id,
                    p.success_count,
                    p.failure_count,
                    p.confidence,
                    p.auto_approved,
                    data,
                    p.last_used_at.map(ts),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_patterns(&self) -> HealerResult<Vec<HealingPattern>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM healing_patterns ORDER BY signature")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(serde_json::from_str(&row?)?);
            }
            Ok(out)
        })
        .await
    }
}

type DiagnosticRow = (String, String, u8, String, String, String);

fn diagnostic_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DiagnosticRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn finish_diagnostic(row: DiagnosticRow) -> HealerResult<DiagnosticExecution> {
    let (id, target_id, health_score, triggered_by, results, created_at) = row;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| HealerError::Internal(format!("bad timestamp {}: {}", created_at, e)))?
        .with_timezone(&Utc);
    Ok(DiagnosticExecution {
        id,
        target_id,
        results: serde_json::from_str(&results)?,
        health_score,
        triggered_by,
        created_at,
    })
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn join_error(e: tokio::task::JoinError) -> HealerError {
    HealerError::Internal(format!("database task failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use healer_common::{
        CheckCategory, CheckResult, CheckStatus, DiagnosisType, HealingMode, HealingStatus,
        PatternSignature, RiskLevel,
    };
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_target_roundtrip_and_update() {
        let db = HealerDb::open_in_memory().await.unwrap();
        let mut target = Target::new("blog", "https://blog.test", "/srv/blog");
        db.upsert_target(&target).await.unwrap();

        target.healing_mode = HealingMode::FullAuto;
        target.current_healing_attempts = 2;
        db.upsert_target(&target).await.unwrap();

        let loaded = db.get_target("blog").await.unwrap().unwrap();
        assert_eq!(loaded, target);
        assert!(db.get_target("missing").await.unwrap().is_none());
        assert_eq!(db.list_targets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_diagnostics_newest_first() {
        let db = HealerDb::open_in_memory().await.unwrap();
        let result = CheckResult::new(
            "site_reachable",
            CheckCategory::Availability,
            RiskLevel::Critical,
            CheckStatus::Pass,
            "200",
        );
        let mut first = DiagnosticExecution::new("blog", vec![result.clone()], "test");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = DiagnosticExecution::new("blog", vec![result], "test");
        db.insert_diagnostic(&first).await.unwrap();
        db.insert_diagnostic(&second).await.unwrap();

        let listed = db.list_diagnostics("blog", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].results, first.results);

        let fetched = db.get_diagnostic(&first.id).await.unwrap().unwrap();
        assert_eq!(fetched.health_score, 100);
    }

    #[tokio::test]
    async fn test_execution_save_is_upsert() {
        let db = HealerDb::open_in_memory().await.unwrap();
        let target = Target::new("blog", "https://blog.test", "/srv/blog");
        let mut execution = HealingExecution::new(&target, "operator");
        execution.status = HealingStatus::AwaitingApproval;
        db.save_execution(&execution).await.unwrap();
        assert_eq!(db.active_executions().await.unwrap().len(), 1);

        execution.status = HealingStatus::Failed;
        execution.finished_at = Some(Utc::now());
        db.save_execution(&execution).await.unwrap();

        let loaded = db.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, HealingStatus::Failed);
        assert!(db.active_executions().await.unwrap().is_empty());
        assert_eq!(db.list_executions("blog", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_patterns_persist_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("healer.db");
        let sig = PatternSignature::new(DiagnosisType::Maintenance, "maintenance_flag", None);
        let mut pattern = HealingPattern::new(sig, vec!["rm -f /srv/.maintenance".into()]);
        pattern.success_count = 4;
        pattern.confidence = 1.0;
        pattern.auto_approved = true;

        {
            let db = HealerDb::open(&path).await.unwrap();
            db.upsert_pattern(&pattern).await.unwrap();
        }

        let db = HealerDb::open(&path).await.unwrap();
        let patterns = db.list_patterns().await.unwrap();
        assert_eq!(patterns, vec![pattern]);
    }
}

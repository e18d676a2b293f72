use super::{LoadOutcome, SqliteGraphStore};
use crate::error::PipelineResult;
use chrono::Utc;
use rusqlite::params;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadRunRecord {
    pub load_id: String,
    pub status: String,
    pub detail: Option<String>,
}

impl SqliteGraphStore {
    // ── Load ledger ────────────────────────────────────────────────

    pub(super) fn insert_load_run(&self, load_id: &str) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO load_run (load_id, database, status, started_at)
             VALUES (?1, ?2, 'started', ?3)",
            params![load_id, self.database, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub(super) fn update_load_run(
        &self,
        load_id: &str,
        outcome: &LoadOutcome,
    ) -> PipelineResult<()> {
        let (status, detail) = match outcome {
            LoadOutcome::Completed => ("completed", None),
            LoadOutcome::Failed(reason) => ("failed", Some(reason.as_str())),
        };
        self.conn.execute(
            "UPDATE load_run SET status = ?2, detail = ?3, finished_at = ?4 WHERE load_id = ?1",
            params![load_id, status, detail, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Every load recorded against this database, oldest first.
    pub fn load_runs(&self) -> PipelineResult<Vec<LoadRunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT load_id, status, detail FROM load_run
             WHERE database = ?1 ORDER BY started_at ASC, rowid ASC",
        )?;
        let runs = stmt
            .query_map(params![self.database], |row| {
                Ok(LoadRunRecord {
                    load_id: row.get(0)?,
                    status: row.get(1)?,
                    detail: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

//! Graph store: the property graph the loader writes into.
//!
//! RULE: Only the store talks to the database.
//! The loader calls GraphStore methods; it never executes SQL directly.
//!
//! The shipped backend is an embedded SQLite property graph. Nodes are
//! unique on (database, label, key) and relationships on
//! (database, type, src, dst), so every write is a MERGE: match by key
//! or create, never an unconditional insert.

use crate::{
    bronze::TransactionRecord,
    config::StoreConfig,
    error::{PipelineError, PipelineResult},
    graph_schema::{NodeLabel, RelType},
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

mod ledger;
mod nodes;
mod transactions;

pub use ledger::LoadRunRecord;

/// One node to merge: its unique key plus the properties to SET.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub key: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Completed,
    Failed(String),
}

/// The contract the graph loader writes through.
pub trait GraphStore {
    /// Checked before the first write: reachable, schema present,
    /// credentials accepted.
    fn verify_connectivity(&self) -> PipelineResult<()>;

    /// Record the start of a load in the store's ledger.
    fn begin_load(&mut self, load_id: &str) -> PipelineResult<()>;

    fn finish_load(&mut self, load_id: &str, outcome: &LoadOutcome) -> PipelineResult<()>;

    /// Merge one batch of nodes atomically. Returns rows processed.
    fn merge_nodes(&mut self, label: NodeLabel, rows: &[NodeRow]) -> PipelineResult<usize>;

    /// Merge one batch of transactions and their six relationships
    /// atomically. Any unresolved reference rolls back the whole batch.
    fn merge_transactions(&mut self, rows: &[TransactionRecord]) -> PipelineResult<usize>;

    fn node_count(&self, label: NodeLabel) -> PipelineResult<u64>;

    fn relationship_count(&self, rel: RelType) -> PipelineResult<u64>;
}

pub struct SqliteGraphStore {
    conn: Connection,
    database: String,
    credentials: Option<(String, String)>,
}

impl SqliteGraphStore {
    /// Open an existing store. Never creates the file: a missing store
    /// is a connectivity failure, not an empty graph.
    pub fn open(cfg: &StoreConfig) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            cfg.path(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| PipelineError::Connectivity(format!("cannot open {}: {e}", cfg.uri)))?;
        Self::configure(conn, cfg)
    }

    /// Open or create the store file (used by schema setup).
    pub fn create(cfg: &StoreConfig) -> PipelineResult<Self> {
        let path = std::path::Path::new(cfg.path());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PipelineError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::configure(conn, cfg)
    }

    fn configure(conn: Connection, cfg: &StoreConfig) -> PipelineResult<Self> {
        // WAL mode only matters for real files.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            database: cfg.database.clone(),
            credentials: Some((cfg.user.clone(), cfg.password.clone())),
        })
    }

    /// Open an in-memory store (used in tests). Call migrate() before loading.
    pub fn in_memory(database: &str) -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            database: database.to_string(),
            credentials: None,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Schema setup: uniqueness constraints and indexes. Idempotent.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_graph_schema.sql"))?;
        Ok(())
    }

    /// Register (or update) a principal. Once any principal exists,
    /// connections must present matching credentials.
    pub fn register_principal(&self, user: &str, password: &str) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO graph_principal (username, password) VALUES (?1, ?2)
             ON CONFLICT(username) DO UPDATE SET password = excluded.password",
            params![user, password],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> PipelineResult<Option<String>> {
        let version = self
            .conn
            .query_row(
                "SELECT meta_value FROM graph_meta WHERE meta_key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    fn check_credentials(&self) -> PipelineResult<()> {
        let principals: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM graph_principal", [], |row| row.get(0))?;
        if principals == 0 {
            return Ok(());
        }
        let (user, password) = self.credentials.as_ref().ok_or_else(|| {
            PipelineError::Connectivity("store requires credentials, none supplied".into())
        })?;
        let accepted = self
            .conn
            .query_row(
                "SELECT 1 FROM graph_principal WHERE username = ?1 AND password = ?2",
                params![user, password],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if accepted {
            Ok(())
        } else {
            Err(PipelineError::Connectivity(format!(
                "authentication failed for user '{user}'"
            )))
        }
    }
}

impl GraphStore for SqliteGraphStore {
    fn verify_connectivity(&self) -> PipelineResult<()> {
        let version = self.schema_version().map_err(|e| {
            PipelineError::Connectivity(format!(
                "graph schema not initialised ({e}); run `ringgraph setup` first"
            ))
        })?;
        let version = version.ok_or_else(|| {
            PipelineError::Connectivity(
                "graph schema version missing; run `ringgraph setup` first".into(),
            )
        })?;
        self.check_credentials()?;
        log::debug!(
            "graph store reachable (schema v{version}, database '{}')",
            self.database
        );
        Ok(())
    }

    fn begin_load(&mut self, load_id: &str) -> PipelineResult<()> {
        self.insert_load_run(load_id)
    }

    fn finish_load(&mut self, load_id: &str, outcome: &LoadOutcome) -> PipelineResult<()> {
        self.update_load_run(load_id, outcome)
    }

    fn merge_nodes(&mut self, label: NodeLabel, rows: &[NodeRow]) -> PipelineResult<usize> {
        self.merge_node_batch(label, rows)
    }

    fn merge_transactions(&mut self, rows: &[TransactionRecord]) -> PipelineResult<usize> {
        self.merge_transaction_batch(rows)
    }

    fn node_count(&self, label: NodeLabel) -> PipelineResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM node WHERE database = ?1 AND label = ?2",
            params![self.database, label.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn relationship_count(&self, rel: RelType) -> PipelineResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM relationship WHERE database = ?1 AND rel_type = ?2",
            params![self.database, rel.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

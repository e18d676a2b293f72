use super::{NodeRow, SqliteGraphStore};
use crate::{error::PipelineResult, graph_schema::NodeLabel};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

/// MERGE on (database, label, key); SET merges the new properties into
/// whatever the node already holds.
pub(super) const MERGE_NODE_SQL: &str =
    "INSERT INTO node (database, label, node_key, properties) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(database, label, node_key)
     DO UPDATE SET properties = json_patch(node.properties, excluded.properties)";

impl SqliteGraphStore {
    // ── Node merge ─────────────────────────────────────────────────

    pub(super) fn merge_node_batch(
        &mut self,
        label: NodeLabel,
        rows: &[NodeRow],
    ) -> PipelineResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(MERGE_NODE_SQL)?;
            for row in rows {
                let properties = serde_json::to_string(&row.properties)?;
                stmt.execute(params![self.database, label.as_str(), row.key, properties])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    // ── Node reads ─────────────────────────────────────────────────

    /// Properties of one node, or None if no node has that key.
    pub fn node_properties(&self, label: NodeLabel, key: &str) -> PipelineResult<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT properties FROM node WHERE database = ?1 AND label = ?2 AND node_key = ?3",
                params![self.database, label.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(Into::into)
    }

    /// Keys of every node with `label`, in key order.
    pub fn node_keys(&self, label: NodeLabel) -> PipelineResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT node_key FROM node WHERE database = ?1 AND label = ?2 ORDER BY node_key",
        )?;
        let keys = stmt
            .query_map(params![self.database, label.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

use super::{nodes::MERGE_NODE_SQL, SqliteGraphStore};
use crate::{
    bronze::TransactionRecord,
    error::{PipelineError, PipelineResult},
    graph_schema::{NodeLabel, RelType},
};
use chrono::SecondsFormat;
use rusqlite::{params, OptionalExtension};

const LOOKUP_NODE_SQL: &str =
    "SELECT node_id FROM node WHERE database = ?1 AND label = ?2 AND node_key = ?3";

const MERGE_RELATIONSHIP_SQL: &str =
    "INSERT OR IGNORE INTO relationship (database, rel_type, src_id, dst_id)
     VALUES (?1, ?2, ?3, ?4)";

/// The key a transaction holds for the far end of `rel`.
pub(crate) fn reference(tx: &TransactionRecord, rel: RelType) -> &str {
    match rel {
        RelType::Made => &tx.person_id,
        RelType::ToMerchant => &tx.merchant_id,
        RelType::UsedDevice => &tx.device_id,
        RelType::FromIp => &tx.ip,
        RelType::PaidWith => &tx.card_hash,
        RelType::BilledTo => &tx.address_hash,
    }
}

pub(crate) fn transaction_properties(tx: &TransactionRecord) -> serde_json::Value {
    serde_json::json!({
        "tx_id": tx.tx_id,
        "ts": tx.ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        "amount": tx.amount,
        "currency": tx.currency,
        "is_fraud": tx.is_fraud,
    })
}

impl SqliteGraphStore {
    // ── Transaction merge ──────────────────────────────────────────

    /// All six endpoints of a row are resolved before anything for that
    /// row is written. Returning early drops the SQLite transaction,
    /// which rolls back every row of the batch.
    pub(super) fn merge_transaction_batch(
        &mut self,
        rows: &[TransactionRecord],
    ) -> PipelineResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut lookup = tx.prepare_cached(LOOKUP_NODE_SQL)?;
            let mut merge_node = tx.prepare_cached(&format!("{MERGE_NODE_SQL} RETURNING node_id"))?;
            let mut merge_rel = tx.prepare_cached(MERGE_RELATIONSHIP_SQL)?;

            for row in rows {
                let mut endpoints = Vec::with_capacity(RelType::ALL.len());
                for rel in RelType::ALL {
                    let label = rel.counterpart();
                    let key = reference(row, rel);
                    let node_id: Option<i64> = lookup
                        .query_row(params![self.database, label.as_str(), key], |r| r.get(0))
                        .optional()?;
                    match node_id {
                        Some(id) => endpoints.push((rel, id)),
                        None => {
                            return Err(PipelineError::MissingReference {
                                tx_id: row.tx_id.clone(),
                                label: label.as_str(),
                                key: key.to_string(),
                            })
                        }
                    }
                }

                let properties = serde_json::to_string(&transaction_properties(row))?;
                let tx_node: i64 = merge_node.query_row(
                    params![
                        self.database,
                        NodeLabel::Transaction.as_str(),
                        row.tx_id,
                        properties
                    ],
                    |r| r.get(0),
                )?;

                for (rel, other) in endpoints {
                    let (src, dst) = match rel {
                        RelType::Made => (other, tx_node),
                        _ => (tx_node, other),
                    };
                    merge_rel.execute(params![self.database, rel.as_str(), src, dst])?;
                }
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// (relationship type, far-end key) for every edge of one transaction.
    pub fn transaction_edges(&self, tx_id: &str) -> PipelineResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.rel_type, other.node_key
             FROM node t
             JOIN relationship r
               ON r.database = t.database
              AND ((r.src_id = t.node_id AND r.rel_type != 'MADE')
                OR (r.dst_id = t.node_id AND r.rel_type = 'MADE'))
             JOIN node other
               ON other.node_id = CASE WHEN r.rel_type = 'MADE' THEN r.src_id ELSE r.dst_id END
             WHERE t.database = ?1 AND t.label = 'Transaction' AND t.node_key = ?2
             ORDER BY r.rel_type",
        )?;
        let edges = stmt
            .query_map(params![self.database, tx_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}

//! Bulk load of the bronze tables into the property graph.
//!
//! PHASES (fixed order):
//!   1. Entity nodes: Person, Merchant, Device, IP, Card, Address,
//!      merged by key in fixed-size batches.
//!   2. Transactions: merged by tx_id together with their six
//!      relationships, in fixed-size batches. Starts only after every
//!      phase 1 batch has committed.
//!
//! Batch boundaries carry no meaning; the chunk sizes only bound the
//! size of each store transaction. The first failing batch aborts the
//! load and is reported with its stage, index and first key.

use crate::{
    bronze::{BronzeDir, Dataset, TransactionRecord},
    config::LoadConfig,
    error::{PipelineError, PipelineResult},
    graph_schema::{NodeLabel, RelType},
    store::{GraphStore, LoadOutcome, NodeRow},
};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub load_id: String,
    /// Rows sent per entity label, in load order.
    pub node_rows: Vec<(NodeLabel, usize)>,
    pub node_batches: usize,
    pub transaction_rows: usize,
    pub transaction_batches: usize,
    pub counts: GraphCounts,
}

/// Node and relationship totals as the store reports them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphCounts {
    pub nodes: Vec<(NodeLabel, u64)>,
    pub relationships: Vec<(RelType, u64)>,
}

impl GraphCounts {
    pub fn read<S: GraphStore + ?Sized>(store: &S) -> PipelineResult<Self> {
        let nodes = NodeLabel::ALL
            .into_iter()
            .map(|label| Ok((label, store.node_count(label)?)))
            .collect::<PipelineResult<Vec<_>>>()?;
        let relationships = RelType::ALL
            .into_iter()
            .map(|rel| Ok((rel, store.relationship_count(rel)?)))
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self {
            nodes,
            relationships,
        })
    }

    pub fn nodes_of(&self, label: NodeLabel) -> u64 {
        self.nodes
            .iter()
            .find(|(l, _)| *l == label)
            .map_or(0, |(_, n)| *n)
    }

    pub fn relationships_of(&self, rel: RelType) -> u64 {
        self.relationships
            .iter()
            .find(|(r, _)| *r == rel)
            .map_or(0, |(_, n)| *n)
    }

    pub fn total_nodes(&self) -> u64 {
        self.nodes.iter().map(|(_, n)| n).sum()
    }

    pub fn total_relationships(&self) -> u64 {
        self.relationships.iter().map(|(_, n)| n).sum()
    }
}

fn node_row(key: &str, label: NodeLabel, attributes: &[(&str, &str)]) -> NodeRow {
    let mut properties = Map::new();
    properties.insert(label.key_property().into(), Value::from(key));
    for (name, value) in attributes {
        properties.insert((*name).into(), Value::from(*value));
    }
    NodeRow {
        key: key.to_string(),
        properties,
    }
}

/// Node rows for every entity label, in phase 1 order.
pub fn entity_node_rows(dataset: &Dataset) -> Vec<(NodeLabel, Vec<NodeRow>)> {
    use NodeLabel::*;
    vec![
        (
            Person,
            dataset
                .people
                .iter()
                .map(|p| node_row(&p.person_id, Person, &[]))
                .collect(),
        ),
        (
            Merchant,
            dataset
                .merchants
                .iter()
                .map(|m| {
                    node_row(
                        &m.merchant_id,
                        Merchant,
                        &[("mcc", m.mcc.as_str()), ("country", m.country.as_str())],
                    )
                })
                .collect(),
        ),
        (
            Device,
            dataset
                .devices
                .iter()
                .map(|d| node_row(&d.device_id, Device, &[("device_type", d.device_type.as_str())]))
                .collect(),
        ),
        (
            Ip,
            dataset.ips.iter().map(|i| node_row(&i.ip, Ip, &[])).collect(),
        ),
        (
            Card,
            dataset
                .cards
                .iter()
                .map(|c| node_row(&c.card_hash, Card, &[]))
                .collect(),
        ),
        (
            Address,
            dataset
                .addresses
                .iter()
                .map(|a| node_row(&a.address_hash, Address, &[("postcode", a.postcode.as_str())]))
                .collect(),
        ),
    ]
}

pub struct GraphLoader<'s, S: GraphStore> {
    store: &'s mut S,
    config: LoadConfig,
}

impl<'s, S: GraphStore> GraphLoader<'s, S> {
    pub fn new(store: &'s mut S, config: LoadConfig) -> Self {
        Self { store, config }
    }

    /// Check the store is reachable, then run both phases. The outcome is recorded in
    /// the store's load ledger either way.
    pub fn load(&mut self, dataset: &Dataset) -> PipelineResult<LoadReport> {
        if self.config.node_chunk_size == 0 || self.config.tx_chunk_size == 0 {
            return Err(PipelineError::config("load chunk sizes must be > 0"));
        }
        self.store.verify_connectivity()?;

        let load_id = Uuid::new_v4().to_string();
        self.store.begin_load(&load_id)?;
        log::info!("load {load_id} started");

        match self.run_phases(&load_id, dataset) {
            Ok(report) => {
                self.store.finish_load(&load_id, &LoadOutcome::Completed)?;
                log::info!(
                    "load {load_id} completed: {} nodes, {} relationships in store",
                    report.counts.total_nodes(),
                    report.counts.total_relationships()
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("load {load_id} failed: {e}");
                if let Err(ledger_err) = self
                    .store
                    .finish_load(&load_id, &LoadOutcome::Failed(e.to_string()))
                {
                    log::warn!("could not record failure of load {load_id}: {ledger_err}");
                }
                Err(e)
            }
        }
    }

    fn run_phases(&mut self, load_id: &str, dataset: &Dataset) -> PipelineResult<LoadReport> {
        let mut node_rows = Vec::with_capacity(NodeLabel::ENTITIES.len());
        let mut node_batches = 0;
        for (label, rows) in entity_node_rows(dataset) {
            node_batches += self.load_nodes(label, &rows)?;
            node_rows.push((label, rows.len()));
        }

        let transaction_batches = self.load_transactions(&dataset.transactions)?;

        Ok(LoadReport {
            load_id: load_id.to_string(),
            node_rows,
            node_batches,
            transaction_rows: dataset.transactions.len(),
            transaction_batches,
            counts: GraphCounts::read(&*self.store)?,
        })
    }

    /// Phase 1 for one label. Returns the number of batches sent.
    fn load_nodes(&mut self, label: NodeLabel, rows: &[NodeRow]) -> PipelineResult<usize> {
        let mut batches = 0;
        for (batch, chunk) in rows.chunks(self.config.node_chunk_size).enumerate() {
            self.store
                .merge_nodes(label, chunk)
                .map_err(|e| batch_failed(label.as_str(), batch, &chunk[0].key, e))?;
            log::debug!("{label}: batch {batch} merged {} rows", chunk.len());
            batches += 1;
        }
        log::info!("loaded {label}: {} rows in {batches} batches", rows.len());
        Ok(batches)
    }

    /// Phase 2. Returns the number of batches sent.
    fn load_transactions(&mut self, rows: &[TransactionRecord]) -> PipelineResult<usize> {
        let label = NodeLabel::Transaction;
        let mut batches = 0;
        for (batch, chunk) in rows.chunks(self.config.tx_chunk_size).enumerate() {
            self.store
                .merge_transactions(chunk)
                .map_err(|e| batch_failed(label.as_str(), batch, &chunk[0].tx_id, e))?;
            log::debug!("{label}: batch {batch} merged {} rows", chunk.len());
            batches += 1;
        }
        log::info!(
            "loaded {label} + relationships: {} rows in {batches} batches",
            rows.len()
        );
        Ok(batches)
    }
}

fn batch_failed(stage: &'static str, batch: usize, first_key: &str, e: PipelineError) -> PipelineError {
    PipelineError::BatchFailed {
        stage,
        batch,
        first_key: first_key.to_string(),
        source: Box::new(e),
    }
}

/// Read every bronze table, then load. A missing table fails before the
/// store is touched.
pub fn load_bronze<S: GraphStore>(
    bronze: &BronzeDir,
    store: &mut S,
    config: LoadConfig,
) -> PipelineResult<LoadReport> {
    let dataset = Dataset::read(bronze)?;
    GraphLoader::new(store, config).load(&dataset)
}

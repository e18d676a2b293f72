//! Stage trait and report.
//!
//! RULE: Every generation stage implements Stage.
//! The pipeline calls run() on each registered stage in
//! registration order. Execution order is fixed and documented
//! in pipeline.rs.

use crate::{
    bronze::{BronzeDir, BronzeTable},
    error::PipelineResult,
    rng::{StageRng, StageSlot},
};

/// The contract every generation stage must fulfill.
pub trait Stage {
    /// Stable slot; also selects the stage's RNG stream.
    fn slot(&self) -> StageSlot;

    fn name(&self) -> &'static str {
        self.slot().name()
    }

    /// Read this stage's inputs from `bronze`, write its outputs back.
    ///
    /// - `bronze`: the directory shared by every stage
    /// - `rng`:    this stage's deterministic RNG, fresh for every run
    fn run(&self, bronze: &BronzeDir, rng: &mut StageRng) -> PipelineResult<StageReport>;
}

/// What a stage wrote, for summaries and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: &'static str,
    pub tables: Vec<(BronzeTable, usize)>,
    pub notes: Vec<String>,
}

impl StageReport {
    pub fn new(slot: StageSlot) -> Self {
        Self {
            stage: slot.name(),
            tables: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn table(mut self, table: BronzeTable, rows: usize) -> Self {
        self.tables.push((table, rows));
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn rows_written(&self, table: BronzeTable) -> Option<usize> {
        self.tables
            .iter()
            .find(|(t, _)| *t == table)
            .map(|(_, rows)| *rows)
    }
}

//! The generation pipeline.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Entity generator   people, merchants, raw transactions
//!   2. Reuse sampler      infrastructure pools + references
//!   3. Ring injector      rings, coerced rows, labels
//!
//! The graph loader runs after these, against a store; see graph_loader.rs.
//!
//! RULES:
//!   - Stages communicate ONLY through bronze tables.
//!   - Every stage gets a fresh RNG from its own slot, so any stage can
//!     be rerun alone and reproduce its output exactly.

use crate::{
    bronze::BronzeDir,
    config::PipelineConfig,
    entity_generator::EntityGeneratorStage,
    error::PipelineResult,
    reuse_sampler::ReuseSamplerStage,
    ring_injector::RingInjectorStage,
    rng::{RngBank, StageSlot},
    stage::{Stage, StageReport},
};

pub struct Pipeline {
    pub seed: u64,
    rng_bank: RngBank,
    bronze: BronzeDir,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(seed: u64, bronze: BronzeDir) -> Self {
        Self {
            seed,
            rng_bank: RngBank::new(seed),
            bronze,
            stages: Vec::new(),
        }
    }

    /// Build a fully wired pipeline with every stage registered.
    /// The configuration is validated before anything is built.
    pub fn build(config: &PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let mut pipeline = Pipeline::new(config.seed, BronzeDir::new(&config.bronze_dir));

        // EXECUTION ORDER: fixed, documented, never reordered.
        pipeline.register(Box::new(EntityGeneratorStage::new(config)));
        pipeline.register(Box::new(ReuseSamplerStage::new(config)));
        pipeline.register(Box::new(RingInjectorStage::new(config)));
        Ok(pipeline)
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn bronze(&self) -> &BronzeDir {
        &self.bronze
    }

    /// Run one stage by slot.
    pub fn run_stage(&self, slot: StageSlot) -> PipelineResult<StageReport> {
        let stage = self
            .stages
            .iter()
            .find(|s| s.slot() == slot)
            .ok_or_else(|| anyhow::anyhow!("stage '{}' not registered", slot.name()))?;
        self.execute(stage.as_ref())
    }

    /// Run every stage in registration order, stopping at the first failure.
    pub fn run_all(&self) -> PipelineResult<Vec<StageReport>> {
        self.stages
            .iter()
            .map(|stage| self.execute(stage.as_ref()))
            .collect()
    }

    fn execute(&self, stage: &dyn Stage) -> PipelineResult<StageReport> {
        log::info!("stage {} starting (seed={})", stage.name(), self.seed);
        let mut rng = self.rng_bank.for_stage(stage.slot());
        let report = stage.run(&self.bronze, &mut rng).map_err(|e| {
            log::error!("stage {} failed: {e}", stage.name());
            e
        })?;
        log::info!("stage {} completed", stage.name());
        Ok(report)
    }
}

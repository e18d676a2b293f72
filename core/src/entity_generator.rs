//! Base entity generation: people, merchants and the raw transaction
//! table linking them.

use crate::{
    bronze::{BronzeDir, BronzeTable, MerchantRecord, PersonRecord, RawTransactionRecord},
    config::{GenerationConfig, PipelineConfig},
    error::{PipelineError, PipelineResult},
    rng::{StageRng, StageSlot},
    stage::{Stage, StageReport},
};
use chrono::Duration;

const SECONDS_PER_DAY: i64 = 60 * 60 * 24;

#[derive(Debug, Clone, Default)]
pub struct EntityTables {
    pub people: Vec<PersonRecord>,
    pub merchants: Vec<MerchantRecord>,
    pub transactions: Vec<RawTransactionRecord>,
}

pub fn person_id(index: usize) -> String {
    format!("P{index:06}")
}

pub fn merchant_id(index: usize) -> String {
    format!("M{index:05}")
}

pub fn tx_id(index: usize) -> String {
    format!("T{index:08}")
}

pub fn generate_people(cfg: &GenerationConfig) -> Vec<PersonRecord> {
    (0..cfg.n_people)
        .map(|i| PersonRecord {
            person_id: person_id(i),
        })
        .collect()
}

pub fn generate_merchants(cfg: &GenerationConfig, rng: &mut StageRng) -> Vec<MerchantRecord> {
    (0..cfg.n_merchants)
        .map(|i| MerchantRecord {
            merchant_id: merchant_id(i),
            mcc: rng.pick(&cfg.mccs).clone(),
            country: cfg.country.clone(),
        })
        .collect()
}

/// Amounts are uniform in the configured bounds, rounded to pennies.
fn round_to_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub fn generate_transactions(
    cfg: &GenerationConfig,
    people: &[PersonRecord],
    merchants: &[MerchantRecord],
    rng: &mut StageRng,
) -> PipelineResult<Vec<RawTransactionRecord>> {
    if people.is_empty() || merchants.is_empty() {
        return Err(PipelineError::config(
            "transactions need at least one person and one merchant",
        ));
    }
    let window_secs = i64::from(cfg.window_days) * SECONDS_PER_DAY;
    // Every draw lands in [start, end], so checking the end covers them all.
    cfg.window_start
        .checked_add_signed(Duration::seconds(window_secs))
        .ok_or_else(|| {
            PipelineError::config(format!(
                "window of {} days from {} exceeds the representable time range",
                cfg.window_days, cfg.window_start
            ))
        })?;

    // One pass per column keeps the draw order stable and matches how
    // the table is laid out on disk.
    let ts: Vec<_> = (0..cfg.n_transactions)
        .map(|_| cfg.window_start + Duration::seconds(rng.int_inclusive(0, window_secs)))
        .collect();
    let amounts: Vec<f64> = (0..cfg.n_transactions)
        .map(|_| round_to_currency(rng.uniform(cfg.amount_min, cfg.amount_max)))
        .collect();
    let person_refs: Vec<&PersonRecord> =
        (0..cfg.n_transactions).map(|_| rng.pick(people)).collect();
    let merchant_refs: Vec<&MerchantRecord> =
        (0..cfg.n_transactions).map(|_| rng.pick(merchants)).collect();

    let rows = (0..cfg.n_transactions)
        .map(|i| RawTransactionRecord {
            tx_id: tx_id(i),
            ts: ts[i],
            amount: amounts[i],
            currency: cfg.currency.clone(),
            person_id: person_refs[i].person_id.clone(),
            merchant_id: merchant_refs[i].merchant_id.clone(),
        })
        .collect();
    Ok(rows)
}

/// Generate all three base tables in memory.
pub fn generate(cfg: &GenerationConfig, rng: &mut StageRng) -> PipelineResult<EntityTables> {
    let people = generate_people(cfg);
    let merchants = generate_merchants(cfg, rng);
    let transactions = generate_transactions(cfg, &people, &merchants, rng)?;
    Ok(EntityTables {
        people,
        merchants,
        transactions,
    })
}

pub struct EntityGeneratorStage {
    config: GenerationConfig,
}

impl EntityGeneratorStage {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.generation.clone(),
        }
    }
}

impl Stage for EntityGeneratorStage {
    fn slot(&self) -> StageSlot {
        StageSlot::EntityGenerator
    }

    fn run(&self, bronze: &BronzeDir, rng: &mut StageRng) -> PipelineResult<StageReport> {
        let tables = generate(&self.config, rng)?;

        bronze.write(BronzeTable::People, &tables.people)?;
        bronze.write(BronzeTable::Merchants, &tables.merchants)?;
        bronze.write(BronzeTable::Transactions, &tables.transactions)?;

        log::info!(
            "generated {} people, {} merchants, {} transactions",
            tables.people.len(),
            tables.merchants.len(),
            tables.transactions.len()
        );
        Ok(StageReport::new(self.slot())
            .table(BronzeTable::People, tables.people.len())
            .table(BronzeTable::Merchants, tables.merchants.len())
            .table(BronzeTable::Transactions, tables.transactions.len()))
    }
}

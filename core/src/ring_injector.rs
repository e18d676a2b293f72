//! Collusion ring injection.
//!
//! Three steps, in a fixed RNG draw order:
//!   1. Partition a shuffled prefix of the people into disjoint rings.
//!   2. Give every ring one shared device, IP, card and address drawn
//!      from the hot prefix of each infrastructure pool, and one anchor
//!      timestamp drawn from the existing transactions.
//!   3. Coerce a fixed share of transactions into ring activity: ring
//!      member as owner, timestamp inside the ring's burst window, and
//!      each infrastructure facet independently swapped for the ring's
//!      shared value with its own probability.
//!
//! The coercions are collected as a row -> override plan first and only
//! then applied to the table, producing a new table. Coerced rows are
//! the only rows labeled `is_fraud = 1`.

use crate::{
    bronze::{BronzeDir, BronzeTable, PersonRecord, TransactionRecord},
    config::{HotPoolSpec, PipelineConfig, RingConfig},
    error::{PipelineError, PipelineResult},
    reuse_sampler::InfraPools,
    rng::{StageRng, StageSlot},
    stage::{Stage, StageReport},
    types::{EntityId, RowIndex, Timestamp},
};
use chrono::Duration;
use std::collections::BTreeMap;
use std::ops::Range;

// ── Ring arena ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedInfra {
    pub device_id: EntityId,
    pub ip: EntityId,
    pub card_hash: EntityId,
    pub address_hash: EntityId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RingRecord {
    /// Slice of `RingArena::member_ids` owned by this ring.
    pub members: Range<usize>,
    pub shared: SharedInfra,
    pub anchor: Timestamp,
}

/// All rings of one injection run. Members of every ring live in one
/// vector; each ring addresses its own contiguous slice of it.
#[derive(Debug, Clone, Default)]
pub struct RingArena {
    member_ids: Vec<EntityId>,
    rings: Vec<RingRecord>,
}

impl RingArena {
    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    pub fn ring(&self, index: usize) -> &RingRecord {
        &self.rings[index]
    }

    pub fn members(&self, index: usize) -> &[EntityId] {
        &self.member_ids[self.rings[index].members.clone()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RingRecord, &[EntityId])> {
        self.rings
            .iter()
            .map(|r| (r, &self.member_ids[r.members.clone()]))
    }

    pub fn total_members(&self) -> usize {
        self.member_ids.len()
    }

    pub fn ring_of(&self, person_id: &str) -> Option<usize> {
        (0..self.rings.len()).find(|&i| self.members(i).iter().any(|m| m == person_id))
    }
}

/// Shuffle the people and cut consecutive groups off the front.
/// Stops at `n_rings` or at the first drawn size that no longer fits.
/// Returns the partitioned prefix and one range per ring.
pub fn partition_rings(
    person_ids: &[EntityId],
    cfg: &RingConfig,
    rng: &mut StageRng,
) -> PipelineResult<(Vec<EntityId>, Vec<Range<usize>>)> {
    if cfg.ring_size_min == 0 || cfg.ring_size_min > cfg.ring_size_max {
        return Err(PipelineError::config(format!(
            "invalid ring size bounds [{}, {}]",
            cfg.ring_size_min, cfg.ring_size_max
        )));
    }

    let mut shuffled = person_ids.to_vec();
    rng.shuffle(&mut shuffled);

    let mut ranges = Vec::with_capacity(cfg.n_rings);
    let mut cursor = 0usize;
    for _ in 0..cfg.n_rings {
        let size =
            rng.int_inclusive(cfg.ring_size_min as i64, cfg.ring_size_max as i64) as usize;
        if cursor + size > shuffled.len() {
            break;
        }
        ranges.push(cursor..cursor + size);
        cursor += size;
    }

    if ranges.is_empty() {
        return Err(PipelineError::config(format!(
            "no rings created from {} people with sizes [{}, {}]; add people or shrink rings",
            person_ids.len(),
            cfg.ring_size_min,
            cfg.ring_size_max
        )));
    }
    if ranges.len() < cfg.n_rings {
        log::warn!(
            "built {} of {} requested rings; people pool exhausted",
            ranges.len(),
            cfg.n_rings
        );
    }

    shuffled.truncate(cursor);
    Ok((shuffled, ranges))
}

// ── Hot pools ──────────────────────────────────────────────────────

/// The first `max(minimum, fraction * |pool|)` entries, at least one
/// and never more than the pool.
pub fn hot_prefix<'a>(kind: &str, pool: &'a [String], spec: HotPoolSpec) -> PipelineResult<&'a [String]> {
    if pool.is_empty() {
        return Err(PipelineError::config(format!("empty {kind} pool")));
    }
    let wanted = spec
        .minimum
        .max((pool.len() as f64 * spec.fraction) as usize);
    if wanted > pool.len() {
        log::warn!("hot {kind} pool wants {wanted} entries, pool has {}", pool.len());
    }
    let k = wanted.clamp(1, pool.len());
    Ok(&pool[..k])
}

struct HotPools<'a> {
    devices: &'a [String],
    ips: &'a [String],
    cards: &'a [String],
    addresses: &'a [String],
}

impl HotPools<'_> {
    fn pick_shared(&self, rng: &mut StageRng) -> SharedInfra {
        SharedInfra {
            device_id: rng.pick(self.devices).clone(),
            ip: rng.pick(self.ips).clone(),
            card_hash: rng.pick(self.cards).clone(),
            address_hash: rng.pick(self.addresses).clone(),
        }
    }
}

// ── Coercion plan ──────────────────────────────────────────────────

/// Overrides for one coerced transaction. `None` facets keep the value
/// the reuse sampler assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Coercion {
    pub ring: usize,
    pub person_id: EntityId,
    pub ts: Timestamp,
    pub device_id: Option<EntityId>,
    pub ip: Option<EntityId>,
    pub card_hash: Option<EntityId>,
    pub address_hash: Option<EntityId>,
}

#[derive(Debug, Clone, Default)]
pub struct CoercionPlan {
    overrides: BTreeMap<RowIndex, Coercion>,
}

impl CoercionPlan {
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn get(&self, row: RowIndex) -> Option<&Coercion> {
        self.overrides.get(&row)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowIndex, &Coercion)> {
        self.overrides.iter()
    }

    /// Produce the injected table: coerced rows get their overrides and
    /// `is_fraud = 1`, every other row is copied with `is_fraud = 0`.
    pub fn apply(&self, table: &[TransactionRecord]) -> Vec<TransactionRecord> {
        table
            .iter()
            .enumerate()
            .map(|(row, tx)| {
                let mut out = tx.clone();
                match self.overrides.get(&row) {
                    Some(c) => {
                        out.person_id = c.person_id.clone();
                        out.ts = c.ts;
                        if let Some(v) = &c.device_id {
                            out.device_id = v.clone();
                        }
                        if let Some(v) = &c.ip {
                            out.ip = v.clone();
                        }
                        if let Some(v) = &c.card_hash {
                            out.card_hash = v.clone();
                        }
                        if let Some(v) = &c.address_hash {
                            out.address_hash = v.clone();
                        }
                        out.is_fraud = 1;
                    }
                    None => out.is_fraud = 0,
                }
                out
            })
            .collect()
    }
}

/// Number of rows to coerce: floor(total * share).
pub fn fraud_row_count(total: usize, share: f64) -> usize {
    (total as f64 * share).floor() as usize
}

// ── Injection ──────────────────────────────────────────────────────

pub struct Injection {
    pub rings: RingArena,
    pub plan: CoercionPlan,
    pub transactions: Vec<TransactionRecord>,
}

pub fn inject(
    cfg: &RingConfig,
    people: &[PersonRecord],
    transactions: &[TransactionRecord],
    pools: &InfraPools,
    rng: &mut StageRng,
) -> PipelineResult<Injection> {
    let person_ids: Vec<EntityId> = people.iter().map(|p| p.person_id.clone()).collect();
    let (member_ids, ranges) = partition_rings(&person_ids, cfg, rng)?;

    let n_total = transactions.len();
    let n_fraud = fraud_row_count(n_total, cfg.fraud_tx_share);
    if n_fraud == 0 {
        return Err(PipelineError::config(format!(
            "fraud_tx_share {} over {n_total} transactions yields 0 fraud transactions",
            cfg.fraud_tx_share
        )));
    }
    if ranges.len() > n_total {
        return Err(PipelineError::config(format!(
            "{} rings need distinct anchor timestamps but there are only {n_total} transactions",
            ranges.len()
        )));
    }
    let fraud_rows = rng.sample_indices(n_total, n_fraud.min(n_total));

    let (device_ids, ip_values, card_hashes, address_hashes) = (
        pools.device_ids(),
        pools.ip_values(),
        pools.card_hashes(),
        pools.address_hashes(),
    );
    let hot = HotPools {
        devices: hot_prefix("device", &device_ids, cfg.hot_devices)?,
        ips: hot_prefix("ip", &ip_values, cfg.hot_ips)?,
        cards: hot_prefix("card", &card_hashes, cfg.hot_cards)?,
        addresses: hot_prefix("address", &address_hashes, cfg.hot_addresses)?,
    };
    let shared: Vec<SharedInfra> = ranges.iter().map(|_| hot.pick_shared(rng)).collect();

    // Anchors come from real timestamps so bursts stay inside the data's window.
    let anchors: Vec<Timestamp> = rng
        .sample_indices(n_total, ranges.len())
        .into_iter()
        .map(|row| transactions[row].ts)
        .collect();

    let rings = RingArena {
        member_ids,
        rings: ranges
            .into_iter()
            .zip(shared)
            .zip(anchors)
            .map(|((members, shared), anchor)| RingRecord {
                members,
                shared,
                anchor,
            })
            .collect(),
    };

    let burst = i64::from(cfg.burst_hours_window);
    let mut overrides = BTreeMap::new();
    for row in fraud_rows {
        let ring_index = rng.index_below(rings.len());
        let ring = rings.ring(ring_index);
        let person_id = rng.pick(rings.members(ring_index)).clone();
        let jitter = Duration::hours(rng.int_inclusive(-burst, burst));
        let ts = ring.anchor.checked_add_signed(jitter).ok_or_else(|| {
            PipelineError::config(format!(
                "burst of {} hours around {} exceeds the representable time range",
                cfg.burst_hours_window, ring.anchor
            ))
        })?;

        let device_id = rng
            .chance(cfg.shared_device_prob)
            .then(|| ring.shared.device_id.clone());
        let ip = rng.chance(cfg.shared_ip_prob).then(|| ring.shared.ip.clone());
        let card_hash = rng
            .chance(cfg.shared_card_prob)
            .then(|| ring.shared.card_hash.clone());
        let address_hash = rng
            .chance(cfg.shared_address_prob)
            .then(|| ring.shared.address_hash.clone());

        overrides.insert(
            row,
            Coercion {
                ring: ring_index,
                person_id,
                ts,
                device_id,
                ip,
                card_hash,
                address_hash,
            },
        );
    }

    let plan = CoercionPlan { overrides };
    let transactions = plan.apply(transactions);
    Ok(Injection {
        rings,
        plan,
        transactions,
    })
}

pub struct RingInjectorStage {
    config: RingConfig,
}

impl RingInjectorStage {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.rings.clone(),
        }
    }
}

impl Stage for RingInjectorStage {
    fn slot(&self) -> StageSlot {
        StageSlot::RingInjector
    }

    fn run(&self, bronze: &BronzeDir, rng: &mut StageRng) -> PipelineResult<StageReport> {
        bronze.require(&[
            BronzeTable::People,
            BronzeTable::Transactions,
            BronzeTable::Devices,
            BronzeTable::Ips,
            BronzeTable::Cards,
            BronzeTable::Addresses,
        ])?;
        let people: Vec<PersonRecord> = bronze.read(BronzeTable::People)?;
        let transactions: Vec<TransactionRecord> = bronze.read(BronzeTable::Transactions)?;
        let pools = InfraPools {
            devices: bronze.read(BronzeTable::Devices)?,
            ips: bronze.read(BronzeTable::Ips)?,
            cards: bronze.read(BronzeTable::Cards)?,
            addresses: bronze.read(BronzeTable::Addresses)?,
        };

        let injection = inject(&self.config, &people, &transactions, &pools, rng)?;
        bronze.write(BronzeTable::Transactions, &injection.transactions)?;

        let summary = format!(
            "injected {} fraud-ring transactions across {} rings ({} members)",
            injection.plan.len(),
            injection.rings.len(),
            injection.rings.total_members()
        );
        log::info!("{summary}");
        Ok(StageReport::new(self.slot())
            .table(BronzeTable::Transactions, injection.transactions.len())
            .note(summary))
    }
}

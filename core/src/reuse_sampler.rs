//! Infrastructure pools and the reuse concentration model.
//!
//! Every transaction gets one device, IP, card and address. With
//! probability `reuse_strength` the value comes from a small "hot"
//! prefix of the pool, otherwise from the whole pool. The hot prefix
//! is what makes the same infrastructure recur across unrelated
//! transactions without an explicit per-identifier distribution.

use crate::{
    bronze::{
        AddressRecord, BronzeDir, BronzeTable, CardRecord, DeviceRecord, IpRecord,
        RawTransactionRecord, TransactionRecord,
    },
    config::{InfraConfig, PipelineConfig},
    error::{PipelineError, PipelineResult},
    rng::{StageRng, StageSlot},
    stage::{Stage, StageReport},
};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Hot prefix bounds, as a fraction of the pool.
const HOT_FRACTION_MIN: f64 = 0.02;
const HOT_FRACTION_MAX: f64 = 0.2;
const HOT_POOL_MIN: usize = 10;

/// Host octet range used for every generated address.
const HOST_OCTET_MIN: u8 = 1;
const HOST_OCTET_MAX: u8 = 254;
const HOST_OCTETS: u64 = (HOST_OCTET_MAX - HOST_OCTET_MIN + 1) as u64;

/// Distinct addresses reachable by `random_private_ipv4`:
/// 10/8, 172.16/12 and 192.168/16 with the last octet in 1..=254.
pub const PRIVATE_IPV4_CAPACITY: u64 =
    256 * 256 * HOST_OCTETS + 16 * 256 * HOST_OCTETS + 256 * HOST_OCTETS;

pub fn device_id(index: usize) -> String {
    format!("D{index:07}")
}

pub fn card_hash(index: usize) -> String {
    format!("C{index:08}")
}

pub fn address_hash(index: usize) -> String {
    format!("A{index:07}")
}

/// Size of the hot prefix for a pool of `pool_len` entries.
pub fn hot_pool_size(pool_len: usize, reuse_strength: f64) -> usize {
    let fraction = reuse_strength.clamp(HOT_FRACTION_MIN, HOT_FRACTION_MAX);
    let k = ((pool_len as f64) * fraction) as usize;
    k.max(HOT_POOL_MIN).min(pool_len)
}

/// A pool of identifiers with its hot prefix precomputed.
pub struct ReusePool<'a> {
    pool: &'a [String],
    hot_len: usize,
    reuse_strength: f64,
}

impl<'a> ReusePool<'a> {
    pub fn new(kind: &str, pool: &'a [String], reuse_strength: f64) -> PipelineResult<Self> {
        if pool.is_empty() {
            return Err(PipelineError::config(format!("empty {kind} pool")));
        }
        Ok(Self {
            pool,
            hot_len: hot_pool_size(pool.len(), reuse_strength),
            reuse_strength,
        })
    }

    pub fn hot(&self) -> &'a [String] {
        &self.pool[..self.hot_len]
    }

    pub fn draw(&self, rng: &mut StageRng) -> &'a String {
        if rng.chance(self.reuse_strength) {
            rng.pick(self.hot())
        } else {
            rng.pick(self.pool)
        }
    }

    pub fn sample(&self, n: usize, rng: &mut StageRng) -> Vec<String> {
        (0..n).map(|_| self.draw(rng).clone()).collect()
    }
}

/// `n` references drawn from `pool` under the concentration model.
pub fn sample_with_reuse(
    kind: &str,
    pool: &[String],
    n: usize,
    reuse_strength: f64,
    rng: &mut StageRng,
) -> PipelineResult<Vec<String>> {
    Ok(ReusePool::new(kind, pool, reuse_strength)?.sample(n, rng))
}

/// One address from the private ranges. The top-level range is chosen
/// with equal probability, then the rest is uniform within it.
pub fn random_private_ipv4(rng: &mut StageRng) -> Ipv4Addr {
    match rng.index_below(3) {
        0 => Ipv4Addr::new(10, octet(rng, 0, 255), octet(rng, 0, 255), host(rng)),
        1 => Ipv4Addr::new(172, octet(rng, 16, 31), octet(rng, 0, 255), host(rng)),
        _ => Ipv4Addr::new(192, 168, octet(rng, 0, 255), host(rng)),
    }
}

fn host(rng: &mut StageRng) -> u8 {
    octet(rng, HOST_OCTET_MIN, HOST_OCTET_MAX)
}

fn octet(rng: &mut StageRng, lo: u8, hi: u8) -> u8 {
    rng.int_inclusive(i64::from(lo), i64::from(hi)) as u8
}

/// `n` distinct private addresses. Collisions are redrawn so the IP
/// table keys stay unique.
pub fn generate_ips(n: usize, rng: &mut StageRng) -> PipelineResult<Vec<String>> {
    if n as u64 > PRIVATE_IPV4_CAPACITY {
        return Err(PipelineError::config(format!(
            "cannot draw {n} distinct private IPv4 addresses"
        )));
    }
    let mut seen = HashSet::with_capacity(n);
    let mut out = Vec::with_capacity(n);
    let mut collisions = 0usize;
    while out.len() < n {
        let ip = random_private_ipv4(rng);
        if seen.insert(ip) {
            out.push(ip.to_string());
        } else {
            collisions += 1;
        }
    }
    if collisions > 0 {
        log::debug!("redrew {collisions} colliding IPs");
    }
    Ok(out)
}

/// The four infrastructure reference tables.
#[derive(Debug, Clone, Default)]
pub struct InfraPools {
    pub devices: Vec<DeviceRecord>,
    pub ips: Vec<IpRecord>,
    pub cards: Vec<CardRecord>,
    pub addresses: Vec<AddressRecord>,
}

impl InfraPools {
    pub fn generate(cfg: &InfraConfig, rng: &mut StageRng) -> PipelineResult<Self> {
        let devices = (0..cfg.n_devices)
            .map(|i| DeviceRecord {
                device_id: device_id(i),
                device_type: cfg.device_type.clone(),
            })
            .collect();
        let ips = generate_ips(cfg.n_ips, rng)?
            .into_iter()
            .map(|ip| IpRecord { ip })
            .collect();
        let cards = (0..cfg.n_cards)
            .map(|i| CardRecord {
                card_hash: card_hash(i),
            })
            .collect();
        let addresses = (0..cfg.n_addresses)
            .map(|i| AddressRecord {
                address_hash: address_hash(i),
                postcode: cfg.postcode.clone(),
            })
            .collect();
        Ok(Self {
            devices,
            ips,
            cards,
            addresses,
        })
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.device_id.clone()).collect()
    }

    pub fn ip_values(&self) -> Vec<String> {
        self.ips.iter().map(|i| i.ip.clone()).collect()
    }

    pub fn card_hashes(&self) -> Vec<String> {
        self.cards.iter().map(|c| c.card_hash.clone()).collect()
    }

    pub fn address_hashes(&self) -> Vec<String> {
        self.addresses.iter().map(|a| a.address_hash.clone()).collect()
    }
}

/// Attach one reference per infrastructure kind to every transaction.
/// Labels are reset: a previous injection no longer matches the new
/// references.
pub fn enrich(
    cfg: &InfraConfig,
    transactions: &[RawTransactionRecord],
    rng: &mut StageRng,
) -> PipelineResult<(InfraPools, Vec<TransactionRecord>)> {
    let pools = InfraPools::generate(cfg, rng)?;
    let n = transactions.len();
    let strength = cfg.reuse_strength;

    let devices = sample_with_reuse("device", &pools.device_ids(), n, strength, rng)?;
    let ips = sample_with_reuse("ip", &pools.ip_values(), n, strength, rng)?;
    let cards = sample_with_reuse("card", &pools.card_hashes(), n, strength, rng)?;
    let addresses = sample_with_reuse("address", &pools.address_hashes(), n, strength, rng)?;

    let enriched = transactions
        .iter()
        .zip(devices)
        .zip(ips)
        .zip(cards)
        .zip(addresses)
        .map(|((((tx, device_id), ip), card_hash), address_hash)| TransactionRecord {
            tx_id: tx.tx_id.clone(),
            ts: tx.ts,
            amount: tx.amount,
            currency: tx.currency.clone(),
            person_id: tx.person_id.clone(),
            merchant_id: tx.merchant_id.clone(),
            device_id,
            ip,
            card_hash,
            address_hash,
            is_fraud: 0,
        })
        .collect();
    Ok((pools, enriched))
}

pub struct ReuseSamplerStage {
    config: InfraConfig,
}

impl ReuseSamplerStage {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.infra.clone(),
        }
    }
}

impl Stage for ReuseSamplerStage {
    fn slot(&self) -> StageSlot {
        StageSlot::ReuseSampler
    }

    fn run(&self, bronze: &BronzeDir, rng: &mut StageRng) -> PipelineResult<StageReport> {
        let raw: Vec<RawTransactionRecord> = bronze.read(BronzeTable::Transactions)?;
        let (pools, transactions) = enrich(&self.config, &raw, rng)?;

        bronze.write(BronzeTable::Devices, &pools.devices)?;
        bronze.write(BronzeTable::Ips, &pools.ips)?;
        bronze.write(BronzeTable::Cards, &pools.cards)?;
        bronze.write(BronzeTable::Addresses, &pools.addresses)?;
        bronze.write(BronzeTable::Transactions, &transactions)?;

        log::info!(
            "enriched {} transactions from {} devices, {} ips, {} cards, {} addresses (reuse_strength={})",
            transactions.len(),
            pools.devices.len(),
            pools.ips.len(),
            pools.cards.len(),
            pools.addresses.len(),
            self.config.reuse_strength
        );
        Ok(StageReport::new(self.slot())
            .table(BronzeTable::Devices, pools.devices.len())
            .table(BronzeTable::Ips, pools.ips.len())
            .table(BronzeTable::Cards, pools.cards.len())
            .table(BronzeTable::Addresses, pools.addresses.len())
            .table(BronzeTable::Transactions, transactions.len()))
    }
}

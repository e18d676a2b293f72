use crate::error::{PipelineError, PipelineResult};
use crate::types::Timestamp;
use chrono::{DateTime, Duration};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Entity generation ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub n_people: usize,
    pub n_merchants: usize,
    pub n_transactions: usize,
    pub window_start: Timestamp,
    pub window_days: u32,
    pub amount_min: f64,
    pub amount_max: f64,
    pub currency: String,
    pub country: String,
    /// Grocery, restaurant, misc retail, electronics, transit, telecom, ATM.
    pub mccs: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            n_people: 2_000,
            n_merchants: 120,
            n_transactions: 50_000,
            // 2025-01-01T00:00:00Z
            window_start: DateTime::UNIX_EPOCH + Duration::seconds(1_735_689_600),
            window_days: 30,
            amount_min: 1.5,
            amount_max: 400.0,
            currency: "GBP".into(),
            country: "GB".into(),
            mccs: ["5411", "5812", "5999", "5732", "4111", "4814", "6011"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

// ── Infrastructure pools and reuse ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfraConfig {
    pub n_devices: usize,
    pub n_ips: usize,
    pub n_cards: usize,
    pub n_addresses: usize,
    /// 0 => near-uniform sampling, 1 => heavy preference for the hot prefix.
    pub reuse_strength: f64,
    pub device_type: String,
    pub postcode: String,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            n_devices: 2_500,
            n_ips: 1_800,
            n_cards: 2_200,
            n_addresses: 1_600,
            reuse_strength: 0.25,
            device_type: "mobile".into(),
            postcode: "UK".into(),
        }
    }
}

// ── Ring injection ─────────────────────────────────────────────────

/// Hot pool sizing: the first `max(minimum, fraction * |pool|)` entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HotPoolSpec {
    pub fraction: f64,
    pub minimum: usize,
}

impl HotPoolSpec {
    pub const fn new(fraction: f64, minimum: usize) -> Self {
        Self { fraction, minimum }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub n_rings: usize,
    pub ring_size_min: usize,
    pub ring_size_max: usize,
    /// Fraction of all transactions coerced into ring activity.
    pub fraud_tx_share: f64,
    pub shared_device_prob: f64,
    pub shared_ip_prob: f64,
    pub shared_card_prob: f64,
    pub shared_address_prob: f64,
    pub burst_hours_window: u32,
    pub hot_devices: HotPoolSpec,
    pub hot_ips: HotPoolSpec,
    pub hot_cards: HotPoolSpec,
    pub hot_addresses: HotPoolSpec,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            n_rings: 12,
            ring_size_min: 6,
            ring_size_max: 20,
            fraud_tx_share: 0.08,
            shared_device_prob: 0.70,
            shared_ip_prob: 0.55,
            shared_card_prob: 0.35,
            shared_address_prob: 0.45,
            burst_hours_window: 48,
            hot_devices: HotPoolSpec::new(0.03, 30),
            hot_ips: HotPoolSpec::new(0.04, 40),
            hot_cards: HotPoolSpec::new(0.03, 30),
            hot_addresses: HotPoolSpec::new(0.03, 25),
        }
    }
}

// ── Graph load ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub node_chunk_size: usize,
    /// Transaction rows fan out into seven writes each, so batches stay smaller.
    pub tx_chunk_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            node_chunk_size: 5_000,
            tx_chunk_size: 1_500,
        }
    }
}

// ── Graph store connection ─────────────────────────────────────────

pub const ENV_GRAPH_URI: &str = "RINGGRAPH_GRAPH_URI";
pub const ENV_GRAPH_USER: &str = "RINGGRAPH_GRAPH_USER";
pub const ENV_GRAPH_PASSWORD: &str = "RINGGRAPH_GRAPH_PASSWORD";
pub const ENV_GRAPH_DATABASE: &str = "RINGGRAPH_GRAPH_DATABASE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "sqlite://data/graph.db".into(),
            user: "ringgraph".into(),
            password: "password123".into(),
            database: "ringgraph".into(),
        }
    }
}

impl StoreConfig {
    /// Read connection parameters from the environment, falling back
    /// to the documented defaults for anything unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable lookup (used in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            uri: lookup(ENV_GRAPH_URI).unwrap_or(defaults.uri),
            user: lookup(ENV_GRAPH_USER).unwrap_or(defaults.user),
            password: lookup(ENV_GRAPH_PASSWORD).unwrap_or(defaults.password),
            database: lookup(ENV_GRAPH_DATABASE).unwrap_or(defaults.database),
        }
    }

    /// Filesystem path addressed by the URI. Accepts `sqlite://path`
    /// or a bare path.
    pub fn path(&self) -> &str {
        self.uri.strip_prefix("sqlite://").unwrap_or(&self.uri)
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub bronze_dir: PathBuf,
    pub generation: GenerationConfig,
    pub infra: InfraConfig,
    pub rings: RingConfig,
    pub load: LoadConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            bronze_dir: PathBuf::from("data/bronze"),
            generation: GenerationConfig::default(),
            infra: InfraConfig::default(),
            rings: RingConfig::default(),
            load: LoadConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load overrides from a JSON file. Any field left out keeps its default.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        Ok(config)
    }

    /// A small configuration for tests: same shape, a fraction of the rows.
    pub fn default_test() -> Self {
        Self {
            generation: GenerationConfig {
                n_people: 200,
                n_merchants: 20,
                n_transactions: 2_000,
                ..GenerationConfig::default()
            },
            infra: InfraConfig {
                n_devices: 250,
                n_ips: 180,
                n_cards: 220,
                n_addresses: 160,
                ..InfraConfig::default()
            },
            rings: RingConfig {
                n_rings: 4,
                ring_size_min: 3,
                ring_size_max: 8,
                ..RingConfig::default()
            },
            load: LoadConfig {
                node_chunk_size: 64,
                tx_chunk_size: 100,
            },
            ..Self::default()
        }
    }

    /// Reject impossible settings before any stage runs.
    pub fn validate(&self) -> PipelineResult<()> {
        let g = &self.generation;
        require(g.n_people > 0, "n_people must be > 0")?;
        require(g.n_merchants > 0, "n_merchants must be > 0")?;
        require(g.n_transactions > 0, "n_transactions must be > 0")?;
        require(!g.mccs.is_empty(), "mccs must not be empty")?;
        require(
            g.amount_min.is_finite() && g.amount_max.is_finite() && g.amount_min <= g.amount_max,
            "amount_min must be <= amount_max",
        )?;

        let window_end = g
            .window_start
            .checked_add_signed(Duration::days(i64::from(g.window_days)));
        require(
            window_end.is_some(),
            "window_days runs past the representable time range",
        )?;

        let i = &self.infra;
        require(i.n_devices > 0, "n_devices must be > 0")?;
        require(i.n_ips > 0, "n_ips must be > 0")?;
        require(i.n_cards > 0, "n_cards must be > 0")?;
        require(i.n_addresses > 0, "n_addresses must be > 0")?;
        require(
            i.n_ips as u64 <= crate::reuse_sampler::PRIVATE_IPV4_CAPACITY,
            "n_ips exceeds the number of usable private IPv4 addresses",
        )?;
        probability("reuse_strength", i.reuse_strength)?;

        let r = &self.rings;
        require(r.n_rings > 0, "n_rings must be > 0")?;
        require(r.ring_size_min > 0, "ring_size_min must be > 0")?;
        require(
            r.ring_size_min <= r.ring_size_max,
            "ring_size_min must be <= ring_size_max",
        )?;
        require(
            r.fraud_tx_share > 0.0 && r.fraud_tx_share <= 1.0,
            "fraud_tx_share must be in (0, 1]",
        )?;
        // Anchors lie inside the window; bursts may reach past either edge.
        let burst = Duration::hours(i64::from(r.burst_hours_window));
        require(
            g.window_start.checked_sub_signed(burst).is_some()
                && window_end.and_then(|end| end.checked_add_signed(burst)).is_some(),
            "burst_hours_window runs past the representable time range",
        )?;
        probability("shared_device_prob", r.shared_device_prob)?;
        probability("shared_ip_prob", r.shared_ip_prob)?;
        probability("shared_card_prob", r.shared_card_prob)?;
        probability("shared_address_prob", r.shared_address_prob)?;
        for (name, spec) in [
            ("hot_devices", r.hot_devices),
            ("hot_ips", r.hot_ips),
            ("hot_cards", r.hot_cards),
            ("hot_addresses", r.hot_addresses),
        ] {
            probability(name, spec.fraction)?;
        }

        require(self.load.node_chunk_size > 0, "node_chunk_size must be > 0")?;
        require(self.load.tx_chunk_size > 0, "tx_chunk_size must be > 0")?;
        Ok(())
    }
}

fn require(ok: bool, msg: &str) -> PipelineResult<()> {
    if ok {
        Ok(())
    } else {
        Err(PipelineError::config(msg))
    }
}

fn probability(name: &str, p: f64) -> PipelineResult<()> {
    require(
        (0.0..=1.0).contains(&p),
        &format!("{name} must be in [0, 1], got {p}"),
    )
}

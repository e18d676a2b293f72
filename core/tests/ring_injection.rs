use chrono::Duration;
use ringgraph_core::{
    bronze::{PersonRecord, TransactionRecord},
    config::{GenerationConfig, PipelineConfig, RingConfig},
    entity_generator,
    error::PipelineError,
    reuse_sampler::{self, InfraPools},
    ring_injector::{fraud_row_count, hot_prefix, inject, partition_rings, Injection},
    rng::{RngBank, StageSlot},
};
use std::collections::HashSet;

struct Fixture {
    people: Vec<PersonRecord>,
    pools: InfraPools,
    transactions: Vec<TransactionRecord>,
}

fn fixture(seed: u64, generation: GenerationConfig) -> Fixture {
    let config = PipelineConfig::default_test();
    let bank = RngBank::new(seed);
    let tables =
        entity_generator::generate(&generation, &mut bank.for_stage(StageSlot::EntityGenerator))
            .expect("generate");
    let (pools, transactions) = reuse_sampler::enrich(
        &config.infra,
        &tables.transactions,
        &mut bank.for_stage(StageSlot::ReuseSampler),
    )
    .expect("enrich");
    Fixture {
        people: tables.people,
        pools,
        transactions,
    }
}

fn run_injection(seed: u64, fx: &Fixture, rings: &RingConfig) -> Injection {
    inject(
        rings,
        &fx.people,
        &fx.transactions,
        &fx.pools,
        &mut RngBank::new(seed).for_stage(StageSlot::RingInjector),
    )
    .expect("inject")
}

fn test_generation(n_transactions: usize) -> GenerationConfig {
    GenerationConfig {
        n_transactions,
        ..PipelineConfig::default_test().generation
    }
}

#[test]
fn rings_are_disjoint_and_sized_within_bounds() {
    let rings = PipelineConfig::default_test().rings;
    let fx = fixture(42, test_generation(2_000));
    let injection = run_injection(42, &fx, &rings);

    assert_eq!(injection.rings.len(), rings.n_rings);
    let mut seen = HashSet::new();
    for (ring, members) in injection.rings.iter() {
        assert!(
            (rings.ring_size_min..=rings.ring_size_max).contains(&members.len()),
            "ring of size {}",
            members.len()
        );
        assert_eq!(ring.members.len(), members.len());
        for m in members {
            assert!(seen.insert(m.clone()), "{m} belongs to two rings");
        }
    }
    assert_eq!(seen.len(), injection.rings.total_members());
}

#[test]
fn fraud_label_count_is_the_floor_of_the_share() {
    let rings = PipelineConfig::default_test().rings;
    let fx = fixture(8, test_generation(2_000));
    let injection = run_injection(8, &fx, &rings);

    let fraud = injection
        .transactions
        .iter()
        .filter(|t| t.is_fraud == 1)
        .count();
    assert_eq!(fraud, 160);
    assert_eq!(fraud, fraud_row_count(2_000, rings.fraud_tx_share));
    assert_eq!(injection.plan.len(), fraud);
    assert!(injection.transactions.iter().all(|t| t.is_fraud <= 1));
}

#[test]
fn coerced_rows_follow_their_ring() {
    let rings = PipelineConfig::default_test().rings;
    let fx = fixture(13, test_generation(2_000));
    let injection = run_injection(13, &fx, &rings);
    let burst = Duration::hours(i64::from(rings.burst_hours_window));

    for (row, tx) in injection.transactions.iter().enumerate() {
        let Some(c) = injection.plan.get(row) else {
            assert_eq!(tx.is_fraud, 0);
            assert_eq!(tx, &TransactionRecord { is_fraud: 0, ..fx.transactions[row].clone() });
            continue;
        };
        let ring = injection.rings.ring(c.ring);
        assert_eq!(tx.is_fraud, 1);
        assert_eq!(tx.person_id, c.person_id);
        assert!(injection.rings.members(c.ring).contains(&tx.person_id));
        assert_eq!(injection.rings.ring_of(&tx.person_id), Some(c.ring));
        assert!(
            tx.ts >= ring.anchor - burst && tx.ts <= ring.anchor + burst,
            "row {row} outside burst window"
        );

        if c.device_id.is_some() {
            assert_eq!(tx.device_id, ring.shared.device_id);
        } else {
            assert_eq!(tx.device_id, fx.transactions[row].device_id);
        }
        if c.ip.is_some() {
            assert_eq!(tx.ip, ring.shared.ip);
        }
        if c.card_hash.is_some() {
            assert_eq!(tx.card_hash, ring.shared.card_hash);
        }
        if c.address_hash.is_some() {
            assert_eq!(tx.address_hash, ring.shared.address_hash);
        }
        // Identity and amount are never coerced.
        assert_eq!(tx.tx_id, fx.transactions[row].tx_id);
        assert_eq!(tx.amount, fx.transactions[row].amount);
        assert_eq!(tx.merchant_id, fx.transactions[row].merchant_id);
    }
}

#[test]
fn shared_infrastructure_comes_from_hot_prefixes() {
    let rings = PipelineConfig::default_test().rings;
    let fx = fixture(17, test_generation(2_000));
    let injection = run_injection(17, &fx, &rings);

    let devices = fx.pools.device_ids();
    let ips = fx.pools.ip_values();
    let hot_devices = hot_prefix("device", &devices, rings.hot_devices).expect("hot devices");
    let hot_ips = hot_prefix("ip", &ips, rings.hot_ips).expect("hot ips");
    assert_eq!(hot_devices.len(), 30);
    assert_eq!(hot_ips.len(), 40);

    for (ring, _) in injection.rings.iter() {
        assert!(hot_devices.contains(&ring.shared.device_id));
        assert!(hot_ips.contains(&ring.shared.ip));
    }
}

#[test]
fn sharing_fraction_tracks_configured_probability() {
    let rings = PipelineConfig::default_test().rings;
    let fx = fixture(23, test_generation(20_000));
    let injection = run_injection(23, &fx, &rings);
    let n = injection.plan.len() as f64;
    assert_eq!(injection.plan.len(), 1_600);

    let share = |pick: fn(&ringgraph_core::ring_injector::Coercion) -> bool| {
        injection.plan.iter().filter(|(_, c)| pick(*c)).count() as f64 / n
    };
    let observed = [
        ("device", share(|c| c.device_id.is_some()), rings.shared_device_prob),
        ("ip", share(|c| c.ip.is_some()), rings.shared_ip_prob),
        ("card", share(|c| c.card_hash.is_some()), rings.shared_card_prob),
        ("address", share(|c| c.address_hash.is_some()), rings.shared_address_prob),
    ];
    for (facet, got, want) in observed {
        assert!((got - want).abs() < 0.05, "{facet}: shared {got:.3}, configured {want}");
    }

    // Counting equal values on the final table can only add coincidental matches.
    let matches = injection
        .plan
        .iter()
        .filter(|(row, c)| {
            injection.transactions[**row].device_id == injection.rings.ring(c.ring).shared.device_id
        })
        .count() as f64
        / n;
    assert!(matches >= share(|c| c.device_id.is_some()));
}

#[test]
fn partition_uses_a_shuffled_prefix() {
    let rings = RingConfig {
        n_rings: 3,
        ring_size_min: 4,
        ring_size_max: 4,
        ..RingConfig::default()
    };
    let people: Vec<String> = (0..100).map(entity_generator::person_id).collect();
    let mut rng = RngBank::new(4).for_stage(StageSlot::RingInjector);
    let (members, ranges) = partition_rings(&people, &rings, &mut rng).expect("partition");

    assert_eq!(members.len(), 12);
    assert_eq!(ranges, vec![0..4, 4..8, 8..12]);
    assert_ne!(members, people[..12].to_vec(), "members were not shuffled");
}

#[test]
fn too_few_people_for_any_ring_is_a_config_error() {
    let rings = RingConfig {
        ring_size_min: 3,
        ring_size_max: 5,
        ..RingConfig::default()
    };
    let people = vec![entity_generator::person_id(0), entity_generator::person_id(1)];
    let mut rng = RngBank::new(1).for_stage(StageSlot::RingInjector);

    let err = partition_rings(&people, &rings, &mut rng).expect_err("no ring fits");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
}

#[test]
fn zero_fraud_rows_is_a_config_error() {
    let rings = RingConfig {
        fraud_tx_share: 0.000_1,
        ..PipelineConfig::default_test().rings
    };
    let fx = fixture(2, test_generation(2_000));
    let err = inject(
        &rings,
        &fx.people,
        &fx.transactions,
        &fx.pools,
        &mut RngBank::new(2).for_stage(StageSlot::RingInjector),
    )
    .err()
    .expect("zero fraud rows must fail");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
}

#[test]
fn more_rings_than_transactions_is_a_config_error() {
    let rings = RingConfig {
        fraud_tx_share: 1.0,
        ..PipelineConfig::default_test().rings
    };
    let fx = fixture(3, test_generation(3));
    let err = inject(
        &rings,
        &fx.people,
        &fx.transactions,
        &fx.pools,
        &mut RngBank::new(3).for_stage(StageSlot::RingInjector),
    )
    .err()
    .expect("4 rings cannot anchor on 3 transactions");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
}

#[test]
fn partition_stops_at_the_first_ring_that_does_not_fit() {
    let rings = RingConfig {
        n_rings: 12,
        ring_size_min: 6,
        ring_size_max: 6,
        ..RingConfig::default()
    };
    let people: Vec<String> = (0..20).map(entity_generator::person_id).collect();
    let mut rng = RngBank::new(9).for_stage(StageSlot::RingInjector);
    let (members, ranges) = partition_rings(&people, &rings, &mut rng).expect("partition");

    assert_eq!(ranges, vec![0..6, 6..12, 12..18]);
    let distinct: HashSet<&String> = members.iter().collect();
    assert_eq!(distinct.len(), 18, "rings share members");
    assert!(members.iter().all(|m| people.contains(m)));
}

#[test]
fn burst_past_the_calendar_is_a_config_error() {
    let rings = RingConfig {
        fraud_tx_share: 0.2,
        burst_hours_window: u32::MAX,
        ..PipelineConfig::default_test().rings
    };
    let fx = fixture(5, test_generation(2_000));
    let err = inject(
        &rings,
        &fx.people,
        &fx.transactions,
        &fx.pools,
        &mut RngBank::new(5).for_stage(StageSlot::RingInjector),
    )
    .err()
    .expect("burst overflows the timestamp range");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
}

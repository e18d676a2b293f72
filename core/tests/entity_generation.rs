use chrono::Duration;
use ringgraph_core::{
    config::GenerationConfig,
    entity_generator::{self, generate, generate_transactions},
    error::PipelineError,
    rng::{RngBank, StageSlot},
};
use std::collections::HashSet;

fn small_config() -> GenerationConfig {
    GenerationConfig {
        n_people: 50,
        n_merchants: 10,
        n_transactions: 1_000,
        ..GenerationConfig::default()
    }
}

#[test]
fn identifiers_are_positional_and_zero_padded() {
    assert_eq!(entity_generator::person_id(0), "P000000");
    assert_eq!(entity_generator::person_id(1_234), "P001234");
    assert_eq!(entity_generator::merchant_id(7), "M00007");
    assert_eq!(entity_generator::tx_id(49_999), "T00049999");
}

#[test]
fn tables_have_the_configured_sizes_and_constants() {
    let cfg = small_config();
    let mut rng = RngBank::new(42).for_stage(StageSlot::EntityGenerator);
    let tables = generate(&cfg, &mut rng).expect("generate");

    assert_eq!(tables.people.len(), 50);
    assert_eq!(tables.merchants.len(), 10);
    assert_eq!(tables.transactions.len(), 1_000);

    for m in &tables.merchants {
        assert!(cfg.mccs.contains(&m.mcc), "unexpected mcc {}", m.mcc);
        assert_eq!(m.country, "GB");
    }
    for tx in &tables.transactions {
        assert_eq!(tx.currency, "GBP");
    }
}

#[test]
fn timestamps_and_amounts_stay_in_bounds() {
    let cfg = small_config();
    let mut rng = RngBank::new(7).for_stage(StageSlot::EntityGenerator);
    let tables = generate(&cfg, &mut rng).expect("generate");

    let window_end = cfg.window_start + Duration::days(i64::from(cfg.window_days));
    for tx in &tables.transactions {
        assert!(tx.ts >= cfg.window_start && tx.ts <= window_end, "ts {} out of window", tx.ts);
        assert!(
            tx.amount >= cfg.amount_min && tx.amount <= cfg.amount_max,
            "amount {} out of bounds",
            tx.amount
        );
        let pennies = tx.amount * 100.0;
        assert!((pennies - pennies.round()).abs() < 1e-6, "amount {} not rounded", tx.amount);
    }
}

#[test]
fn every_transaction_references_generated_entities() {
    let mut rng = RngBank::new(3).for_stage(StageSlot::EntityGenerator);
    let tables = generate(&small_config(), &mut rng).expect("generate");

    let people: HashSet<_> = tables.people.iter().map(|p| p.person_id.as_str()).collect();
    let merchants: HashSet<_> = tables.merchants.iter().map(|m| m.merchant_id.as_str()).collect();
    for tx in &tables.transactions {
        assert!(people.contains(tx.person_id.as_str()));
        assert!(merchants.contains(tx.merchant_id.as_str()));
    }

    let ids: HashSet<_> = tables.transactions.iter().map(|t| t.tx_id.as_str()).collect();
    assert_eq!(ids.len(), tables.transactions.len(), "tx ids must be unique");
}

#[test]
fn transactions_without_people_are_a_config_error() {
    let cfg = small_config();
    let mut rng = RngBank::new(1).for_stage(StageSlot::EntityGenerator);
    let merchants = entity_generator::generate_merchants(&cfg, &mut rng);

    let err = generate_transactions(&cfg, &[], &merchants, &mut rng)
        .expect_err("no people must fail");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
}

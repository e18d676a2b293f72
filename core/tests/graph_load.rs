use ringgraph_core::{
    bronze::Dataset,
    config::{LoadConfig, PipelineConfig, StoreConfig},
    entity_generator,
    error::PipelineError,
    graph_loader::{GraphCounts, GraphLoader},
    graph_schema::{NodeLabel, RelType},
    reuse_sampler, ring_injector,
    rng::{RngBank, StageSlot},
    store::{GraphStore, SqliteGraphStore},
};

fn build_dataset(config: &PipelineConfig) -> Dataset {
    let bank = RngBank::new(config.seed);
    let tables = entity_generator::generate(
        &config.generation,
        &mut bank.for_stage(StageSlot::EntityGenerator),
    )
    .expect("generate");
    let (pools, transactions) = reuse_sampler::enrich(
        &config.infra,
        &tables.transactions,
        &mut bank.for_stage(StageSlot::ReuseSampler),
    )
    .expect("enrich");
    let injection = ring_injector::inject(
        &config.rings,
        &tables.people,
        &transactions,
        &pools,
        &mut bank.for_stage(StageSlot::RingInjector),
    )
    .expect("inject");
    Dataset {
        people: tables.people,
        merchants: tables.merchants,
        devices: pools.devices,
        ips: pools.ips,
        cards: pools.cards,
        addresses: pools.addresses,
        transactions: injection.transactions,
    }
}

fn migrated_store() -> SqliteGraphStore {
    let store = SqliteGraphStore::in_memory("test").expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn load(store: &mut SqliteGraphStore, dataset: &Dataset, chunks: LoadConfig) -> GraphCounts {
    GraphLoader::new(store, chunks)
        .load(dataset)
        .expect("load")
        .counts
}

fn chunks(node_chunk_size: usize, tx_chunk_size: usize) -> LoadConfig {
    LoadConfig {
        node_chunk_size,
        tx_chunk_size,
    }
}

#[test]
fn one_node_per_row_and_six_edges_per_transaction() {
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);
    let mut store = migrated_store();
    let counts = load(&mut store, &dataset, config.load.clone());

    assert_eq!(counts.nodes_of(NodeLabel::Person), 200);
    assert_eq!(counts.nodes_of(NodeLabel::Merchant), 20);
    assert_eq!(counts.nodes_of(NodeLabel::Device), 250);
    assert_eq!(counts.nodes_of(NodeLabel::Ip), 180);
    assert_eq!(counts.nodes_of(NodeLabel::Card), 220);
    assert_eq!(counts.nodes_of(NodeLabel::Address), 160);
    assert_eq!(counts.nodes_of(NodeLabel::Transaction), 2_000);
    for rel in RelType::ALL {
        assert_eq!(counts.relationships_of(rel), 2_000, "{rel} count");
    }
    assert_eq!(counts, GraphCounts::read(&store).expect("counts"));
}

#[test]
fn batch_counts_follow_the_chunk_sizes() {
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);
    let mut store = migrated_store();
    let report = GraphLoader::new(&mut store, chunks(64, 100))
        .load(&dataset)
        .expect("load");

    // ceil(n / 64) for 200, 20, 250, 180, 220, 160 rows.
    assert_eq!(report.node_batches, 4 + 1 + 4 + 3 + 4 + 3);
    assert_eq!(report.transaction_batches, 20);
    assert_eq!(report.transaction_rows, 2_000);
    assert_eq!(
        report.node_rows.iter().map(|(l, _)| *l).collect::<Vec<_>>(),
        NodeLabel::ENTITIES.to_vec()
    );
}

#[test]
fn loading_twice_leaves_the_graph_unchanged() {
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);
    let mut store = migrated_store();

    let first = load(&mut store, &dataset, config.load.clone());
    let second = load(&mut store, &dataset, config.load.clone());
    assert_eq!(first, second);

    let runs = store.load_runs().expect("ledger");
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == "completed"));
    assert_ne!(runs[0].load_id, runs[1].load_id);
}

#[test]
fn final_graph_does_not_depend_on_chunk_sizes() {
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);

    let mut small = migrated_store();
    let mut large = migrated_store();
    let small_counts = load(&mut small, &dataset, chunks(7, 13));
    let large_counts = load(&mut large, &dataset, chunks(5_000, 1_500));
    assert_eq!(small_counts, large_counts);

    assert_eq!(
        small.node_keys(NodeLabel::Transaction).expect("keys"),
        large.node_keys(NodeLabel::Transaction).expect("keys")
    );
    for tx in dataset.transactions.iter().step_by(97) {
        assert_eq!(
            small.transaction_edges(&tx.tx_id).expect("edges"),
            large.transaction_edges(&tx.tx_id).expect("edges")
        );
        assert_eq!(
            small.node_properties(NodeLabel::Transaction, &tx.tx_id).expect("props"),
            large.node_properties(NodeLabel::Transaction, &tx.tx_id).expect("props")
        );
    }
}

#[test]
fn transaction_nodes_carry_their_edges_and_label() {
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);
    let mut store = migrated_store();
    load(&mut store, &dataset, config.load.clone());

    let tx = dataset
        .transactions
        .iter()
        .find(|t| t.is_fraud == 1)
        .expect("a fraud row");
    let props = store
        .node_properties(NodeLabel::Transaction, &tx.tx_id)
        .expect("props")
        .expect("node exists");
    assert_eq!(props["tx_id"], tx.tx_id.as_str());
    assert_eq!(props["is_fraud"], 1);
    assert_eq!(props["currency"], "GBP");
    assert_eq!(props["amount"], tx.amount);

    let mut expected = vec![
        ("BILLED_TO".to_string(), tx.address_hash.clone()),
        ("FROM_IP".to_string(), tx.ip.clone()),
        ("MADE".to_string(), tx.person_id.clone()),
        ("PAID_WITH".to_string(), tx.card_hash.clone()),
        ("TO_MERCHANT".to_string(), tx.merchant_id.clone()),
        ("USED_DEVICE".to_string(), tx.device_id.clone()),
    ];
    expected.sort();
    assert_eq!(store.transaction_edges(&tx.tx_id).expect("edges"), expected);

    let merchant = &dataset.merchants[0];
    let props = store
        .node_properties(NodeLabel::Merchant, &merchant.merchant_id)
        .expect("props")
        .expect("merchant exists");
    assert_eq!(props["mcc"], merchant.mcc.as_str());
    assert_eq!(props["country"], "GB");
}

#[test]
fn reload_updates_properties_in_place() {
    let config = PipelineConfig::default_test();
    let mut dataset = build_dataset(&config);
    let mut store = migrated_store();
    let before = load(&mut store, &dataset, config.load.clone());

    dataset.merchants[3].mcc = "0000".into();
    let after = load(&mut store, &dataset, config.load.clone());
    assert_eq!(before, after);

    let props = store
        .node_properties(NodeLabel::Merchant, &dataset.merchants[3].merchant_id)
        .expect("props")
        .expect("merchant exists");
    assert_eq!(props["mcc"], "0000");
}

#[test]
fn missing_reference_rolls_back_its_batch() {
    let config = PipelineConfig::default_test();
    let mut dataset = build_dataset(&config);
    dataset.transactions[250].device_id = "D9999999".into();
    let mut store = migrated_store();

    let err = GraphLoader::new(&mut store, chunks(64, 100))
        .load(&dataset)
        .expect_err("unknown device");
    match &err {
        PipelineError::BatchFailed {
            stage,
            batch,
            first_key,
            source,
        } => {
            assert_eq!(*stage, "Transaction");
            assert_eq!(*batch, 2);
            assert_eq!(first_key, &dataset.transactions[200].tx_id);
            assert!(
                matches!(
                    source.as_ref(),
                    PipelineError::MissingReference { label: "Device", key, .. } if key == "D9999999"
                ),
                "got {source:?}"
            );
        }
        other => panic!("expected BatchFailed, got {other:?}"),
    }

    // Batches 0 and 1 committed, batch 2 left nothing behind.
    assert_eq!(store.node_count(NodeLabel::Transaction).expect("count"), 200);
    assert_eq!(store.relationship_count(RelType::Made).expect("count"), 200);
    assert!(store
        .node_properties(NodeLabel::Transaction, &dataset.transactions[200].tx_id)
        .expect("props")
        .is_none());
    // Entity phase finished before transactions started.
    assert_eq!(store.node_count(NodeLabel::Device).expect("count"), 250);

    let runs = store.load_runs().expect("ledger");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");
    assert!(runs[0].detail.as_deref().unwrap_or_default().contains("batch 2"));
}

#[test]
fn zero_chunk_size_is_rejected_before_writing() {
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);
    let mut store = migrated_store();

    let err = GraphLoader::new(&mut store, chunks(0, 100))
        .load(&dataset)
        .expect_err("zero chunk");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
    assert!(store.load_runs().expect("ledger").is_empty());
}

#[test]
fn unmigrated_store_fails_the_connectivity_check() {
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);
    let mut store = SqliteGraphStore::in_memory("bare").expect("in-memory store");

    let err = GraphLoader::new(&mut store, config.load.clone())
        .load(&dataset)
        .expect_err("no schema");
    assert!(matches!(err, PipelineError::Connectivity(_)), "got {err:?}");
}

#[test]
fn registered_principal_requires_matching_credentials() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    let cfg = StoreConfig {
        uri: format!("sqlite://{}", path.display()),
        ..StoreConfig::default()
    };

    assert!(matches!(
        SqliteGraphStore::open(&cfg),
        Err(PipelineError::Connectivity(_))
    ));

    let setup = SqliteGraphStore::create(&cfg).expect("create");
    setup.migrate().expect("migrate");
    setup
        .register_principal(&cfg.user, &cfg.password)
        .expect("principal");
    drop(setup);

    let store = SqliteGraphStore::open(&cfg).expect("open");
    store.verify_connectivity().expect("valid credentials");
    assert_eq!(store.schema_version().expect("version").as_deref(), Some("1"));

    let wrong = StoreConfig {
        password: "not-the-password".into(),
        ..cfg.clone()
    };
    let store = SqliteGraphStore::open(&wrong).expect("open");
    assert!(matches!(
        store.verify_connectivity(),
        Err(PipelineError::Connectivity(_))
    ));
}

#[test]
fn databases_in_one_store_are_isolated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let uri = format!("sqlite://{}", dir.path().join("graph.db").display());
    let config = PipelineConfig::default_test();
    let dataset = build_dataset(&config);

    let setup = SqliteGraphStore::create(&StoreConfig {
        uri: uri.clone(),
        ..StoreConfig::default()
    })
    .expect("create");
    setup.migrate().expect("migrate");
    drop(setup);

    let mut first = SqliteGraphStore::open(&StoreConfig {
        uri: uri.clone(),
        database: "first".into(),
        ..StoreConfig::default()
    })
    .expect("open first");
    load(&mut first, &dataset, config.load.clone());

    let second = SqliteGraphStore::open(&StoreConfig {
        uri,
        database: "second".into(),
        ..StoreConfig::default()
    })
    .expect("open second");
    assert_eq!(GraphCounts::read(&second).expect("counts").total_nodes(), 0);
    assert_eq!(
        GraphCounts::read(&first).expect("counts").nodes_of(NodeLabel::Person),
        200
    );
}

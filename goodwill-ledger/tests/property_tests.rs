//! Property-based tests for chain invariants
//!
//! These tests use proptest to verify:
//! - Chains built through `append` always validate
//! - Mined hashes meet the configured difficulty
//! - Any single tampered field breaks validation
//! - Leader election is the smallest registered ID

use goodwill_ledger::{
    types::GENESIS_PREVIOUS_HASH, Block, ChainTransaction, Config, LedgerChain, Metrics,
    MineControl, Registration, Storage,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Strategy for generating positive mint amounts
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u32..=100u32).prop_map(Decimal::from)
}

/// Strategy for generating pool transactions
fn tx_strategy() -> impl Strategy<Value = ChainTransaction> {
    (amount_strategy(), "[a-z]{4,12}", 0i64..1_000_000).prop_map(|(amount, receiver, ts)| {
        ChainTransaction {
            tx_hash: goodwill_ledger::crypto::new_tx_hash(),
            work_item_id: Uuid::now_v7(),
            sender: "minter".to_string(),
            receiver: format!("addr-{}", receiver),
            amount,
            timestamp_ms: ts,
        }
    })
}

/// Create test chain; the temp dir must outlive the chain
fn create_test_chain(difficulty: usize) -> (tempfile::TempDir, LedgerChain) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.chain.difficulty = difficulty;

    let storage = Arc::new(Storage::open(&config).unwrap());
    let chain = LedgerChain::open(storage, config.chain, Metrics::new().unwrap()).unwrap();
    (temp_dir, chain)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: every chain produced through append validates
    #[test]
    fn prop_appended_chains_are_valid(
        batches in prop::collection::vec(prop::collection::vec(tx_strategy(), 0..4), 1..6)
    ) {
        let (_dir, chain) = create_test_chain(1);

        for batch in batches {
            let block = chain.mine(batch, &MineControl::new()).unwrap();
            chain.append(block).unwrap();
        }

        let blocks = chain.storage().all_blocks().unwrap();
        prop_assert!(LedgerChain::is_chain_valid(&blocks));
        prop_assert!(chain.verify().unwrap());
        for (height, block) in blocks.iter().enumerate() {
            prop_assert_eq!(block.height, height as u64);
        }
    }

    /// Property: mined hashes meet the difficulty and recompute
    #[test]
    fn prop_mine_meets_difficulty(
        difficulty in 0usize..=2,
        txs in prop::collection::vec(tx_strategy(), 0..5)
    ) {
        let (_dir, chain) = create_test_chain(difficulty);
        let block = chain.mine(txs, &MineControl::new()).unwrap();

        prop_assert!(block.hash.bytes().take(difficulty).all(|b| b == b'0'));
        prop_assert_eq!(LedgerChain::hash(&block).unwrap(), block.hash.clone());
    }

    /// Property: changing a hashed field invalidates the chain
    #[test]
    fn prop_tampering_detected(
        txs in prop::collection::vec(tx_strategy(), 1..4),
        field in 0usize..4
    ) {
        let (_dir, chain) = create_test_chain(1);
        let block = chain.mine(txs, &MineControl::new()).unwrap();
        chain.append(block).unwrap();

        let mut blocks: Vec<Block> = chain.storage().all_blocks().unwrap();
        let target = &mut blocks[1];
        match field {
            0 => target.nonce = target.nonce.wrapping_add(1),
            1 => target.timestamp_ms += 1,
            2 => target.transactions[0].amount += Decimal::ONE,
            _ => target.previous_hash = "1".repeat(64),
        }

        prop_assert!(!LedgerChain::is_chain_valid(&blocks));
    }

    /// Property: leader is the smallest registered ID
    #[test]
    fn prop_leader_is_smallest_id(ids in prop::collection::btree_set("[a-z]{1,6}", 1..8)) {
        let (_dir, chain) = create_test_chain(1);

        for (n, id) in ids.iter().enumerate() {
            let result = chain.register_node(id, &format!("10.0.0.{}:7000", n)).unwrap();
            let is_registered = matches!(result, Registration::Registered { .. });
            prop_assert!(is_registered);
        }

        prop_assert_eq!(chain.leader(), ids.iter().next().cloned());
    }
}

#[test]
fn test_genesis_scenario() {
    let (_dir, chain) = create_test_chain(2);
    let genesis = chain.head().unwrap();

    assert_eq!(genesis.height, 0);
    assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
    assert_eq!(genesis.previous_hash.len(), 64);
    assert_eq!(LedgerChain::hash(&genesis).unwrap(), genesis.hash);
}

#[test]
fn test_leader_scenario() {
    let (_dir, chain) = create_test_chain(1);

    chain.register_node("b", "addr2").unwrap();
    chain.register_node("a", "addr1").unwrap();
    assert_eq!(chain.elect_leader().as_deref(), Some("a"));

    let again = chain.register_node("a", "addr9").unwrap();
    assert!(matches!(again, Registration::Conflict { .. }));
    assert_eq!(chain.leader().as_deref(), Some("a"));
    assert_eq!(chain.nodes().len(), 2);
}

#[test]
fn test_chain_survives_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.chain.difficulty = 1;

    let head_hash = {
        let storage = Arc::new(Storage::open(&config).unwrap());
        let chain =
            LedgerChain::open(storage, config.chain.clone(), Metrics::new().unwrap()).unwrap();
        let block = chain.mine(vec![], &MineControl::new()).unwrap();
        chain.append(block).unwrap();
        chain.head().unwrap().hash
    };

    let storage = Arc::new(Storage::open(&config).unwrap());
    let chain = LedgerChain::open(storage, config.chain, Metrics::new().unwrap()).unwrap();
    assert_eq!(chain.head().unwrap().hash, head_hash);
    assert_eq!(chain.head().unwrap().height, 1);
    assert!(chain.storage().quarantined_blocks().unwrap().is_empty());
}

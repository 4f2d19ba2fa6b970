//! Benchmarks for block hashing and mining
//!
//! Measures:
//! - Canonical hashing for blocks of 1, 10, 100 and 500 transactions
//! - Nonce search at difficulty 1 to 3
//!
//! The preimage split is what keeps the nonce search cheap; a regression
//! here shows up as mining time growing with block size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use goodwill_ledger::{
    crypto::{hash_block, BlockPreimage},
    types::GENESIS_PREVIOUS_HASH,
    Block, ChainTransaction, Config, LedgerChain, Metrics, MineControl, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::tempdir;
use uuid::Uuid;

/// Build `count` mint transactions
fn transactions(count: usize) -> Vec<ChainTransaction> {
    (0..count)
        .map(|i| ChainTransaction {
            tx_hash: goodwill_ledger::crypto::new_tx_hash(),
            work_item_id: Uuid::now_v7(),
            sender: "minter".to_string(),
            receiver: format!("addr-{}", i % 17),
            amount: Decimal::from(i as u64 % 100 + 1),
            timestamp_ms: i as i64,
        })
        .collect()
}

fn block_with(count: usize) -> Block {
    Block {
        height: 1,
        timestamp_ms: 1_700_000_000_000,
        transactions: transactions(count),
        previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        nonce: 0,
        hash: String::new(),
    }
}

fn bench_block_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_hash");

    for size in [1usize, 10, 100, 500] {
        let block = block_with(size);

        group.bench_with_input(BenchmarkId::new("full", size), &block, |b, block| {
            b.iter(|| hash_block(black_box(block)).unwrap())
        });

        let preimage = BlockPreimage::new(&block).unwrap();
        group.bench_with_input(BenchmarkId::new("preimage", size), &preimage, |b, preimage| {
            let mut nonce = 0u64;
            b.iter(|| {
                nonce += 1;
                preimage.hash(black_box(nonce))
            })
        });
    }

    group.finish();
}

fn bench_mine(c: &mut Criterion) {
    let mut group = c.benchmark_group("mine");
    group.sample_size(20);

    for difficulty in 1usize..=3 {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        config.chain.difficulty = difficulty;
        let storage = Arc::new(Storage::open(&config).unwrap());
        let chain = LedgerChain::open(storage, config.chain, Metrics::new().unwrap()).unwrap();
        let pending = transactions(50);

        group.bench_with_input(
            BenchmarkId::from_parameter(difficulty),
            &pending,
            |b, pending| b.iter(|| chain.mine(pending.clone(), &MineControl::new()).unwrap()),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_block_hash, bench_mine);
criterion_main!(benches);

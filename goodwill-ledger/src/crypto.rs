//! Hashing for the ledger
//!
//! This module provides:
//! - SHA-256 hashing for blocks and transactions
//! - Canonical (key-sorted) JSON encoding so block identity does not depend
//!   on field order
//! - Merkle roots over transaction hashes

use crate::types::Block;
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Serialize with object keys sorted at every depth
///
/// Going through `Value` sorts keys because `serde_json::Map` is a
/// `BTreeMap`. Enabling serde_json's `preserve_order` feature anywhere in
/// the build would break block hashes.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(&serde_json::to_value(value)?)?)
}

/// Canonical encoding of a block split around its nonce
///
/// Keys sort as `height`, `nonce`, `previous_hash`, `timestamp`,
/// `transactions`, so the encoding is `prefix || nonce || suffix`. Mining
/// reuses one preimage and only re-renders the nonce.
#[derive(Debug, Clone)]
pub struct BlockPreimage {
    prefix: String,
    suffix: String,
}

impl BlockPreimage {
    /// Build the preimage for every hashed field except the nonce
    pub fn new(block: &Block) -> Result<Self> {
        let transactions = canonical_json(&block.transactions)?;
        Ok(Self {
            prefix: format!("{{\"height\":{},\"nonce\":", block.height),
            suffix: format!(
                ",\"previous_hash\":{},\"timestamp\":{},\"transactions\":{}}}",
                Value::String(block.previous_hash.clone()),
                block.timestamp_ms,
                transactions
            ),
        })
    }

    /// Full canonical encoding for `nonce`
    pub fn encode(&self, nonce: u64) -> String {
        format!("{}{}{}", self.prefix, nonce, self.suffix)
    }

    /// Hex SHA-256 of the encoding for `nonce`
    pub fn hash(&self, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.suffix.as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        hex::encode(digest)
    }
}

/// Hash a block: SHA-256 over the canonical encoding, hex encoded
pub fn hash_block(block: &Block) -> Result<String> {
    Ok(BlockPreimage::new(block)?.hash(block.nonce))
}

/// Whether a hex hash starts with `difficulty` '0' characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Fresh transaction hash for a mint
pub fn new_tx_hash() -> String {
    format!("CUSTOM_TX_{}", uuid::Uuid::new_v4().simple())
}

/// Create a Merkle root from leaf hashes
///
/// If a level has odd length, the last hash is duplicated.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return hash_bytes(b"");
    }

    let mut current_level: Vec<[u8; 32]> = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level: Vec<[u8; 32]> = Vec::with_capacity((current_level.len() + 1) / 2);

        for pair in current_level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);

            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            next_level.push(hasher.finalize().into());
        }

        current_level = next_level;
    }

    current_level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"z":true,"y":[2,{"d":0,"c":1}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"y":[2,{"c":1,"d":0}],"z":true},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(
            canonical_json(&a).unwrap(),
            r#"{"a":{"y":[2,{"c":1,"d":0}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_block_preimage_matches_canonical_json() {
        use crate::types::ChainTransaction;
        use rust_decimal::Decimal;

        let block = Block {
            height: 7,
            timestamp_ms: 1_700_000_000_000,
            transactions: vec![ChainTransaction {
                tx_hash: "CUSTOM_TX_abc".to_string(),
                work_item_id: uuid::Uuid::nil(),
                sender: "minter".to_string(),
                receiver: "addr-1".to_string(),
                amount: Decimal::from(16),
                timestamp_ms: 1_700_000_000_000,
            }],
            previous_hash: "00ff".to_string(),
            nonce: 42,
            hash: String::new(),
        };

        let value = serde_json::json!({
            "transactions": serde_json::to_value(&block.transactions).unwrap(),
            "previous_hash": block.previous_hash,
            "nonce": block.nonce,
            "timestamp": block.timestamp_ms,
            "height": block.height,
        });
        let preimage = BlockPreimage::new(&block).unwrap();
        assert_eq!(preimage.encode(42), canonical_json(&value).unwrap());
        assert_eq!(
            hash_block(&block).unwrap(),
            hex::encode(hash_bytes(canonical_json(&value).unwrap().as_bytes()))
        );
    }

    #[test]
    fn test_block_hash_is_lowercase_hex() {
        let block = Block {
            height: 0,
            timestamp_ms: 0,
            transactions: vec![],
            previous_hash: "0".repeat(64),
            nonce: 0,
            hash: String::new(),
        };
        let hash = hash_block(&block).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0fab", 2));
        assert!(meets_difficulty("fab", 0));
        assert!(!meets_difficulty("0", 2));
    }

    #[test]
    fn test_merkle_root_two() {
        let hash1 = [1u8; 32];
        let hash2 = [2u8; 32];
        let root = merkle_root(&[hash1, hash2]);

        let mut hasher = Sha256::new();
        hasher.update(hash1);
        hasher.update(hash2);
        let expected: [u8; 32] = hasher.finalize().into();

        assert_eq!(root, expected);
    }

    #[test]
    fn test_merkle_root_odd_duplicates_last() {
        let leaves = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let padded = [[1u8; 32], [2u8; 32], [3u8; 32], [3u8; 32]];
        assert_eq!(merkle_root(&leaves), merkle_root(&padded));
    }

    #[test]
    fn test_tx_hash_unique() {
        let a = new_tx_hash();
        let b = new_tx_hash();
        assert!(a.starts_with("CUSTOM_TX_"));
        assert_eq!(a.len(), "CUSTOM_TX_".len() + 32);
        assert_ne!(a, b);
    }
}

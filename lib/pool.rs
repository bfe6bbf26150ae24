//! In-memory pools the engine feeds: pending transactions displaced or
//! included by imported blocks, and uncle candidates for the miner.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::types::{BlockHash, BlockHeader, Transaction, TxHash};

#[derive(Clone, Default)]
pub struct TxPool {
    transactions: Arc<RwLock<HashMap<TxHash, Transaction>>>,
}

impl TxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I>(&self, transactions: I)
    where
        I: IntoIterator<Item = Transaction>,
    {
        let mut transactions_write = self.transactions.write();
        let mut added = 0usize;
        for transaction in transactions {
            transactions_write.insert(transaction.hash(), transaction);
            added += 1;
        }
        if added > 0 {
            tracing::debug!(added, "added pending transactions");
        }
    }

    pub fn remove(&self, transactions: &[Transaction]) {
        let mut transactions_write = self.transactions.write();
        for transaction in transactions {
            transactions_write.remove(&transaction.hash());
        }
    }

    pub fn contains(&self, tx_hash: &TxHash) -> bool {
        self.transactions.read().contains_key(tx_hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.transactions.read().values().cloned().collect()
    }
}

#[derive(Clone, Default)]
pub struct UnclePool {
    headers: Arc<RwLock<HashMap<BlockHash, BlockHeader>>>,
}

impl UnclePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, headers: Vec<BlockHeader>) {
        let mut headers_write = self.headers.write();
        for header in headers {
            tracing::debug!(number = header.number, hash = %header.hash(),
                "adding uncle candidate");
            headers_write.insert(header.hash(), header);
        }
    }

    pub fn remove(&self, headers: &[BlockHeader]) {
        let mut headers_write = self.headers.write();
        for header in headers {
            headers_write.remove(&header.hash());
        }
    }

    pub fn contains(&self, block_hash: &BlockHash) -> bool {
        self.headers.read().contains_key(block_hash)
    }

    pub fn len(&self) -> usize {
        self.headers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.read().is_empty()
    }

    pub fn candidates(&self) -> Vec<BlockHeader> {
        self.headers.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tx(nonce: u64) -> Transaction {
        Transaction {
            nonce,
            ..Default::default()
        }
    }

    #[test]
    fn tx_pool_add_remove() {
        let pool = TxPool::new();
        let txs = vec![make_tx(0), make_tx(1)];
        pool.add(txs.clone());
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&txs[0].hash()));
        pool.remove(&txs[..1]);
        assert!(!pool.contains(&txs[0].hash()));
        assert!(pool.contains(&txs[1].hash()));
    }

    #[test]
    fn uncle_pool_add_remove() {
        let pool = UnclePool::new();
        let header = BlockHeader {
            number: 7,
            ..Default::default()
        };
        pool.add(vec![header.clone()]);
        assert!(pool.contains(&header.hash()));
        pool.remove(std::slice::from_ref(&header));
        assert!(pool.is_empty());
    }
}

//! Persisted chain state: headers, bodies, receipts, the canonical index,
//! total difficulties, raw state-trie nodes and sync metadata.

use alloy_primitives::{Bytes, U256};
use fallible_iterator::{FallibleIterator, IteratorExt};
use heed::{types::SerdeBincode, Database, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};

use crate::{
    ledger::WorldDiff,
    types::{Block, BlockBody, BlockHash, BlockHeader, BlockNumber, Hash, Receipt},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("heed error")]
    Heed(#[from] heed::Error),
    #[error("no canonical block at height {0}")]
    NoCanonicalBlock(BlockNumber),
    #[error("no header with hash {0}")]
    NoHeader(BlockHash),
    #[error("no body with hash {0}")]
    NoBody(BlockHash),
    #[error("no total difficulty for {0}")]
    NoTotalDifficulty(BlockHash),
}

/// Marker key for singleton databases.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct UnitKey;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
enum Flag {
    FastSyncDone,
    WithUnconfirmed,
}

#[derive(Clone)]
pub struct ChainDb {
    headers: Database<SerdeBincode<BlockHash>, SerdeBincode<BlockHeader>>,
    bodies: Database<SerdeBincode<BlockHash>, SerdeBincode<BlockBody>>,
    /// Canonical block hash at each height.
    canonical: Database<SerdeBincode<BlockNumber>, SerdeBincode<BlockHash>>,
    total_difficulties: Database<SerdeBincode<BlockHash>, SerdeBincode<U256>>,
    receipts: Database<SerdeBincode<BlockHash>, SerdeBincode<Vec<Receipt>>>,
    state_nodes: Database<SerdeBincode<Hash>, SerdeBincode<Bytes>>,
    best_block: Database<SerdeBincode<UnitKey>, SerdeBincode<BlockNumber>>,
    flags: Database<SerdeBincode<Flag>, SerdeBincode<bool>>,
    /// Blocks saved while in unconfirmed mode, by height.
    unconfirmed: Database<SerdeBincode<BlockNumber>, SerdeBincode<BlockHash>>,
}

impl ChainDb {
    pub const NUM_DBS: u32 = 9;

    pub fn new(env: &heed::Env) -> Result<Self, Error> {
        let mut rwtxn = env.write_txn()?;
        let headers = env.create_database(&mut rwtxn, Some("headers"))?;
        let bodies = env.create_database(&mut rwtxn, Some("bodies"))?;
        let canonical = env.create_database(&mut rwtxn, Some("canonical"))?;
        let total_difficulties =
            env.create_database(&mut rwtxn, Some("total_difficulties"))?;
        let receipts = env.create_database(&mut rwtxn, Some("receipts"))?;
        let state_nodes = env.create_database(&mut rwtxn, Some("state_nodes"))?;
        let best_block = env.create_database(&mut rwtxn, Some("best_block"))?;
        let flags = env.create_database(&mut rwtxn, Some("flags"))?;
        let unconfirmed = env.create_database(&mut rwtxn, Some("unconfirmed"))?;
        rwtxn.commit()?;
        Ok(Self {
            headers,
            bodies,
            canonical,
            total_difficulties,
            receipts,
            state_nodes,
            best_block,
            flags,
            unconfirmed,
        })
    }

    pub fn best_block_number(&self, rotxn: &RoTxn) -> Result<BlockNumber, Error> {
        let best = self.best_block.get(rotxn, &UnitKey)?;
        Ok(best.unwrap_or_default())
    }

    pub fn try_get_header(
        &self,
        rotxn: &RoTxn,
        block_hash: BlockHash,
    ) -> Result<Option<BlockHeader>, Error> {
        let header = self.headers.get(rotxn, &block_hash)?;
        Ok(header)
    }

    pub fn get_header(
        &self,
        rotxn: &RoTxn,
        block_hash: BlockHash,
    ) -> Result<BlockHeader, Error> {
        self.try_get_header(rotxn, block_hash)?
            .ok_or(Error::NoHeader(block_hash))
    }

    pub fn try_get_header_by_number(
        &self,
        rotxn: &RoTxn,
        number: BlockNumber,
    ) -> Result<Option<BlockHeader>, Error> {
        let Some(block_hash) = self.canonical.get(rotxn, &number)? else {
            return Ok(None);
        };
        self.try_get_header(rotxn, block_hash)
    }

    pub fn get_header_by_number(
        &self,
        rotxn: &RoTxn,
        number: BlockNumber,
    ) -> Result<BlockHeader, Error> {
        self.try_get_header_by_number(rotxn, number)?
            .ok_or(Error::NoCanonicalBlock(number))
    }

    pub fn try_get_block_by_number(
        &self,
        rotxn: &RoTxn,
        number: BlockNumber,
    ) -> Result<Option<Block>, Error> {
        let Some(block_hash) = self.canonical.get(rotxn, &number)? else {
            return Ok(None);
        };
        let Some(header) = self.headers.get(rotxn, &block_hash)? else {
            return Ok(None);
        };
        let body = self
            .bodies
            .get(rotxn, &block_hash)?
            .ok_or(Error::NoBody(block_hash))?;
        Ok(Some(Block { header, body }))
    }

    pub fn get_block_by_number(
        &self,
        rotxn: &RoTxn,
        number: BlockNumber,
    ) -> Result<Block, Error> {
        self.try_get_block_by_number(rotxn, number)?
            .ok_or(Error::NoCanonicalBlock(number))
    }

    pub fn try_get_total_difficulty(
        &self,
        rotxn: &RoTxn,
        block_hash: BlockHash,
    ) -> Result<Option<U256>, Error> {
        let td = self.total_difficulties.get(rotxn, &block_hash)?;
        Ok(td)
    }

    pub fn get_total_difficulty(
        &self,
        rotxn: &RoTxn,
        block_hash: BlockHash,
    ) -> Result<U256, Error> {
        self.try_get_total_difficulty(rotxn, block_hash)?
            .ok_or(Error::NoTotalDifficulty(block_hash))
    }

    pub fn try_get_receipts(
        &self,
        rotxn: &RoTxn,
        block_hash: BlockHash,
    ) -> Result<Option<Vec<Receipt>>, Error> {
        let receipts = self.receipts.get(rotxn, &block_hash)?;
        Ok(receipts)
    }

    pub fn try_get_state_node(
        &self,
        rotxn: &RoTxn,
        hash: Hash,
    ) -> Result<Option<Bytes>, Error> {
        let node = self.state_nodes.get(rotxn, &hash)?;
        Ok(node)
    }

    /// Store a state-trie node fetched from a peer.
    pub fn put_state_node(
        &self,
        rwtxn: &mut RwTxn,
        hash: Hash,
        node: &Bytes,
    ) -> Result<(), Error> {
        self.state_nodes.put(rwtxn, &hash, node)?;
        Ok(())
    }

    /// Persist an executed block: its state diff, chain data, receipts and
    /// total difficulty, and advance the best block to it. The caller commits
    /// the transaction, so the write is atomic.
    pub fn save_new_block(
        &self,
        rwtxn: &mut RwTxn,
        world: &WorldDiff,
        block: &Block,
        receipts: &[Receipt],
        total_difficulty: U256,
    ) -> Result<(), Error> {
        let block_hash = block.hash();
        let number = block.number();
        for (hash, node) in &world.nodes {
            self.state_nodes.put(rwtxn, hash, node)?;
        }
        self.headers.put(rwtxn, &block_hash, &block.header)?;
        self.bodies.put(rwtxn, &block_hash, &block.body)?;
        self.canonical.put(rwtxn, &number, &block_hash)?;
        self.total_difficulties
            .put(rwtxn, &block_hash, &total_difficulty)?;
        self.receipts.put(rwtxn, &block_hash, &receipts.to_vec())?;
        self.best_block.put(rwtxn, &UnitKey, &number)?;
        if self.with_unconfirmed(rwtxn)? {
            self.unconfirmed.put(rwtxn, &number, &block_hash)?;
        }
        Ok(())
    }

    pub fn fast_sync_done(&self, rotxn: &RoTxn) -> Result<bool, Error> {
        let done = self.flags.get(rotxn, &Flag::FastSyncDone)?;
        Ok(done.unwrap_or_default())
    }

    pub fn set_fast_sync_done(&self, rwtxn: &mut RwTxn) -> Result<(), Error> {
        self.flags.put(rwtxn, &Flag::FastSyncDone, &true)?;
        Ok(())
    }

    pub fn with_unconfirmed(&self, rotxn: &RoTxn) -> Result<bool, Error> {
        let on = self.flags.get(rotxn, &Flag::WithUnconfirmed)?;
        Ok(on.unwrap_or_default())
    }

    /// Start staging saved blocks so that a later [`Self::clear_unconfirmed`]
    /// can drop them again.
    pub fn switch_to_with_unconfirmed(
        &self,
        rwtxn: &mut RwTxn,
    ) -> Result<(), Error> {
        self.flags.put(rwtxn, &Flag::WithUnconfirmed, &true)?;
        Ok(())
    }

    /// Drop the staged suffix: canonical index entries, total difficulties
    /// and receipts of every block saved since unconfirmed mode was switched
    /// on, rewinding the best block below the oldest staged height. Headers
    /// and bodies are kept for uncle bookkeeping.
    pub fn clear_unconfirmed(&self, rwtxn: &mut RwTxn) -> Result<(), Error> {
        let staged: Vec<(BlockNumber, BlockHash)> = self
            .unconfirmed
            .iter(rwtxn)?
            .transpose_into_fallible()
            .collect()?;
        let Some(oldest) = staged.iter().map(|(number, _)| *number).min() else {
            return Ok(());
        };
        for (number, block_hash) in staged {
            if self.canonical.get(rwtxn, &number)? == Some(block_hash) {
                self.canonical.delete(rwtxn, &number)?;
            }
            self.total_difficulties.delete(rwtxn, &block_hash)?;
            self.receipts.delete(rwtxn, &block_hash)?;
        }
        if self.best_block_number(rwtxn)? >= oldest {
            self.best_block
                .put(rwtxn, &UnitKey, &oldest.saturating_sub(1))?;
        }
        self.unconfirmed.clear(rwtxn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_env() -> (tempfile::TempDir, heed::Env) {
        let dir = tempfile::tempdir().unwrap();
        let env = unsafe {
            heed::EnvOpenOptions::new()
                .map_size(64 * 1024 * 1024)
                .max_dbs(ChainDb::NUM_DBS)
                .open(dir.path())
        }
        .unwrap();
        (dir, env)
    }

    fn make_block(number: BlockNumber, parent_hash: BlockHash) -> Block {
        Block {
            header: BlockHeader {
                parent_hash,
                difficulty: U256::from(10u64),
                number,
                nonce: number,
                ..Default::default()
            },
            body: BlockBody::default(),
        }
    }

    #[test]
    fn save_and_lookup_blocks() {
        let (_dir, env) = test_env();
        let db = ChainDb::new(&env).unwrap();
        let mut parent_hash = BlockHash::default();
        let mut td = U256::ZERO;
        let mut rwtxn = env.write_txn().unwrap();
        for number in 1..=3 {
            let block = make_block(number, parent_hash);
            td += block.header.difficulty;
            db.save_new_block(&mut rwtxn, &WorldDiff::default(), &block, &[], td)
                .unwrap();
            parent_hash = block.hash();
        }
        rwtxn.commit().unwrap();

        let rotxn = env.read_txn().unwrap();
        assert_eq!(db.best_block_number(&rotxn).unwrap(), 3);
        let second = db.get_block_by_number(&rotxn, 2).unwrap();
        assert_eq!(second.number(), 2);
        let third = db.get_header_by_number(&rotxn, 3).unwrap();
        assert_eq!(third.parent_hash, second.hash());
        assert_eq!(
            db.get_total_difficulty(&rotxn, third.hash()).unwrap(),
            U256::from(30u64)
        );
        assert!(db.try_get_block_by_number(&rotxn, 4).unwrap().is_none());
    }

    #[test]
    fn clear_unconfirmed_drops_staged_suffix() {
        let (_dir, env) = test_env();
        let db = ChainDb::new(&env).unwrap();
        let mut rwtxn = env.write_txn().unwrap();
        let confirmed = make_block(1, BlockHash::default());
        db.save_new_block(
            &mut rwtxn,
            &WorldDiff::default(),
            &confirmed,
            &[],
            U256::from(10u64),
        )
        .unwrap();
        db.switch_to_with_unconfirmed(&mut rwtxn).unwrap();
        let staged = make_block(2, confirmed.hash());
        db.save_new_block(
            &mut rwtxn,
            &WorldDiff::default(),
            &staged,
            &[],
            U256::from(20u64),
        )
        .unwrap();
        assert_eq!(db.best_block_number(&rwtxn).unwrap(), 2);

        db.clear_unconfirmed(&mut rwtxn).unwrap();
        assert_eq!(db.best_block_number(&rwtxn).unwrap(), 1);
        assert!(db.try_get_header_by_number(&rwtxn, 2).unwrap().is_none());
        assert!(db
            .try_get_total_difficulty(&rwtxn, staged.hash())
            .unwrap()
            .is_none());
        // archive data survives for uncle bookkeeping
        assert!(db.try_get_header(&rwtxn, staged.hash()).unwrap().is_some());
        rwtxn.commit().unwrap();
    }

    #[test]
    fn fast_sync_flag_round_trip() {
        let (_dir, env) = test_env();
        let db = ChainDb::new(&env).unwrap();
        let rotxn = env.read_txn().unwrap();
        assert!(!db.fast_sync_done(&rotxn).unwrap());
        drop(rotxn);
        let mut rwtxn = env.write_txn().unwrap();
        db.set_fast_sync_done(&mut rwtxn).unwrap();
        rwtxn.commit().unwrap();
        let rotxn = env.read_txn().unwrap();
        assert!(db.fast_sync_done(&rotxn).unwrap());
    }
}

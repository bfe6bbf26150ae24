//! Node facade wiring storage, pools, the ledger and the sync task.

use std::{net::SocketAddr, path::Path, sync::Arc};

use crate::{
    ledger::Ledger,
    net::PeerNetwork,
    pool::{TxPool, UnclePool},
    storage::{self, ChainDb},
    types::Block,
};

pub mod sync_task;

pub use sync_task::{Config as SyncConfig, SyncTaskHandle};

/// Default LMDB map size, 256 GiB.
const DB_MAP_SIZE: usize = 256 * 1024 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("heed error")]
    Heed(#[from] heed::Error),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("storage error")]
    Storage(#[from] storage::Error),
    #[error("sync task error")]
    SyncTask(#[from] sync_task::Error),
}

pub struct Node {
    env: heed::Env,
    storage: ChainDb,
    tx_pool: TxPool,
    uncle_pool: UnclePool,
    sync_task: SyncTaskHandle,
}

impl Node {
    pub fn new(
        datadir: &Path,
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn PeerNetwork>,
        config: SyncConfig,
    ) -> Result<Self, Error> {
        let env_path = datadir.join("data.mdb");
        std::fs::create_dir_all(&env_path)?;
        let env = unsafe {
            heed::EnvOpenOptions::new()
                .map_size(DB_MAP_SIZE)
                .max_dbs(ChainDb::NUM_DBS)
                .open(&env_path)
        }?;
        let storage = ChainDb::new(&env)?;
        let tx_pool = TxPool::new();
        let uncle_pool = UnclePool::new();
        let sync_task = SyncTaskHandle::new(
            env.clone(),
            storage.clone(),
            ledger,
            network,
            tx_pool.clone(),
            uncle_pool.clone(),
            config,
        );
        Ok(Self {
            env,
            storage,
            tx_pool,
            uncle_pool,
            sync_task,
        })
    }

    pub fn env(&self) -> &heed::Env {
        &self.env
    }

    pub fn storage(&self) -> &ChainDb {
        &self.storage
    }

    pub fn tx_pool(&self) -> &TxPool {
        &self.tx_pool
    }

    pub fn uncle_pool(&self) -> &UnclePool {
        &self.uncle_pool
    }

    pub fn submit_mined_block(&self, block: Block) -> Result<(), Error> {
        self.sync_task.submit_mined_block(block)?;
        Ok(())
    }

    pub fn forward_peer_message(
        &self,
        peer: SocketAddr,
        message: String,
    ) -> Result<(), Error> {
        self.sync_task.forward_message(peer, message)?;
        Ok(())
    }

    pub fn trigger_resume(&self) -> Result<(), Error> {
        self.sync_task.trigger_resume()?;
        Ok(())
    }
}

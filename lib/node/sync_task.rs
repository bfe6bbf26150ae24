//! Task driving regular (tip-following) block synchronization.
//!
//! Once fast sync has landed a recent chain prefix, this task keeps the local
//! chain in lock-step with the network: it polls the best peers for new
//! canonical headers, fetches bodies, drives execution and persistence,
//! resolves short-range forks with a bounded backward walk, and publishes
//! accepted blocks cluster-wide. All engine state is owned by the task and
//! mutated only from its own mailbox loop; every asynchronous completion
//! re-enters the mailbox as a tagged event.

use std::{
    collections::{HashSet, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use alloy_primitives::{Bytes, U256};
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    stream, StreamExt,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;
use tokio::{task::JoinHandle, time::timeout};
use tokio_stream::StreamNotifyClose;

use crate::{
    ledger::{ExecutionError, Ledger},
    net::{
        BanReason, GetHeaders, HeadersStart, PeerInfo, PeerNetwork,
        RequestError,
    },
    pool::{TxPool, UnclePool},
    storage::{self, ChainDb},
    types::{
        keccak, AcceptedBlock, Block, BlockBody, BlockHash, BlockHeader, Hash,
        Transaction,
    },
};


/// Peers considered by the random selector.
const TOP_PEERS: usize = 3;
/// Extra allowance per requested body, amortizing deserialization latency.
const PER_BODY_TIMEOUT: Duration = Duration::from_millis(100);
/// Node-data refetches use their own fixed timeout.
const NODE_DATA_TIMEOUT: Duration = Duration::from_secs(10);

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub block_headers_per_request: u64,
    pub block_bodies_per_request: usize,
    /// How far back a fork is followed before the peer is given up on.
    pub block_resolve_depth: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sync_request_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub check_for_new_block_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_headers_per_request: 200,
            block_bodies_per_request: 128,
            block_resolve_depth: 20,
            sync_request_timeout: Duration::from_secs(30),
            check_for_new_block_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error")]
    Storage(#[from] storage::Error),
    #[error("heed error")]
    Heed(#[from] heed::Error),
    #[error("chain database is corrupt: no total difficulty for parent {parent} of block {number}")]
    CorruptChainDb {
        parent: BlockHash,
        number: u64,
    },
    #[error("sync task channel closed")]
    ChannelClosed,
}

/// Completion of an asynchronous peer request, re-entering the mailbox.
enum SyncEvent {
    Resume,
    Headers {
        peer: SocketAddr,
        reverse: bool,
        res: Result<Vec<BlockHeader>, RequestError>,
    },
    Bodies {
        peer: SocketAddr,
        res: Result<Vec<BlockBody>, RequestError>,
    },
    NodeData {
        peer: SocketAddr,
        hash: Hash,
        res: Result<Bytes, RequestError>,
    },
}

/// Messages accepted through the task handle.
enum ExternalEvent {
    MinedBlock(Block),
    Message { peer: SocketAddr, message: String },
    Resume,
}

struct SyncTaskContext {
    env: heed::Env,
    storage: ChainDb,
    ledger: Arc<dyn Ledger>,
    network: Arc<dyn PeerNetwork>,
    tx_pool: TxPool,
    uncle_pool: UnclePool,
    config: Config,
}

struct SyncTask {
    ctxt: SyncTaskContext,
    /// Tentative chain segment being imported, oldest first. Adjacent
    /// entries always satisfy the parent-hash and number invariants.
    working_headers: VecDeque<BlockHeader>,
    /// Set while rewound past the local tip to resolve a fork, cleared when
    /// the reorg commits or the engine gives up.
    under_reorg: bool,
    /// Peers that failed to serve a state node, excluded from node-data
    /// requests until restart.
    node_error_peers: HashSet<SocketAddr>,
    event_tx: UnboundedSender<SyncEvent>,
    resume_timer: Option<JoinHandle<()>>,
}

/// The adjacency invariant: consecutive numbers, linked hashes.
fn check_headers(headers: &[BlockHeader]) -> bool {
    headers.windows(2).all(|pair| {
        pair[0].hash() == pair[1].parent_hash
            && pair[0].number + 1 == pair[1].number
    })
}

impl SyncTask {
    async fn run(
        mut self,
        event_rx: UnboundedReceiver<SyncEvent>,
        external_rx: UnboundedReceiver<ExternalEvent>,
    ) -> Result<(), Error> {
        enum MailboxItem {
            Event(SyncEvent),
            // None indicates that the handle channel has closed
            External(Option<ExternalEvent>),
        }
        let event_stream = event_rx.map(MailboxItem::Event);
        let external_stream =
            StreamNotifyClose::new(external_rx).map(MailboxItem::External);
        let mut mailbox_stream =
            stream::select_all([event_stream.boxed(), external_stream.boxed()]);
        self.resume_sync()?;
        while let Some(mailbox_item) = mailbox_stream.next().await {
            match mailbox_item {
                MailboxItem::Event(event) => self.handle_event(event).await?,
                MailboxItem::External(None) => return Err(Error::ChannelClosed),
                MailboxItem::External(Some(event)) => {
                    self.handle_external(event)?
                }
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: SyncEvent) -> Result<(), Error> {
        match event {
            SyncEvent::Resume => self.start_cycle(),
            SyncEvent::Headers { peer, reverse, res } => match res {
                Ok(mut headers) => {
                    self.ctxt.network.reset_blacklist_count(peer);
                    if reverse {
                        // backward batches arrive newest-first
                        headers.reverse();
                    }
                    self.process_block_headers(peer, headers)
                }
                Err(RequestError::Unavailable) => {
                    self.schedule_resume();
                    Ok(())
                }
                Err(err) => self.blacklist_and_resume(
                    peer,
                    BanReason::RequestFailed(err),
                    false,
                ),
            },
            SyncEvent::Bodies { peer, res } => match res {
                Ok(bodies) => {
                    self.ctxt.network.reset_blacklist_count(peer);
                    self.process_block_bodies(peer, bodies).await
                }
                Err(RequestError::Unavailable) => {
                    self.schedule_resume();
                    Ok(())
                }
                Err(err) => self.blacklist_and_resume(
                    peer,
                    BanReason::RequestFailed(err),
                    false,
                ),
            },
            SyncEvent::NodeData { peer, hash, res } => {
                self.process_node_data(peer, hash, res)
            }
        }
    }

    fn handle_external(&mut self, event: ExternalEvent) -> Result<(), Error> {
        match event {
            ExternalEvent::Resume => self.resume_sync(),
            ExternalEvent::MinedBlock(block) => {
                let best = {
                    let rotxn = self.ctxt.env.read_txn()?;
                    self.ctxt.storage.best_block_number(&rotxn)?
                };
                if block.number() <= best {
                    tracing::debug!(number = block.number(), best,
                        "ignoring mined block at or below the best block");
                } else {
                    // TODO import mined blocks through the executor pipeline
                    // once the miner is wired up
                    tracing::warn!(number = block.number(),
                        "dropping mined block, import is not wired up");
                }
                Ok(())
            }
            ExternalEvent::Message { peer, message } => {
                tracing::debug!(%peer, %message, "peer message");
                Ok(())
            }
        }
    }

    /// Begin a fresh cycle: drop any stale working chain and ask the best
    /// peer for headers above the local tip. A fork resolution that was in
    /// flight when the cycle reset is abandoned with it.
    fn start_cycle(&mut self) -> Result<(), Error> {
        self.working_headers.clear();
        self.under_reorg = false;
        let rotxn = self.ctxt.env.read_txn()?;
        if !self.ctxt.storage.fast_sync_done(&rotxn)? {
            drop(rotxn);
            tracing::debug!("fast sync has not completed, waiting");
            self.schedule_resume();
            return Ok(());
        }
        let start = self.ctxt.storage.best_block_number(&rotxn)? + 1;
        drop(rotxn);
        let Some(peer) = self.select_peer() else {
            tracing::debug!("no usable peer, delaying sync");
            self.schedule_resume();
            return Ok(());
        };
        self.request_headers(
            peer,
            GetHeaders {
                start: HeadersStart::Number(start),
                max_headers: self.ctxt.config.block_headers_per_request,
                skip: 0,
                reverse: false,
            },
        );
        Ok(())
    }

    fn process_block_headers(
        &mut self,
        peer: SocketAddr,
        headers: Vec<BlockHeader>,
    ) -> Result<(), Error> {
        if self.working_headers.is_empty() {
            if headers.is_empty() {
                // at tip, check again later
                self.schedule_resume();
                return Ok(());
            }
            self.working_headers.extend(headers.iter().cloned());
            return self.do_process(peer, headers);
        }
        let rejoins = match (headers.last(), self.working_headers.front()) {
            (Some(last), Some(front)) => last.hash() == front.parent_hash,
            _ => false,
        };
        if rejoins {
            for header in headers.iter().rev() {
                self.working_headers.push_front(header.clone());
            }
            self.do_process(peer, headers)
        } else {
            // the peer did not serve the predecessor we asked for
            self.blacklist_and_resume(
                peer,
                BanReason::UnrequestedHeaders,
                false,
            )
        }
    }

    fn do_process(
        &mut self,
        peer: SocketAddr,
        headers: Vec<BlockHeader>,
    ) -> Result<(), Error> {
        if !check_headers(&headers) {
            return self.blacklist_and_resume(
                peer,
                BanReason::NonSequentialHeaders,
                false,
            );
        }
        let Some(first) = headers.first() else {
            return Ok(());
        };
        let rotxn = self.ctxt.env.read_txn()?;
        let parent = match first.number.checked_sub(1) {
            Some(parent_number) => self
                .ctxt
                .storage
                .try_get_header_by_number(&rotxn, parent_number)?,
            None => None,
        };
        let Some(parent) = parent else {
            drop(rotxn);
            return self.blacklist_and_resume(
                peer,
                BanReason::NoLocalParent {
                    hash: first.parent_hash,
                    number: first.number,
                },
                false,
            );
        };
        if parent.hash() == first.parent_hash {
            let old_branch = self.get_prev_blocks(&rotxn, &headers)?;
            drop(rotxn);
            let old_td = old_branch
                .iter()
                .fold(U256::ZERO, |td, block| td + block.header.difficulty);
            let new_td = headers
                .iter()
                .fold(U256::ZERO, |td, header| td + header.difficulty);
            if new_td > old_td {
                self.commit_reorg(peer, old_branch)
            } else {
                tracing::debug!(%new_td, %old_td,
                    "received branch is not heavier, keeping current chain");
                self.ctxt.uncle_pool.add(vec![first.clone()]);
                self.under_reorg = false;
                self.schedule_resume();
                Ok(())
            }
        } else {
            drop(rotxn);
            if self.under_reorg {
                // the backward walk has gone the full resolve depth and the
                // branch still does not join the local chain
                self.under_reorg = false;
                self.blacklist_and_resume(
                    peer,
                    BanReason::ForkResolveFailed {
                        number: first.number,
                    },
                    true,
                )
            } else {
                tracing::info!(number = first.number, %peer,
                    "local chain diverges, resolving fork");
                self.under_reorg = true;
                self.request_headers(
                    peer,
                    GetHeaders {
                        start: HeadersStart::Hash(first.parent_hash),
                        max_headers: self.ctxt.config.block_resolve_depth,
                        skip: 0,
                        reverse: true,
                    },
                );
                Ok(())
            }
        }
    }

    /// The locally-canonical blocks that importing `headers` would displace:
    /// walk the batch heights in order, stopping at the first height with no
    /// local block.
    fn get_prev_blocks(
        &self,
        rotxn: &heed::RoTxn,
        headers: &[BlockHeader],
    ) -> Result<Vec<Block>, Error> {
        let mut blocks = Vec::new();
        for header in headers {
            match self
                .ctxt
                .storage
                .try_get_block_by_number(rotxn, header.number)?
            {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// The received branch is heavier: displace the old one and start
    /// fetching bodies for the working chain.
    fn commit_reorg(
        &mut self,
        peer: SocketAddr,
        old_branch: Vec<Block>,
    ) -> Result<(), Error> {
        if self.under_reorg {
            let mut rwtxn = self.ctxt.env.write_txn()?;
            self.ctxt.storage.clear_unconfirmed(&mut rwtxn)?;
            rwtxn.commit()?;
            self.under_reorg = false;
        }
        if let Some(displaced_head) = old_branch.first() {
            tracing::info!(from = displaced_head.number(),
                blocks = old_branch.len(),
                "reorganizing to a heavier branch");
            // the displaced head can still earn an uncle reward on the new
            // branch
            self.ctxt
                .uncle_pool
                .add(vec![displaced_head.header.clone()]);
        }
        // displaced transactions may still be valid on the new branch
        let displaced_txs: Vec<Transaction> = old_branch
            .iter()
            .flat_map(|block| block.body.transactions.iter().cloned())
            .collect();
        self.ctxt.tx_pool.add(displaced_txs);
        self.request_next_bodies(peer);
        Ok(())
    }

    async fn process_block_bodies(
        &mut self,
        peer: SocketAddr,
        bodies: Vec<BlockBody>,
    ) -> Result<(), Error> {
        if bodies.is_empty() || self.working_headers.is_empty() {
            return self.blacklist_and_resume(
                peer,
                BanReason::UnexpectedBodies,
                false,
            );
        }
        let blocks: Vec<Block> = self
            .working_headers
            .iter()
            .cloned()
            .zip(bodies)
            .map(|(header, body)| Block { header, body })
            .collect();
        let (valid_blocks, validation_err) =
            match self.ctxt.ledger.validate_blocks_before_execution(&blocks) {
                Ok(res) => res,
                Err(err) => {
                    return self.blacklist_and_resume(
                        peer,
                        BanReason::PreValidationFailed(err.to_string()),
                        false,
                    )
                }
            };
        if let Some(err) = &validation_err {
            tracing::debug!(%err, valid = valid_blocks.len(),
                "pre-execution validation cut the batch short");
        }
        let Some(first) = valid_blocks.first() else {
            let detail = validation_err
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no valid blocks in batch".into());
            return self.blacklist_and_resume(
                peer,
                BanReason::PreValidationFailed(detail),
                false,
            );
        };
        let parent_td = {
            let rotxn = self.ctxt.env.read_txn()?;
            self.ctxt
                .storage
                .try_get_total_difficulty(&rotxn, first.header.parent_hash)?
        };
        // the parent was established during header processing, so a missing
        // total difficulty means the database is corrupt
        let Some(parent_td) = parent_td else {
            let err = Error::CorruptChainDb {
                parent: first.header.parent_hash,
                number: first.number(),
            };
            tracing::error!(%err, "stopping regular sync");
            return Err(err);
        };
        let (imported, exec_err) =
            self.execute_blocks(&valid_blocks, parent_td).await?;
        if !imported.is_empty() {
            self.ctxt.network.publish_accepted_blocks(imported.clone());
            self.ctxt.ledger.refresh_validation_reference();
        }
        match exec_err {
            None => {
                // advance past the imported prefix
                for _ in 0..imported.len() {
                    self.working_headers.pop_front();
                }
                if self.working_headers.is_empty() {
                    self.schedule_resume();
                } else {
                    self.request_next_bodies(peer);
                }
                Ok(())
            }
            Some(ExecutionError::MissingStateNode { hash, trie }) => {
                tracing::warn!(hash = %hex::encode(hash), %trie,
                    "state node missing locally, refetching");
                let node_peer = self.node_ok_peer().unwrap_or(peer);
                self.request_node_data(node_peer, hash);
                Ok(())
            }
            Some(err) => {
                let number = err.block_number().unwrap_or(first.number());
                self.blacklist_and_resume(
                    peer,
                    BanReason::ExecutionFailed {
                        number,
                        detail: err.to_string(),
                    },
                    false,
                )
            }
        }
    }

    /// Execute `blocks` in order on top of `parent_td`, persisting every
    /// success. Stops at the first failure; later blocks are not attempted,
    /// so the persisted prefix stays consistent.
    async fn execute_blocks(
        &mut self,
        blocks: &[Block],
        parent_td: U256,
    ) -> Result<(Vec<AcceptedBlock>, Option<ExecutionError>), Error> {
        let mut td = parent_td;
        let mut imported = Vec::with_capacity(blocks.len());
        for block in blocks {
            match self.ctxt.ledger.execute_block(block).await {
                Ok(outcome) => {
                    td += block.header.difficulty;
                    let mut rwtxn = self.ctxt.env.write_txn()?;
                    self.ctxt.storage.save_new_block(
                        &mut rwtxn,
                        &outcome.world,
                        block,
                        &outcome.receipts,
                        td,
                    )?;
                    rwtxn.commit()?;
                    self.ctxt.tx_pool.remove(&block.body.transactions);
                    let mut stale = vec![block.header.clone()];
                    stale.extend(block.body.ommers.iter().cloned());
                    self.ctxt.uncle_pool.remove(&stale);
                    tracing::debug!(number = block.number(),
                        hash = %block.hash(), gas_used = outcome.gas_used,
                        "imported block");
                    imported.push(AcceptedBlock {
                        block: block.clone(),
                        total_difficulty: td,
                    });
                }
                Err(err) => return Ok((imported, Some(err))),
            }
        }
        Ok((imported, None))
    }

    fn process_node_data(
        &mut self,
        peer: SocketAddr,
        hash: Hash,
        res: Result<Bytes, RequestError>,
    ) -> Result<(), Error> {
        match res {
            Ok(node) if keccak(&node) == hash => {
                self.ctxt.network.reset_blacklist_count(peer);
                let mut rwtxn = self.ctxt.env.write_txn()?;
                self.ctxt.storage.put_state_node(&mut rwtxn, hash, &node)?;
                rwtxn.commit()?;
                tracing::debug!(hash = %hex::encode(hash),
                    "stored refetched state node");
                // the block that needed it will be retried on this cycle
                self.resume_sync()
            }
            Ok(_) => {
                tracing::warn!(%peer, hash = %hex::encode(hash),
                    "state node does not match its hash");
                self.node_error_peers.insert(peer);
                self.resume_sync()
            }
            Err(err) => {
                tracing::warn!(%peer, %err, "state node refetch failed");
                self.node_error_peers.insert(peer);
                self.resume_sync()
            }
        }
    }

    /// Usable peers, heaviest first.
    fn usable_peers(&self) -> Vec<(SocketAddr, PeerInfo)> {
        let mut peers: Vec<_> = self
            .ctxt
            .network
            .handshaked_peers()
            .into_iter()
            .filter(|(_, info)| info.fork_accepted)
            .collect();
        peers.sort_by(|a, b| b.1.total_difficulty.cmp(&a.1.total_difficulty));
        peers
    }

    /// Uniform random choice among the top [`TOP_PEERS`] by total
    /// difficulty: biasing to the top preserves tip freshness, randomizing
    /// avoids hot-spotting a single peer.
    fn select_peer(&self) -> Option<SocketAddr> {
        let peers = self.usable_peers();
        let top = &peers[..peers.len().min(TOP_PEERS)];
        top.choose(&mut rand::thread_rng()).map(|(addr, _)| *addr)
    }

    /// Same procedure, excluding peers that previously failed to serve a
    /// state node.
    fn node_ok_peer(&self) -> Option<SocketAddr> {
        let peers: Vec<_> = self
            .usable_peers()
            .into_iter()
            .filter(|(addr, _)| !self.node_error_peers.contains(addr))
            .collect();
        let top = &peers[..peers.len().min(TOP_PEERS)];
        top.choose(&mut rand::thread_rng()).map(|(addr, _)| *addr)
    }

    fn request_headers(&self, peer: SocketAddr, request: GetHeaders) {
        let network = self.ctxt.network.clone();
        let event_tx = self.event_tx.clone();
        let reverse = request.reverse;
        let request_timeout = self.ctxt.config.sync_request_timeout;
        tokio::spawn(async move {
            let res = match timeout(
                request_timeout,
                network.request_headers(peer, request),
            )
            .await
            {
                Ok(res) => res,
                Err(_elapsed) => Err(RequestError::Timeout),
            };
            let _ = event_tx.unbounded_send(SyncEvent::Headers {
                peer,
                reverse,
                res,
            });
        });
    }

    fn request_next_bodies(&self, peer: SocketAddr) {
        let hashes: Vec<BlockHash> = self
            .working_headers
            .iter()
            .take(self.ctxt.config.block_bodies_per_request)
            .map(|header| header.hash())
            .collect();
        let network = self.ctxt.network.clone();
        let event_tx = self.event_tx.clone();
        let request_timeout = self.ctxt.config.sync_request_timeout
            + PER_BODY_TIMEOUT * hashes.len() as u32;
        tokio::spawn(async move {
            let res = match timeout(
                request_timeout,
                network.request_bodies(peer, hashes),
            )
            .await
            {
                Ok(res) => res,
                Err(_elapsed) => Err(RequestError::Timeout),
            };
            let _ = event_tx.unbounded_send(SyncEvent::Bodies { peer, res });
        });
    }

    fn request_node_data(&self, peer: SocketAddr, hash: Hash) {
        let network = self.ctxt.network.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let res = match timeout(
                NODE_DATA_TIMEOUT,
                network.request_node_data(peer, hash),
            )
            .await
            {
                Ok(res) => res,
                Err(_elapsed) => Err(RequestError::Timeout),
            };
            let _ =
                event_tx.unbounded_send(SyncEvent::NodeData { peer, hash, res });
        });
    }

    fn blacklist_and_resume(
        &mut self,
        peer: SocketAddr,
        reason: BanReason,
        force: bool,
    ) -> Result<(), Error> {
        tracing::warn!(%peer, %reason, force, "blacklisting peer");
        self.ctxt.network.blacklist_peer(peer, reason, force);
        self.resume_sync()
    }

    /// Immediate self-tick: the next mailbox turn starts a fresh cycle.
    /// Supersedes any pending delayed resume.
    fn resume_sync(&mut self) -> Result<(), Error> {
        if let Some(timer) = self.resume_timer.take() {
            timer.abort();
        }
        self.event_tx
            .unbounded_send(SyncEvent::Resume)
            .map_err(|_| Error::ChannelClosed)
    }

    /// Arm the delayed resume; a newer schedule replaces an older one.
    fn schedule_resume(&mut self) {
        if let Some(timer) = self.resume_timer.take() {
            timer.abort();
        }
        let event_tx = self.event_tx.clone();
        let delay = self.ctxt.config.check_for_new_block_interval;
        self.resume_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.unbounded_send(SyncEvent::Resume);
        }));
    }
}

/// Handle to the regular sync task. The task is aborted on drop.
#[derive(Clone)]
pub struct SyncTaskHandle {
    task: Arc<JoinHandle<()>>,
    external_tx: UnboundedSender<ExternalEvent>,
}

impl SyncTaskHandle {
    pub fn new(
        env: heed::Env,
        storage: ChainDb,
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn PeerNetwork>,
        tx_pool: TxPool,
        uncle_pool: UnclePool,
        config: Config,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded();
        let (external_tx, external_rx) = mpsc::unbounded();
        let task = SyncTask {
            ctxt: SyncTaskContext {
                env,
                storage,
                ledger,
                network,
                tx_pool,
                uncle_pool,
                config,
            },
            working_headers: VecDeque::new(),
            under_reorg: false,
            node_error_peers: HashSet::new(),
            event_tx,
            resume_timer: None,
        };
        let task = tokio::spawn(async move {
            if let Err(err) = task.run(event_rx, external_rx).await {
                let err = anyhow::Error::from(err);
                tracing::error!("Regular sync task error: {err:#}");
            }
        });
        SyncTaskHandle {
            task: Arc::new(task),
            external_tx,
        }
    }

    /// Hand a locally mined block to the engine.
    pub fn submit_mined_block(&self, block: Block) -> Result<(), Error> {
        self.external_tx
            .unbounded_send(ExternalEvent::MinedBlock(block))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Forward a generic peer message; the engine only logs these.
    pub fn forward_message(
        &self,
        peer: SocketAddr,
        message: String,
    ) -> Result<(), Error> {
        self.external_tx
            .unbounded_send(ExternalEvent::Message { peer, message })
            .map_err(|_| Error::ChannelClosed)
    }

    /// Nudge the engine into an immediate sync cycle.
    pub fn trigger_resume(&self) -> Result<(), Error> {
        self.external_tx
            .unbounded_send(ExternalEvent::Resume)
            .map_err(|_| Error::ChannelClosed)
    }
}

impl Drop for SyncTaskHandle {
    fn drop(&mut self) {
        // `Arc::get_mut` only succeeds for the last live handle, so clones
        // keep the task running and the final drop stops it
        if let Some(task) = Arc::get_mut(&mut self.task) {
            task.abort()
        }
    }
}

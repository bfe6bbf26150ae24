//! Peer-layer contract for the sync engine.
//!
//! The transport and handshake protocol live behind [`PeerNetwork`]; the
//! engine only sees handshaked peers, issues requests against them, and
//! signals misbehavior back through blacklisting.

use std::{collections::HashMap, net::SocketAddr};

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    AcceptedBlock, BlockBody, BlockHash, BlockHeader, BlockNumber, Hash,
};

/// Peer metadata recorded at handshake time. The peer layer removes
/// blacklisted peers from the handshaked map itself.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PeerInfo {
    pub total_difficulty: U256,
    pub best_block_hash: BlockHash,
    /// The peer accepted our side of the fork check during the handshake.
    pub fork_accepted: bool,
}

/// Where a header request starts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum HeadersStart {
    Number(BlockNumber),
    Hash(BlockHash),
}

/// Parameters of a `GetBlockHeaders` request.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GetHeaders {
    pub start: HeadersStart,
    pub max_headers: u64,
    pub skip: u64,
    /// Walk from `start` towards older blocks. Responses come newest-first.
    pub reverse: bool,
}

/// Why a request produced no usable response.
#[must_use]
#[derive(Debug, Error)]
pub enum RequestError {
    /// The peer answered, but had nothing useful for this request.
    #[error("peer had no useful response")]
    Unavailable,
    /// The peer answered with something that does not decode or does not
    /// match the request.
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
}

/// Grounds for blacklisting a peer.
#[derive(Debug, Error)]
pub enum BanReason {
    #[error("served headers that are not a chain")]
    NonSequentialHeaders,
    #[error("served headers that extend neither the local chain nor the working chain")]
    UnrequestedHeaders,
    #[error("no local parent for header {hash} at {number}")]
    NoLocalParent { hash: BlockHash, number: BlockNumber },
    #[error("fork at {number} does not rejoin the local chain within resolve depth")]
    ForkResolveFailed { number: BlockNumber },
    #[error("served bodies with no working headers to pair them with")]
    UnexpectedBodies,
    #[error("blocks failed pre-execution validation: {0}")]
    PreValidationFailed(String),
    #[error("execution of block {number} failed: {detail}")]
    ExecutionFailed { number: BlockNumber, detail: String },
    #[error("request failed: {0}")]
    RequestFailed(RequestError),
}

/// The peer layer as seen from the sync engine.
///
/// Requests are raw: the engine owns timeouts and maps each outcome onto the
/// resume/blacklist policy. The peer layer also owns propagation of accepted
/// blocks to the rest of the cluster.
#[async_trait]
pub trait PeerNetwork: Send + Sync + 'static {
    /// Snapshot of the handshaked peer map.
    fn handshaked_peers(&self) -> HashMap<SocketAddr, PeerInfo>;

    async fn request_headers(
        &self,
        peer: SocketAddr,
        request: GetHeaders,
    ) -> Result<Vec<BlockHeader>, RequestError>;

    async fn request_bodies(
        &self,
        peer: SocketAddr,
        hashes: Vec<BlockHash>,
    ) -> Result<Vec<BlockBody>, RequestError>;

    async fn request_node_data(
        &self,
        peer: SocketAddr,
        hash: Hash,
    ) -> Result<Bytes, RequestError>;

    /// Signal that a peer misbehaved. `force` bypasses the peer layer's
    /// strike counting and bans outright.
    fn blacklist_peer(&self, peer: SocketAddr, reason: BanReason, force: bool);

    /// Credit a peer for a usable response.
    fn reset_blacklist_count(&self, peer: SocketAddr);

    /// Publish accepted blocks cluster-wide.
    fn publish_accepted_blocks(&self, blocks: Vec<AcceptedBlock>);
}

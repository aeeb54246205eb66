//! Error types

use thiserror::Error;

use crate::kv::KvError;
use crate::state::StateReadError;

/// Errors surfaced by the tracing daemon.
#[derive(Debug, Error)]
pub enum TracerError {
    /// Std IO Error
    #[error("Std I/O error. {0:?}")]
    StdIoError(#[from] std::io::Error),
    /// Remote KV transport failure
    #[error("KV error. {0}")]
    Kv(#[from] KvError),
    /// Historical state decode failure
    #[error("State error. {0}")]
    State(#[from] StateReadError),
    /// Interpreter-visible state failure
    #[error("Execution state error. {0}")]
    ExecutionState(#[from] traced_evm::state::StateError),
    #[error("Hex Error. {0}")]
    FromHexError(#[from] hex::FromHexError),
    #[error("Json Error. {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Rlp Error. {0}")]
    Rlp(#[from] rlp::DecoderError),
    #[error("Sender recovery failed: {0}")]
    SenderRecovery(String),
    #[error("Chain config not found")]
    MissingChainConfig,
    #[error("Block not found: {0}")]
    BlockNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Transaction {0} in block failed: {1}")]
    ReplayFailed(usize, String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Worker terminated: {0}")]
    WorkerGone(String),
}

impl TracerError {
    /// JSON-RPC error code for the failure.
    #[must_use]
    pub fn rpc_code(&self) -> i32 {
        match self {
            TracerError::InvalidParams(_) => -32602,
            _ => -32000,
        }
    }
}

//! Historical state access over the KV tables: the account/storage history
//! indices point at the change set holding the value as of a block, with the
//! plain state as the fallback for never-changed-since entries.

mod account;
mod history;
mod reader;
mod remote;

pub use account::{decode_account, encode_account};
pub use history::HistoryIndex;
pub use reader::HistoricalStateReader;
pub use remote::SyncStateReader;

use thiserror::Error;

use crate::kv::KvError;

#[derive(Debug, Error)]
pub enum StateReadError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("corrupt {table} record: {reason}")]
    Decode { table: String, reason: String },
}

impl StateReadError {
    pub(crate) fn decode(table: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            table: table.to_owned(),
            reason: reason.into(),
        }
    }
}

pub mod tables {
    pub const PLAIN_STATE: &str = "PlainState";
    pub const ACCOUNT_HISTORY: &str = "AccountHistory";
    pub const STORAGE_HISTORY: &str = "StorageHistory";
    pub const ACCOUNT_CHANGE_SET: &str = "AccountChangeSet";
    pub const STORAGE_CHANGE_SET: &str = "StorageChangeSet";
    pub const CODE: &str = "Code";
    pub const CANONICAL_HEADERS: &str = "CanonicalHeader";
    pub const HEADERS: &str = "Header";
    pub const HEADER_NUMBERS: &str = "HeaderNumber";
    pub const BLOCK_BODIES: &str = "BlockBody";
    pub const CONFIG: &str = "Config";
    pub const TX_LOOKUP: &str = "TxLookup";
}

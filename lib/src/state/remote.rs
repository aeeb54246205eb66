use std::sync::Arc;

use ethnum::U256;
use tokio::runtime::Handle;
use traced_evm::state::{AccountInfo, StateError, StateReader};
use traced_evm::types::Address;

use super::HistoricalStateReader;

/// Synchronous adapter the interpreter reads through. Every call parks the
/// worker thread on the async read; it must only be used from
/// `spawn_blocking` threads, never from a reactor task.
pub struct SyncStateReader {
    inner: Arc<HistoricalStateReader>,
    handle: Handle,
}

impl SyncStateReader {
    #[must_use]
    pub fn new(inner: Arc<HistoricalStateReader>, handle: Handle) -> Self {
        Self { inner, handle }
    }
}

impl StateReader for SyncStateReader {
    fn read_account(&self, address: &Address) -> Result<Option<AccountInfo>, StateError> {
        self.handle
            .block_on(self.inner.read_account(address))
            .map_err(|error| StateError::Read(error.to_string()))
    }

    fn read_storage(&self, address: &Address, location: &U256) -> Result<U256, StateError> {
        self.handle
            .block_on(self.inner.read_storage(address, location))
            .map_err(|error| StateError::Read(error.to_string()))
    }

    fn read_code(&self, code_hash: &[u8; 32]) -> Result<Vec<u8>, StateError> {
        self.handle
            .block_on(self.inner.read_code(code_hash))
            .map_err(|error| StateError::Read(error.to_string()))
    }
}

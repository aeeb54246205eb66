use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ethnum::U256;
use log::debug;
use traced_evm::state::AccountInfo;
use traced_evm::types::Address;

use crate::kv::DatabaseReader;

use super::account::decode_account;
use super::history::HistoryIndex;
use super::{tables, StateReadError};

fn u256_from_trimmed_be(bytes: &[u8], table: &str) -> Result<U256, StateReadError> {
    if bytes.len() > 32 {
        return Err(StateReadError::decode(table, "storage value wider than 32 bytes"));
    }
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(U256::from_be_bytes(padded))
}

/// Account, storage and code reads pinned at one block number. A value "at
/// block N" is the state after block N was executed: the history index is
/// searched for the first change at N+1 or later, whose change-set entry
/// still holds the pre-change value.
pub struct HistoricalStateReader {
    db: Arc<dyn DatabaseReader>,
    block: u64,
    account_cache: Mutex<HashMap<Address, Option<AccountInfo>>>,
    storage_cache: Mutex<HashMap<(Address, U256), U256>>,
    code_cache: Mutex<HashMap<[u8; 32], Vec<u8>>>,
}

impl HistoricalStateReader {
    #[must_use]
    pub fn new(db: Arc<dyn DatabaseReader>, block: u64) -> Self {
        Self {
            db,
            block,
            account_cache: Mutex::new(HashMap::new()),
            storage_cache: Mutex::new(HashMap::new()),
            code_cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn block(&self) -> u64 {
        self.block
    }

    pub async fn read_account(
        &self,
        address: &Address,
    ) -> Result<Option<AccountInfo>, StateReadError> {
        if let Some(hit) = self.account_cache.lock().expect("cache lock").get(address) {
            return Ok(hit.clone());
        }

        let account = self.lookup_account(address).await?;
        debug!(
            "read_account {{ address: {address}, block: {} }} -> {account:?}",
            self.block
        );
        self.account_cache
            .lock()
            .expect("cache lock")
            .insert(*address, account.clone());
        Ok(account)
    }

    async fn lookup_account(
        &self,
        address: &Address,
    ) -> Result<Option<AccountInfo>, StateReadError> {
        let mut history_key = address.as_bytes().to_vec();
        history_key.extend_from_slice(&self.block.to_be_bytes());

        let found = self.db.get(tables::ACCOUNT_HISTORY, &history_key).await?;
        if found.key.starts_with(address.as_bytes()) {
            let index = HistoryIndex::decode(&found.value, tables::ACCOUNT_HISTORY)?;
            if let Some(change_block) = index.first_at_or_after(self.block + 1) {
                let payload = self
                    .db
                    .get_both_range(
                        tables::ACCOUNT_CHANGE_SET,
                        &change_block.to_be_bytes(),
                        address.as_bytes(),
                    )
                    .await?;
                if let Some(payload) = payload {
                    if payload.starts_with(address.as_bytes()) {
                        let record = &payload[20..];
                        if record.is_empty() {
                            // Account first appeared after the pinned block.
                            return Ok(None);
                        }
                        return decode_account(record, tables::ACCOUNT_CHANGE_SET).map(Some);
                    }
                }
            }
        }

        let plain = self.db.get_one(tables::PLAIN_STATE, address.as_bytes()).await?;
        if plain.is_empty() {
            return Ok(None);
        }
        decode_account(&plain, tables::PLAIN_STATE).map(Some)
    }

    pub async fn read_storage(
        &self,
        address: &Address,
        location: &U256,
    ) -> Result<U256, StateReadError> {
        if let Some(hit) = self
            .storage_cache
            .lock()
            .expect("cache lock")
            .get(&(*address, *location))
        {
            return Ok(*hit);
        }

        let value = self.lookup_storage(address, location).await?;
        self.storage_cache
            .lock()
            .expect("cache lock")
            .insert((*address, *location), value);
        Ok(value)
    }

    async fn lookup_storage(
        &self,
        address: &Address,
        location: &U256,
    ) -> Result<U256, StateReadError> {
        let slot = location.to_be_bytes();

        let mut history_key = address.as_bytes().to_vec();
        history_key.extend_from_slice(&slot);
        history_key.extend_from_slice(&self.block.to_be_bytes());

        let mut subkey = address.as_bytes().to_vec();
        subkey.extend_from_slice(&slot);

        let found = self.db.get(tables::STORAGE_HISTORY, &history_key).await?;
        if found.key.starts_with(&subkey) {
            let index = HistoryIndex::decode(&found.value, tables::STORAGE_HISTORY)?;
            if let Some(change_block) = index.first_at_or_after(self.block + 1) {
                let payload = self
                    .db
                    .get_both_range(
                        tables::STORAGE_CHANGE_SET,
                        &change_block.to_be_bytes(),
                        &subkey,
                    )
                    .await?;
                if let Some(payload) = payload {
                    if payload.starts_with(&subkey) {
                        return u256_from_trimmed_be(&payload[52..], tables::STORAGE_CHANGE_SET);
                    }
                }
            }
        }

        // Never changed after the pinned block: read the live value.
        let Some(account) = self.read_account(address).await? else {
            return Ok(U256::ZERO);
        };
        let incarnation = if account.incarnation == 0 { 1 } else { account.incarnation };
        let mut plain_key = address.as_bytes().to_vec();
        plain_key.extend_from_slice(&incarnation.to_be_bytes());
        plain_key.extend_from_slice(&slot);
        let value = self.db.get_one(tables::PLAIN_STATE, &plain_key).await?;
        if value.is_empty() {
            return Ok(U256::ZERO);
        }
        u256_from_trimmed_be(&value, tables::PLAIN_STATE)
    }

    pub async fn read_code(&self, code_hash: &[u8; 32]) -> Result<Vec<u8>, StateReadError> {
        if let Some(hit) = self.code_cache.lock().expect("cache lock").get(code_hash) {
            return Ok(hit.clone());
        }
        let code = self.db.get_one(tables::CODE, code_hash).await?;
        self.code_cache
            .lock()
            .expect("cache lock")
            .insert(*code_hash, code.clone());
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryDatabaseReader;
    use crate::state::account::encode_account;
    use traced_evm::types::keccak256;

    fn address(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn history_key(address: &Address, block: u64) -> Vec<u8> {
        let mut key = address.as_bytes().to_vec();
        key.extend_from_slice(&block.to_be_bytes());
        key
    }

    fn account(nonce: u64, balance: u64) -> AccountInfo {
        AccountInfo {
            nonce,
            balance: U256::from(balance),
            ..AccountInfo::default()
        }
    }

    fn changeset_payload(address: &Address, record: &[u8]) -> Vec<u8> {
        let mut payload = address.as_bytes().to_vec();
        payload.extend_from_slice(record);
        payload
    }

    #[tokio::test]
    async fn account_resolves_through_the_change_set() {
        let addr = address(0x11);
        let mut db = MemoryDatabaseReader::new();
        // The account changed at blocks 90 and 120; at block 100 the value
        // before the block-120 change applies.
        db.insert(
            tables::ACCOUNT_HISTORY,
            history_key(&addr, 120),
            HistoryIndex::from_blocks(&[90, 120]).encode(),
        );
        db.insert_dup(
            tables::ACCOUNT_CHANGE_SET,
            &120u64.to_be_bytes(),
            &changeset_payload(&addr, &encode_account(&account(3, 777))),
        );
        db.insert(
            tables::PLAIN_STATE,
            addr.as_bytes().to_vec(),
            encode_account(&account(9, 999_999)),
        );

        let reader = HistoricalStateReader::new(Arc::new(db), 100);
        let found = reader.read_account(&addr).await.unwrap().unwrap();
        assert_eq!(found.nonce, 3);
        assert_eq!(found.balance, U256::from(777u64));
    }

    #[tokio::test]
    async fn account_falls_back_to_plain_state() {
        let addr = address(0x11);
        let mut db = MemoryDatabaseReader::new();
        db.insert(
            tables::ACCOUNT_HISTORY,
            history_key(&addr, 90),
            HistoryIndex::from_blocks(&[80, 90]).encode(),
        );
        db.insert(
            tables::PLAIN_STATE,
            addr.as_bytes().to_vec(),
            encode_account(&account(9, 42)),
        );

        // Pinned after the last change: live state applies.
        let reader = HistoricalStateReader::new(Arc::new(db), 100);
        let found = reader.read_account(&addr).await.unwrap().unwrap();
        assert_eq!(found.nonce, 9);
        assert_eq!(found.balance, U256::from(42u64));
    }

    #[tokio::test]
    async fn account_created_later_does_not_exist_yet() {
        let addr = address(0x11);
        let mut db = MemoryDatabaseReader::new();
        db.insert(
            tables::ACCOUNT_HISTORY,
            history_key(&addr, 150),
            HistoryIndex::from_blocks(&[150]).encode(),
        );
        // The change-set entry carries no record: the account was created at
        // block 150.
        db.insert_dup(
            tables::ACCOUNT_CHANGE_SET,
            &150u64.to_be_bytes(),
            &changeset_payload(&addr, &[]),
        );

        let reader = HistoricalStateReader::new(Arc::new(db), 100);
        assert!(reader.read_account(&addr).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_account_is_none() {
        let db = MemoryDatabaseReader::new();
        let reader = HistoricalStateReader::new(Arc::new(db), 100);
        assert!(reader.read_account(&address(0x11)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_resolves_through_history_and_plain_state() {
        let addr = address(0x11);
        let slot = U256::from(1u8);
        let mut db = MemoryDatabaseReader::new();

        let mut storage_history_key = addr.as_bytes().to_vec();
        storage_history_key.extend_from_slice(&slot.to_be_bytes());
        storage_history_key.extend_from_slice(&200u64.to_be_bytes());
        db.insert(
            tables::STORAGE_HISTORY,
            storage_history_key,
            HistoryIndex::from_blocks(&[200]).encode(),
        );
        let mut payload = addr.as_bytes().to_vec();
        payload.extend_from_slice(&slot.to_be_bytes());
        payload.extend_from_slice(&U256::from(0x2Au8).to_be_bytes());
        db.insert_dup(tables::STORAGE_CHANGE_SET, &200u64.to_be_bytes(), &payload);

        db.insert(tables::PLAIN_STATE, addr.as_bytes().to_vec(), encode_account(&account(1, 1)));
        let mut plain_key = addr.as_bytes().to_vec();
        plain_key.extend_from_slice(&1u64.to_be_bytes());
        plain_key.extend_from_slice(&U256::from(2u8).to_be_bytes());
        db.insert(tables::PLAIN_STATE, plain_key, vec![0x55]);

        let reader = HistoricalStateReader::new(Arc::new(db), 100);
        // Slot 1 changed later: its historical value comes from the change set.
        assert_eq!(
            reader.read_storage(&addr, &slot).await.unwrap(),
            U256::from(0x2Au8)
        );
        // Slot 2 never changed: the live value applies.
        assert_eq!(
            reader.read_storage(&addr, &U256::from(2u8)).await.unwrap(),
            U256::from(0x55u8)
        );
        // Untouched slot reads zero.
        assert_eq!(
            reader.read_storage(&addr, &U256::from(3u8)).await.unwrap(),
            U256::ZERO
        );
    }

    #[tokio::test]
    async fn code_by_hash_with_caching() {
        let code = vec![0x60, 0x2A];
        let hash = keccak256(&code);
        let mut db = MemoryDatabaseReader::new();
        db.insert(tables::CODE, hash.to_vec(), code.clone());

        let reader = HistoricalStateReader::new(Arc::new(db), 100);
        assert_eq!(reader.read_code(&hash).await.unwrap(), code);
        assert_eq!(reader.read_code(&hash).await.unwrap(), code);
    }
}

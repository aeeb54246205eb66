use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use ethnum::U256;
use thiserror::Error;

use crate::types::{keccak256, Address, EMPTY_CODE_HASH};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state read failed: {0}")]
    Read(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Account record as stored in the state database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: [u8; 32],
    pub incarnation: u64,
}

impl Default for AccountInfo {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: EMPTY_CODE_HASH,
            incarnation: 0,
        }
    }
}

/// Read access to the world state pinned at one block.
pub trait StateReader: Send + Sync {
    fn read_account(&self, address: &Address) -> Result<Option<AccountInfo>>;
    fn read_storage(&self, address: &Address, location: &U256) -> Result<U256>;
    fn read_code(&self, code_hash: &[u8; 32]) -> Result<Vec<u8>>;
}

/// Read-only view tracers get at every callback. All accessors answer from
/// the overlay; a slot or account the execution never touched falls through
/// to the underlying reader.
pub trait StateView: Send {
    fn exists(&self, address: &Address) -> bool;
    fn balance(&self, address: &Address) -> U256;
    fn nonce(&self, address: &Address) -> u64;
    fn code(&self, address: &Address) -> Vec<u8>;
    fn original_storage(&self, address: &Address, location: &U256) -> U256;
    fn current_storage(&self, address: &Address, location: &U256) -> U256;
    fn touched(&self) -> Vec<Address>;
}

/// A log record accumulated in the transaction substate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<U256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct StateObject {
    /// None when the account does not exist at this point.
    info: Option<AccountInfo>,
    code: Option<Vec<u8>>,
    /// Slot values as of the start of the current transaction.
    committed_storage: HashMap<U256, U256>,
    current_storage: HashMap<U256, U256>,
}

#[derive(Clone)]
struct Snapshot {
    objects: HashMap<Address, StateObject>,
    touched: BTreeSet<Address>,
    created: HashSet<Address>,
    destructed: HashSet<Address>,
    logs_len: usize,
}

/// Mutable state overlay the interpreter works against during one block.
/// Reads are cached; mutations never leave the overlay.
#[derive(Clone)]
pub struct IntraBlockState {
    reader: Arc<dyn StateReader>,
    objects: HashMap<Address, StateObject>,
    touched: BTreeSet<Address>,
    created: HashSet<Address>,
    destructed: HashSet<Address>,
    logs: Vec<Log>,
    snapshots: Vec<Snapshot>,
}

impl IntraBlockState {
    pub fn new(reader: Arc<dyn StateReader>) -> Self {
        Self {
            reader,
            objects: HashMap::new(),
            touched: BTreeSet::new(),
            created: HashSet::new(),
            destructed: HashSet::new(),
            logs: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    fn object(&mut self, address: &Address) -> Result<&mut StateObject> {
        if !self.objects.contains_key(address) {
            let info = self.reader.read_account(address)?;
            self.objects.insert(*address, StateObject { info, ..StateObject::default() });
        }
        Ok(self.objects.get_mut(address).expect("inserted above"))
    }

    pub fn exists(&mut self, address: &Address) -> Result<bool> {
        if self.destructed.contains(address) {
            return Ok(false);
        }
        Ok(self.object(address)?.info.is_some())
    }

    pub fn balance(&mut self, address: &Address) -> Result<U256> {
        Ok(self
            .object(address)?
            .info
            .as_ref()
            .map_or(U256::ZERO, |info| info.balance))
    }

    pub fn nonce(&mut self, address: &Address) -> Result<u64> {
        Ok(self.object(address)?.info.as_ref().map_or(0, |info| info.nonce))
    }

    pub fn code_hash(&mut self, address: &Address) -> Result<[u8; 32]> {
        Ok(self
            .object(address)?
            .info
            .as_ref()
            .map_or(EMPTY_CODE_HASH, |info| info.code_hash))
    }

    pub fn code(&mut self, address: &Address) -> Result<Vec<u8>> {
        let hash = self.code_hash(address)?;
        if hash == EMPTY_CODE_HASH {
            return Ok(Vec::new());
        }
        let object = self.object(address)?;
        if let Some(code) = &object.code {
            return Ok(code.clone());
        }
        let code = self.reader.read_code(&hash)?;
        self.object(address)?.code = Some(code.clone());
        Ok(code)
    }

    pub fn add_balance(&mut self, address: &Address, amount: U256) -> Result<()> {
        self.touched.insert(*address);
        let object = self.object(address)?;
        let info = object.info.get_or_insert_with(AccountInfo::default);
        info.balance = info.balance.wrapping_add(amount);
        Ok(())
    }

    pub fn sub_balance(&mut self, address: &Address, amount: U256) -> Result<()> {
        self.touched.insert(*address);
        let object = self.object(address)?;
        let info = object.info.get_or_insert_with(AccountInfo::default);
        info.balance = info.balance.wrapping_sub(amount);
        Ok(())
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: U256) -> Result<()> {
        self.sub_balance(from, amount)?;
        self.add_balance(to, amount)
    }

    pub fn increment_nonce(&mut self, address: &Address) -> Result<()> {
        self.touched.insert(*address);
        let object = self.object(address)?;
        let info = object.info.get_or_insert_with(AccountInfo::default);
        info.nonce += 1;
        Ok(())
    }

    pub fn set_nonce(&mut self, address: &Address, nonce: u64) -> Result<()> {
        self.touched.insert(*address);
        let object = self.object(address)?;
        let info = object.info.get_or_insert_with(AccountInfo::default);
        info.nonce = nonce;
        Ok(())
    }

    pub fn set_code(&mut self, address: &Address, code: Vec<u8>) -> Result<()> {
        self.touched.insert(*address);
        let hash = keccak256(&code);
        let object = self.object(address)?;
        let info = object.info.get_or_insert_with(AccountInfo::default);
        info.code_hash = hash;
        object.code = Some(code);
        Ok(())
    }

    /// Prepare `address` for a fresh contract deployment. The balance is
    /// preserved, storage starts from the next incarnation.
    pub fn create_contract(&mut self, address: &Address) -> Result<()> {
        self.touched.insert(*address);
        self.created.insert(*address);
        let object = self.object(address)?;
        let balance = object.info.as_ref().map_or(U256::ZERO, |info| info.balance);
        let incarnation = object.info.as_ref().map_or(0, |info| info.incarnation) + 1;
        object.info = Some(AccountInfo {
            nonce: 0,
            balance,
            code_hash: EMPTY_CODE_HASH,
            incarnation,
        });
        object.code = Some(Vec::new());
        object.committed_storage.clear();
        object.current_storage.clear();
        Ok(())
    }

    pub fn selfdestruct(&mut self, address: &Address, beneficiary: &Address) -> Result<()> {
        let balance = self.balance(address)?;
        self.add_balance(beneficiary, balance)?;
        self.sub_balance(address, balance)?;
        self.destructed.insert(*address);
        Ok(())
    }

    pub fn storage(&mut self, address: &Address, location: &U256) -> Result<U256> {
        if let Some(value) = self.object(address)?.current_storage.get(location) {
            return Ok(*value);
        }
        let value = self.committed_storage(address, location)?;
        self.object(address)?.current_storage.insert(*location, value);
        Ok(value)
    }

    /// Slot value as of the start of the current transaction.
    pub fn committed_storage(&mut self, address: &Address, location: &U256) -> Result<U256> {
        if self.created.contains(address) {
            if let Some(value) = self.object(address)?.committed_storage.get(location) {
                return Ok(*value);
            }
            return Ok(U256::ZERO);
        }
        if let Some(value) = self.object(address)?.committed_storage.get(location) {
            return Ok(*value);
        }
        let value = self.reader.read_storage(address, location)?;
        self.object(address)?
            .committed_storage
            .insert(*location, value);
        Ok(value)
    }

    pub fn set_storage(&mut self, address: &Address, location: &U256, value: U256) -> Result<()> {
        self.touched.insert(*address);
        self.object(address)?.current_storage.insert(*location, value);
        Ok(())
    }

    pub fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Overlay snapshot for call-frame revert handling.
    pub fn take_snapshot(&mut self) -> usize {
        self.snapshots.push(Snapshot {
            objects: self.objects.clone(),
            touched: self.touched.clone(),
            created: self.created.clone(),
            destructed: self.destructed.clone(),
            logs_len: self.logs.len(),
        });
        self.snapshots.len() - 1
    }

    pub fn revert_to_snapshot(&mut self, id: usize) {
        let snapshot = self.snapshots.drain(id..).next().expect("unbalanced snapshot id");
        self.objects = snapshot.objects;
        self.touched = snapshot.touched;
        self.created = snapshot.created;
        self.destructed = snapshot.destructed;
        self.logs.truncate(snapshot.logs_len);
    }

    pub fn discard_snapshot(&mut self, id: usize) {
        self.snapshots.truncate(id);
    }

    /// Merge the per-transaction substate: storage writes become committed,
    /// touched/created/log sets start over for the next transaction.
    pub fn finalize_transaction(&mut self) {
        for address in &self.destructed {
            if let Some(object) = self.objects.get_mut(address) {
                object.info = None;
                object.code = None;
                object.committed_storage.clear();
                object.current_storage.clear();
            }
        }
        self.destructed.clear();
        for object in self.objects.values_mut() {
            for (location, value) in object.current_storage.drain() {
                object.committed_storage.insert(location, value);
            }
        }
        self.touched.clear();
        self.created.clear();
        self.logs.clear();
    }
}

impl StateView for IntraBlockState {
    fn exists(&self, address: &Address) -> bool {
        if self.destructed.contains(address) {
            return false;
        }
        match self.objects.get(address) {
            Some(object) => object.info.is_some(),
            None => match self.reader.read_account(address) {
                Ok(info) => info.is_some(),
                Err(err) => {
                    log::warn!("state view read failed for {address}: {err}");
                    false
                }
            },
        }
    }

    fn balance(&self, address: &Address) -> U256 {
        match self.objects.get(address) {
            Some(object) => object.info.as_ref().map_or(U256::ZERO, |info| info.balance),
            None => match self.reader.read_account(address) {
                Ok(info) => info.map_or(U256::ZERO, |info| info.balance),
                Err(err) => {
                    log::warn!("state view read failed for {address}: {err}");
                    U256::ZERO
                }
            },
        }
    }

    fn nonce(&self, address: &Address) -> u64 {
        match self.objects.get(address) {
            Some(object) => object.info.as_ref().map_or(0, |info| info.nonce),
            None => match self.reader.read_account(address) {
                Ok(info) => info.map_or(0, |info| info.nonce),
                Err(err) => {
                    log::warn!("state view read failed for {address}: {err}");
                    0
                }
            },
        }
    }

    fn code(&self, address: &Address) -> Vec<u8> {
        let Some(object) = self.objects.get(address) else {
            let hash = match self.reader.read_account(address) {
                Ok(Some(info)) => info.code_hash,
                _ => return Vec::new(),
            };
            if hash == EMPTY_CODE_HASH {
                return Vec::new();
            }
            return self.reader.read_code(&hash).unwrap_or_default();
        };
        if let Some(code) = &object.code {
            return code.clone();
        }
        let hash = object
            .info
            .as_ref()
            .map_or(EMPTY_CODE_HASH, |info| info.code_hash);
        if hash == EMPTY_CODE_HASH {
            return Vec::new();
        }
        self.reader.read_code(&hash).unwrap_or_default()
    }

    fn original_storage(&self, address: &Address, location: &U256) -> U256 {
        if let Some(object) = self.objects.get(address) {
            if let Some(value) = object.committed_storage.get(location) {
                return *value;
            }
            if self.created.contains(address) {
                return U256::ZERO;
            }
        }
        self.reader.read_storage(address, location).unwrap_or_default()
    }

    fn current_storage(&self, address: &Address, location: &U256) -> U256 {
        if let Some(object) = self.objects.get(address) {
            if let Some(value) = object.current_storage.get(location) {
                return *value;
            }
        }
        self.original_storage(address, location)
    }

    fn touched(&self) -> Vec<Address> {
        self.touched.iter().copied().collect()
    }
}

/// Map-backed reader for tests and local experiments.
#[derive(Default)]
pub struct InMemoryStateReader {
    pub accounts: HashMap<Address, AccountInfo>,
    pub storage: HashMap<(Address, U256), U256>,
    pub code: HashMap<[u8; 32], Vec<u8>>,
}

impl InMemoryStateReader {
    pub fn insert_account(&mut self, address: Address, info: AccountInfo) {
        self.accounts.insert(address, info);
    }

    pub fn insert_code(&mut self, address: Address, code: Vec<u8>) {
        let hash = keccak256(&code);
        self.code.insert(hash, code);
        if let Some(info) = self.accounts.get_mut(&address) {
            info.code_hash = hash;
        }
    }
}

impl StateReader for InMemoryStateReader {
    fn read_account(&self, address: &Address) -> Result<Option<AccountInfo>> {
        Ok(self.accounts.get(address).cloned())
    }

    fn read_storage(&self, address: &Address, location: &U256) -> Result<U256> {
        Ok(self
            .storage
            .get(&(*address, *location))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    fn read_code(&self, code_hash: &[u8; 32]) -> Result<Vec<u8>> {
        Ok(self.code.get(code_hash).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn state_with_account(byte: u8, balance: u64) -> IntraBlockState {
        let mut reader = InMemoryStateReader::default();
        reader.insert_account(
            address(byte),
            AccountInfo {
                nonce: 1,
                balance: U256::from(balance),
                ..AccountInfo::default()
            },
        );
        IntraBlockState::new(Arc::new(reader))
    }

    #[test]
    fn reads_fall_through_to_the_reader() {
        let mut state = state_with_account(1, 100);
        assert!(IntraBlockState::exists(&mut state, &address(1)).unwrap());
        assert_eq!(IntraBlockState::balance(&mut state, &address(1)).unwrap(), U256::from(100u64));
        assert!(!IntraBlockState::exists(&mut state, &address(2)).unwrap());
    }

    #[test]
    fn snapshot_revert_restores_the_overlay() {
        let mut state = state_with_account(1, 100);
        let snapshot = state.take_snapshot();
        state.add_balance(&address(1), U256::from(50u64)).unwrap();
        state
            .set_storage(&address(1), &U256::ONE, U256::from(7u64))
            .unwrap();
        state.revert_to_snapshot(snapshot);
        assert_eq!(IntraBlockState::balance(&mut state, &address(1)).unwrap(), U256::from(100u64));
        assert_eq!(state.storage(&address(1), &U256::ONE).unwrap(), U256::ZERO);
        assert!(StateView::touched(&state).is_empty());
    }

    #[test]
    fn finalize_commits_storage_and_clears_substate() {
        let mut state = state_with_account(1, 100);
        state
            .set_storage(&address(1), &U256::ZERO, U256::from(0x2au64))
            .unwrap();
        assert_eq!(StateView::touched(&state), vec![address(1)]);
        state.finalize_transaction();
        assert!(StateView::touched(&state).is_empty());
        assert_eq!(
            state.committed_storage(&address(1), &U256::ZERO).unwrap(),
            U256::from(0x2au64)
        );
        assert_eq!(
            StateView::original_storage(&state, &address(1), &U256::ZERO),
            U256::from(0x2au64)
        );
    }

    #[test]
    fn created_contracts_report_zero_original_storage() {
        let mut state = state_with_account(1, 100);
        state.create_contract(&address(3)).unwrap();
        state
            .set_storage(&address(3), &U256::ZERO, U256::from(1u64))
            .unwrap();
        assert_eq!(
            state.committed_storage(&address(3), &U256::ZERO).unwrap(),
            U256::ZERO
        );
        assert_eq!(
            state.storage(&address(3), &U256::ZERO).unwrap(),
            U256::from(1u64)
        );
    }

    #[test]
    fn selfdestruct_moves_balance_and_hides_the_account() {
        let mut state = state_with_account(1, 100);
        state.selfdestruct(&address(1), &address(9)).unwrap();
        assert_eq!(IntraBlockState::balance(&mut state, &address(9)).unwrap(), U256::from(100u64));
        assert!(!IntraBlockState::exists(&mut state, &address(1)).unwrap());
    }
}


//! Client side of the remote KV protocol: one long-lived bidirectional
//! stream per read transaction, strictly one in-flight cursor operation.

mod client;
pub mod proto;

pub use client::{RemoteCursor, RemoteKv, RemoteTransaction};

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("KV I/O error: {0}")]
    Io(#[from] tonic::Status),
    #[error("KV transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("KV stream closed by the server")]
    StreamClosed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Read access to the database tables, backed by one consistent KV
/// transaction. All reads through one reader observe the same snapshot.
#[async_trait]
pub trait DatabaseReader: Send + Sync {
    /// Position at the first entry with key >= `key` and return it. An empty
    /// pair means the table has no such entry.
    async fn get(&self, table: &str, key: &[u8]) -> Result<KeyValue, KvError>;

    /// Value of the exact `key`, empty when absent.
    async fn get_one(&self, table: &str, key: &[u8]) -> Result<Vec<u8>, KvError>;

    /// For duplicate-sorted tables: first value under `key` that is >=
    /// `subkey`, or None when `key` holds no such value.
    async fn get_both_range(
        &self,
        table: &str,
        key: &[u8],
        subkey: &[u8],
    ) -> Result<Option<Vec<u8>>, KvError>;

    /// The highest entry of the table.
    async fn last(&self, table: &str) -> Result<KeyValue, KvError>;
}

/// Map-backed reader with the same seek semantics as the remote tables.
/// Used by tests and local tooling; duplicate-sorted entries are stored as
/// `key || value` with an empty payload.
#[derive(Debug, Default)]
pub struct MemoryDatabaseReader {
    tables: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDatabaseReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, key: Vec<u8>, value: Vec<u8>) {
        self.tables.entry(table.to_owned()).or_default().insert(key, value);
    }

    /// Insert into a duplicate-sorted table: `payload` must begin with the
    /// subkey it sorts under.
    pub fn insert_dup(&mut self, table: &str, key: &[u8], payload: &[u8]) {
        let mut full = key.to_vec();
        full.extend_from_slice(payload);
        self.insert(table, full, Vec::new());
    }
}

#[async_trait]
impl DatabaseReader for MemoryDatabaseReader {
    async fn get(&self, table: &str, key: &[u8]) -> Result<KeyValue, KvError> {
        let Some(entries) = self.tables.get(table) else {
            return Ok(KeyValue::default());
        };
        Ok(entries
            .range(key.to_vec()..)
            .next()
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .unwrap_or_default())
    }

    async fn get_one(&self, table: &str, key: &[u8]) -> Result<Vec<u8>, KvError> {
        Ok(self
            .tables
            .get(table)
            .and_then(|entries| entries.get(key))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_both_range(
        &self,
        table: &str,
        key: &[u8],
        subkey: &[u8],
    ) -> Result<Option<Vec<u8>>, KvError> {
        let Some(entries) = self.tables.get(table) else {
            return Ok(None);
        };
        let mut start = key.to_vec();
        start.extend_from_slice(subkey);
        Ok(entries
            .range(start..)
            .next()
            .filter(|(full, _)| full.starts_with(key))
            .map(|(full, _)| full[key.len()..].to_vec()))
    }

    async fn last(&self, table: &str) -> Result<KeyValue, KvError> {
        let Some(entries) = self.tables.get(table) else {
            return Ok(KeyValue::default());
        };
        Ok(entries
            .iter()
            .next_back()
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .unwrap_or_default())
    }
}

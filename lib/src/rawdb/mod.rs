//! Read accessors over the chain tables: canonical hashes, headers, block
//! bodies and the chain configuration.

use log::debug;
use traced_evm::ChainConfig;

use crate::errors::TracerError;
use crate::kv::DatabaseReader;
use crate::state::tables;
use crate::types::{Block, BlockHeader, BlockId, Transaction};

fn block_key(number: u64, hash: &[u8; 32]) -> Vec<u8> {
    let mut key = number.to_be_bytes().to_vec();
    key.extend_from_slice(hash);
    key
}

pub async fn read_canonical_hash(
    db: &dyn DatabaseReader,
    number: u64,
) -> Result<Option<[u8; 32]>, TracerError> {
    let value = db
        .get_one(tables::CANONICAL_HEADERS, &number.to_be_bytes())
        .await?;
    if value.is_empty() {
        return Ok(None);
    }
    let hash: [u8; 32] = value
        .try_into()
        .map_err(|_| TracerError::InvalidParams("corrupt canonical hash entry".to_owned()))?;
    Ok(Some(hash))
}

/// Chain configuration, keyed by the canonical hash of block zero. The
/// parsed config is immutable, so it is cached process-wide per genesis.
pub async fn read_chain_config(db: &dyn DatabaseReader) -> Result<ChainConfig, TracerError> {
    static CACHE: std::sync::Mutex<Option<([u8; 32], ChainConfig)>> = std::sync::Mutex::new(None);

    let genesis = read_canonical_hash(db, 0)
        .await?
        .ok_or(TracerError::MissingChainConfig)?;
    if let Some((cached_genesis, config)) = CACHE.lock().expect("config cache lock").as_ref() {
        if *cached_genesis == genesis {
            return Ok(config.clone());
        }
    }

    let raw = db.get_one(tables::CONFIG, &genesis).await?;
    if raw.is_empty() {
        return Err(TracerError::MissingChainConfig);
    }
    let config: ChainConfig = serde_json::from_slice(&raw)?;
    debug!("chain config loaded: chain_id={}", config.chain_id);
    *CACHE.lock().expect("config cache lock") = Some((genesis, config.clone()));
    Ok(config)
}

pub async fn read_header(
    db: &dyn DatabaseReader,
    number: u64,
    hash: &[u8; 32],
) -> Result<Option<BlockHeader>, TracerError> {
    let raw = db.get_one(tables::HEADERS, &block_key(number, hash)).await?;
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(BlockHeader::from_rlp(&raw)?))
}

/// Transactions and ommer count of one block body. The body value is the
/// canonical two-item list of transactions and ommer headers.
pub async fn read_body(
    db: &dyn DatabaseReader,
    number: u64,
    hash: &[u8; 32],
) -> Result<Option<(Vec<Transaction>, usize)>, TracerError> {
    let raw = db
        .get_one(tables::BLOCK_BODIES, &block_key(number, hash))
        .await?;
    if raw.is_empty() {
        return Ok(None);
    }
    let rlp = rlp::Rlp::new(&raw);
    let transactions_rlp = rlp.at(0).map_err(TracerError::Rlp)?;
    let mut transactions = Vec::new();
    for (index, item) in transactions_rlp.iter().enumerate() {
        let mut transaction = Transaction::from_rlp(&item)?;
        transaction.transaction_index = Some(index);
        transactions.push(transaction);
    }
    let ommers = rlp.at(1).map_err(TracerError::Rlp)?.item_count()?;
    Ok(Some((transactions, ommers)))
}

pub async fn read_header_number(
    db: &dyn DatabaseReader,
    hash: &[u8; 32],
) -> Result<Option<u64>, TracerError> {
    let value = db.get_one(tables::HEADER_NUMBERS, hash).await?;
    if value.is_empty() {
        return Ok(None);
    }
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| TracerError::InvalidParams("corrupt header number entry".to_owned()))?;
    Ok(Some(u64::from_be_bytes(bytes)))
}

/// Block number holding the transaction, from the lookup table. The value is
/// a minimal big-endian number.
pub async fn read_transaction_block_number(
    db: &dyn DatabaseReader,
    tx_hash: &[u8; 32],
) -> Result<Option<u64>, TracerError> {
    let value = db.get_one(tables::TX_LOOKUP, tx_hash).await?;
    if value.is_empty() {
        return Ok(None);
    }
    if value.len() > 8 {
        return Err(TracerError::InvalidParams("corrupt tx lookup entry".to_owned()));
    }
    let mut padded = [0u8; 8];
    padded[8 - value.len()..].copy_from_slice(&value);
    Ok(Some(u64::from_be_bytes(padded)))
}

pub async fn read_latest_block_number(db: &dyn DatabaseReader) -> Result<u64, TracerError> {
    let last = db.last(tables::CANONICAL_HEADERS).await?;
    if last.key.len() != 8 {
        return Err(TracerError::BlockNotFound("empty canonical chain".to_owned()));
    }
    let bytes: [u8; 8] = last.key.try_into().expect("length checked");
    Ok(u64::from_be_bytes(bytes))
}

pub async fn read_block_by_number(
    db: &dyn DatabaseReader,
    number: u64,
) -> Result<Block, TracerError> {
    let hash = read_canonical_hash(db, number)
        .await?
        .ok_or_else(|| TracerError::BlockNotFound(format!("block {number}")))?;
    assemble_block(db, number, hash).await
}

pub async fn read_block(db: &dyn DatabaseReader, id: BlockId) -> Result<Block, TracerError> {
    match id {
        BlockId::Number(number) => read_block_by_number(db, number).await,
        BlockId::Earliest => read_block_by_number(db, 0).await,
        BlockId::Latest => {
            let number = read_latest_block_number(db).await?;
            read_block_by_number(db, number).await
        }
        BlockId::Hash(hash) => {
            let number = read_header_number(db, &hash).await?.ok_or_else(|| {
                TracerError::BlockNotFound(format!("block 0x{}", hex::encode(hash)))
            })?;
            assemble_block(db, number, hash).await
        }
    }
}

async fn assemble_block(
    db: &dyn DatabaseReader,
    number: u64,
    hash: [u8; 32],
) -> Result<Block, TracerError> {
    let header = read_header(db, number, &hash)
        .await?
        .ok_or_else(|| TracerError::BlockNotFound(format!("header for block {number}")))?;
    let (transactions, ommers) = read_body(db, number, &hash)
        .await?
        .ok_or_else(|| TracerError::BlockNotFound(format!("body for block {number}")))?;
    Ok(Block {
        header,
        hash,
        transactions,
        ommers,
    })
}

/// The block containing `tx_hash` together with the transaction's index.
pub async fn read_transaction_with_block(
    db: &dyn DatabaseReader,
    tx_hash: &[u8; 32],
) -> Result<(Block, usize), TracerError> {
    let number = read_transaction_block_number(db, tx_hash)
        .await?
        .ok_or_else(|| {
            TracerError::TransactionNotFound(format!("0x{}", hex::encode(tx_hash)))
        })?;
    let block = read_block_by_number(db, number).await?;
    let index = block
        .transactions
        .iter()
        .position(|transaction| transaction.hash == *tx_hash)
        .ok_or_else(|| {
            TracerError::TransactionNotFound(format!("0x{}", hex::encode(tx_hash)))
        })?;
    Ok((block, index))
}

#[cfg(test)]
pub(crate) mod test_fixtures;

#[cfg(test)]
mod tests {
    use super::test_fixtures::ChainFixture;
    use super::*;
    use crate::kv::MemoryDatabaseReader;
    use traced_evm::Revision;

    #[tokio::test]
    async fn chain_config_resolves_through_genesis_hash() {
        let mut db = MemoryDatabaseReader::new();
        let fixture = ChainFixture::new();
        fixture.install(&mut db);

        let config = read_chain_config(&db).await.unwrap();
        assert_eq!(config.chain_id, 5);
        assert_eq!(config.revision(fixture.head_number()), Revision::Istanbul);
    }

    #[tokio::test]
    async fn blocks_resolve_by_number_hash_and_latest() {
        let mut db = MemoryDatabaseReader::new();
        let fixture = ChainFixture::new();
        fixture.install(&mut db);

        let by_number = read_block(&db, BlockId::Number(fixture.head_number()))
            .await
            .unwrap();
        assert_eq!(by_number.header.number, fixture.head_number());
        assert_eq!(by_number.transactions.len(), 1);

        let by_hash = read_block(&db, BlockId::Hash(by_number.hash)).await.unwrap();
        assert_eq!(by_hash.header.number, by_number.header.number);

        let latest = read_block(&db, BlockId::Latest).await.unwrap();
        assert_eq!(latest.header.number, fixture.head_number());

        assert!(matches!(
            read_block(&db, BlockId::Number(999)).await,
            Err(TracerError::BlockNotFound(_))
        ));
    }

    #[tokio::test]
    async fn transactions_resolve_by_hash() {
        let mut db = MemoryDatabaseReader::new();
        let fixture = ChainFixture::new();
        fixture.install(&mut db);

        let tx_hash = fixture.tx_hash();
        let (block, index) = read_transaction_with_block(&db, &tx_hash).await.unwrap();
        assert_eq!(index, 0);
        assert_eq!(block.transactions[index].hash, tx_hash);

        assert!(matches!(
            read_transaction_with_block(&db, &[0xEE; 32]).await,
            Err(TracerError::TransactionNotFound(_))
        ));
    }
}

//! The `debug_*` and `trace_*` method implementations. Every call opens one
//! KV read transaction; all reads of the request observe that snapshot.

use std::sync::Arc;

use serde_json::Value;

use traced_evm::tracing::debug::DebugConfig;
use traced_lib::executor::{DebugExecutor, TraceCallExecutor};
use traced_lib::kv::DatabaseReader;
use traced_lib::rawdb;
use traced_lib::types::{BlockId, Call, TraceConfig};
use traced_lib::TracerError;

use crate::api_server::state::State;

pub async fn dispatch(state: &State, method: &str, params: &[Value]) -> Result<Value, TracerError> {
    let mut kv = state.kv.clone();
    let transaction = kv.begin().await?;
    // Dropping the transaction at the end of the request closes the stream
    // and releases the server-side snapshot.
    let db: Arc<dyn DatabaseReader> = Arc::new(transaction);

    match method {
        "debug_traceTransaction" => debug_trace_transaction(db, params).await,
        "debug_traceCall" => debug_trace_call(db, params).await,
        "debug_traceBlockByNumber" | "debug_traceBlockByHash" => {
            debug_trace_block(db, params).await
        }
        "trace_call" => trace_call(db, params).await,
        "trace_callMany" => trace_call_many(db, params).await,
        "trace_replayTransaction" => trace_replay_transaction(db, params).await,
        "trace_replayBlockTransactions" => trace_replay_block_transactions(db, params).await,
        "trace_transaction" => trace_transaction(db, params).await,
        "trace_block" => trace_block(db, params).await,
        other => Err(TracerError::InvalidParams(format!("unroutable method {other}"))),
    }
}

fn required<'a>(params: &'a [Value], index: usize, what: &str) -> Result<&'a Value, TracerError> {
    params
        .get(index)
        .ok_or_else(|| TracerError::InvalidParams(format!("missing {what} at position {index}")))
}

fn hash_param(params: &[Value], index: usize) -> Result<[u8; 32], TracerError> {
    let raw = required(params, index, "hash")?
        .as_str()
        .ok_or_else(|| TracerError::InvalidParams("hash must be a string".to_owned()))?;
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(stripped)
        .map_err(|_| TracerError::InvalidParams(format!("invalid hash: {raw}")))?;
    bytes
        .try_into()
        .map_err(|_| TracerError::InvalidParams(format!("invalid hash: {raw}")))
}

fn call_param(params: &[Value], index: usize) -> Result<Call, TracerError> {
    let value = required(params, index, "call object")?;
    serde_json::from_value(value.clone())
        .map_err(|error| TracerError::InvalidParams(format!("invalid call object: {error}")))
}

fn debug_config_param(params: &[Value], index: usize) -> Result<DebugConfig, TracerError> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(DebugConfig::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|error| TracerError::InvalidParams(format!("invalid trace config: {error}"))),
    }
}

fn modes_param(params: &[Value], index: usize) -> Result<TraceConfig, TracerError> {
    let value = required(params, index, "trace modes")?;
    let modes: Vec<String> = serde_json::from_value(value.clone())
        .map_err(|error| TracerError::InvalidParams(format!("invalid trace modes: {error}")))?;
    Ok(TraceConfig::from_modes(&modes))
}

fn block_id_param(params: &[Value], index: usize) -> Result<BlockId, TracerError> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(BlockId::Latest),
        Some(value) => BlockId::from_json(value),
    }
}

/// Pre-check failures ride inside an otherwise-successful reply; the trace
/// body stays empty.
fn with_pre_check(mut value: Value, pre_check_error: Option<String>) -> Value {
    if let Some(error) = pre_check_error {
        if let Value::Object(object) = &mut value {
            object.insert("preCheckError".into(), Value::String(error));
        }
    }
    value
}

async fn debug_trace_transaction(
    db: Arc<dyn DatabaseReader>,
    params: &[Value],
) -> Result<Value, TracerError> {
    let hash = hash_param(params, 0)?;
    let config = debug_config_param(params, 1)?;
    let (block, index) = rawdb::read_transaction_with_block(db.as_ref(), &hash).await?;
    let executor = DebugExecutor::new(db, config);
    let result = executor.trace_transaction(&block, index).await?;
    Ok(with_pre_check(result.trace, result.pre_check_error))
}

async fn debug_trace_call(
    db: Arc<dyn DatabaseReader>,
    params: &[Value],
) -> Result<Value, TracerError> {
    let call = call_param(params, 0)?;
    let block_id = block_id_param(params, 1)?;
    let config = debug_config_param(params, 2)?;
    let block = rawdb::read_block(db.as_ref(), block_id).await?;
    let executor = DebugExecutor::new(db, config);
    let result = executor.trace_call(&block, &call).await?;
    Ok(with_pre_check(result.trace, result.pre_check_error))
}

async fn debug_trace_block(
    db: Arc<dyn DatabaseReader>,
    params: &[Value],
) -> Result<Value, TracerError> {
    let block_id = block_id_param(params, 0)?;
    let config = debug_config_param(params, 1)?;
    let block = rawdb::read_block(db.as_ref(), block_id).await?;
    let executor = DebugExecutor::new(db, config);
    let traces = executor.trace_block(&block).await?;
    Ok(Value::Array(traces))
}

async fn trace_call(db: Arc<dyn DatabaseReader>, params: &[Value]) -> Result<Value, TracerError> {
    let call = call_param(params, 0)?;
    let config = modes_param(params, 1)?;
    let block_id = block_id_param(params, 2)?;
    let block = rawdb::read_block(db.as_ref(), block_id).await?;
    let executor = TraceCallExecutor::new(db, config);
    let result = executor.trace_call(&block, &call).await?;
    Ok(with_pre_check(result.traces.to_json(), result.pre_check_error))
}

async fn trace_call_many(
    db: Arc<dyn DatabaseReader>,
    params: &[Value],
) -> Result<Value, TracerError> {
    let entries = required(params, 0, "call list")?
        .as_array()
        .ok_or_else(|| TracerError::InvalidParams("expected an array of calls".to_owned()))?;
    let mut calls = Vec::with_capacity(entries.len());
    for entry in entries {
        let pair = entry
            .as_array()
            .filter(|pair| pair.len() == 2)
            .ok_or_else(|| {
                TracerError::InvalidParams("each entry must be [call, modes]".to_owned())
            })?;
        let call: Call = serde_json::from_value(pair[0].clone())
            .map_err(|error| TracerError::InvalidParams(format!("invalid call object: {error}")))?;
        let modes: Vec<String> = serde_json::from_value(pair[1].clone())
            .map_err(|error| TracerError::InvalidParams(format!("invalid trace modes: {error}")))?;
        calls.push((call, TraceConfig::from_modes(&modes)));
    }
    let block_id = block_id_param(params, 1)?;
    let block = rawdb::read_block(db.as_ref(), block_id).await?;
    let executor = TraceCallExecutor::new(db, TraceConfig::default());
    let results = executor.trace_call_many(&block, &calls).await?;
    Ok(Value::Array(
        results
            .into_iter()
            .map(|result| with_pre_check(result.traces.to_json(), result.pre_check_error))
            .collect(),
    ))
}

async fn trace_replay_transaction(
    db: Arc<dyn DatabaseReader>,
    params: &[Value],
) -> Result<Value, TracerError> {
    let hash = hash_param(params, 0)?;
    let config = modes_param(params, 1)?;
    let (block, index) = rawdb::read_transaction_with_block(db.as_ref(), &hash).await?;
    let executor = TraceCallExecutor::new(db, config);
    let result = executor.trace_transaction(&block, index).await?;
    Ok(with_pre_check(result.traces.to_json(), result.pre_check_error))
}

async fn trace_replay_block_transactions(
    db: Arc<dyn DatabaseReader>,
    params: &[Value],
) -> Result<Value, TracerError> {
    let block_id = block_id_param(params, 0)?;
    let config = modes_param(params, 1)?;
    let block = rawdb::read_block(db.as_ref(), block_id).await?;
    let executor = TraceCallExecutor::new(db, config);
    let results = executor.trace_replay_block_transactions(&block).await?;
    Ok(Value::Array(
        results
            .into_iter()
            .map(|result| with_pre_check(result.traces.to_json(), result.pre_check_error))
            .collect(),
    ))
}

async fn trace_transaction(
    db: Arc<dyn DatabaseReader>,
    params: &[Value],
) -> Result<Value, TracerError> {
    let hash = hash_param(params, 0)?;
    let (block, index) = rawdb::read_transaction_with_block(db.as_ref(), &hash).await?;
    let executor = TraceCallExecutor::new(
        db,
        TraceConfig {
            trace: true,
            ..TraceConfig::default()
        },
    );
    let nodes = executor.trace_transaction_tree(&block, index).await?;
    Ok(serde_json::to_value(nodes)?)
}

async fn trace_block(db: Arc<dyn DatabaseReader>, params: &[Value]) -> Result<Value, TracerError> {
    let block_id = block_id_param(params, 0)?;
    let block = rawdb::read_block(db.as_ref(), block_id).await?;
    let executor = TraceCallExecutor::new(
        db,
        TraceConfig {
            trace: true,
            ..TraceConfig::default()
        },
    );
    let groups = executor.trace_block(&block).await?;
    Ok(serde_json::to_value(groups)?)
}

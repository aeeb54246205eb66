//! Replay executors. Each request pins the historical state one block before
//! the target, replays the preceding transactions with the null tracer and
//! runs the target under the configured tracer set on a worker thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ethnum::U256;
use log::info;
use serde_json::Value;
use tokio::runtime::Handle;
use traced_evm::machine::{BlockEnv, Machine, TxEnv, TxOutcome};
use traced_evm::state::IntraBlockState;
use traced_evm::tracing::call_tree::Trace;
use traced_evm::tracing::debug::DebugConfig;
use traced_evm::tracing::{
    DebugTracer, NullTracer, StateDiffTracer, Tracer, TracerSet, TraceTracer, VmTraceTracer,
};
use traced_evm::{ChainConfig, Revision};

use crate::errors::TracerError;
use crate::kv::DatabaseReader;
use crate::rawdb;
use crate::state::{HistoricalStateReader, SyncStateReader};
use crate::types::{Block, Call, TraceConfig, Transaction};

/// Output of one `trace_*` execution, shaped like the RPC reply.
#[derive(Debug, Default)]
pub struct TraceCallTraces {
    pub output: String,
    pub state_diff: Option<Value>,
    pub trace: Option<Vec<Trace>>,
    pub vm_trace: Option<Value>,
    pub transaction_hash: Option<[u8; 32]>,
}

impl TraceCallTraces {
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("output".into(), Value::String(self.output.clone()));
        object.insert(
            "stateDiff".into(),
            self.state_diff.clone().unwrap_or(Value::Null),
        );
        object.insert(
            "trace".into(),
            match &self.trace {
                Some(nodes) => serde_json::to_value(nodes).expect("trace serialization"),
                None => Value::Null,
            },
        );
        if let Some(hash) = &self.transaction_hash {
            object.insert(
                "transactionHash".into(),
                Value::String(format!("0x{}", hex::encode(hash))),
            );
        }
        object.insert(
            "vmTrace".into(),
            self.vm_trace.clone().unwrap_or(Value::Null),
        );
        Value::Object(object)
    }
}

#[derive(Debug)]
pub struct TraceCallResult {
    pub traces: TraceCallTraces,
    pub pre_check_error: Option<String>,
}

#[derive(Debug)]
pub struct DebugTraceResult {
    pub trace: Value,
    pub pre_check_error: Option<String>,
}

/// Sets its flag when the owning request future is dropped; block-scale
/// replays poll the flag between transactions.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

struct ReplayEnv {
    db: Arc<dyn DatabaseReader>,
    chain_config: ChainConfig,
    revision: Revision,
    block_env: BlockEnv,
    pinned_block: u64,
}

impl ReplayEnv {
    async fn prepare(
        db: Arc<dyn DatabaseReader>,
        block: &Block,
        pinned_block: u64,
    ) -> Result<Self, TracerError> {
        let chain_config = rawdb::read_chain_config(db.as_ref()).await?;
        let revision = chain_config.revision(block.header.number);
        let block_env = BlockEnv {
            number: block.header.number,
            coinbase: block.header.coinbase,
            timestamp: block.header.timestamp,
            gas_limit: block.header.gas_limit,
            difficulty: block.header.difficulty,
            base_fee: block.header.base_fee,
            chain_id: chain_config.chain_id,
        };
        Ok(Self {
            db,
            chain_config,
            revision,
            block_env,
            pinned_block,
        })
    }

    /// Fresh overlay over the pinned historical state. Must be called on a
    /// worker thread; reads park on `handle`.
    fn intra_block_state(&self, handle: &Handle) -> IntraBlockState {
        let reader = Arc::new(HistoricalStateReader::new(self.db.clone(), self.pinned_block));
        IntraBlockState::new(Arc::new(SyncStateReader::new(reader, handle.clone())))
    }

    /// Replay `transactions` against `state` without observation.
    fn replay(
        &self,
        state: &mut IntraBlockState,
        transactions: &mut [Transaction],
    ) -> Result<(), TracerError> {
        for (index, transaction) in transactions.iter_mut().enumerate() {
            let sender = transaction.sender()?;
            let mut null = NullTracer;
            let outcome = Machine::execute_transaction(
                &self.block_env,
                self.revision,
                state,
                &mut null,
                &transaction.tx_env(sender),
                true,
                true,
            )?;
            if let Some(error) = outcome.pre_check_error {
                return Err(TracerError::ReplayFailed(index, error));
            }
            state.finalize_transaction();
        }
        Ok(())
    }
}

/// Tracer artifacts of one traced transaction.
#[derive(Default)]
struct Artifacts {
    debug: Option<Value>,
    vm: Option<Value>,
    call_tree: Option<Vec<Trace>>,
    state_diff: Option<Value>,
}

fn collect_artifacts(tracers: TracerSet, outcome: &TxOutcome) -> Artifacts {
    let mut artifacts = Artifacts::default();
    for tracer in tracers.into_inner() {
        match tracer {
            Tracer::Debug(tracer) => {
                artifacts.debug = Some(tracer.into_traces(
                    !outcome.status.is_success(),
                    outcome.gas_used,
                    &outcome.output,
                ));
            }
            Tracer::Vm(tracer) => artifacts.vm = Some(tracer.into_traces()),
            Tracer::CallTree(tracer) => artifacts.call_tree = Some(tracer.into_traces()),
            Tracer::StateDiff(tracer) => artifacts.state_diff = Some(tracer.into_traces()),
            Tracer::Null(_) => {}
        }
    }
    artifacts
}

fn trace_tracer_set(
    config: TraceConfig,
    transaction_index: Option<usize>,
    initial: &IntraBlockState,
) -> TracerSet {
    let mut tracers = TracerSet::new();
    if config.vm_trace {
        tracers.push(Tracer::Vm(VmTraceTracer::new(transaction_index)));
    }
    if config.trace {
        tracers.push(Tracer::CallTree(TraceTracer::new()));
    }
    if config.state_diff {
        tracers.push(Tracer::StateDiff(StateDiffTracer::new(Box::new(
            initial.clone(),
        ))));
    }
    tracers
}

fn traces_from(artifacts: Artifacts, outcome: &TxOutcome) -> TraceCallTraces {
    TraceCallTraces {
        output: format!("0x{}", hex::encode(&outcome.output)),
        state_diff: artifacts.state_diff,
        trace: artifacts.call_tree,
        vm_trace: artifacts.vm,
        transaction_hash: None,
    }
}

fn decorate_block_trace(trace: &mut Trace, block: &Block, index: usize, hash: [u8; 32]) {
    trace.block_hash = Some(format!("0x{}", hex::encode(block.hash)));
    trace.block_number = Some(block.header.number);
    trace.transaction_hash = Some(format!("0x{}", hex::encode(hash)));
    trace.transaction_position = Some(index);
}

/// Coinbase credit of one block under the active reward era.
#[must_use]
pub fn block_reward(chain_config: &ChainConfig, block: &Block) -> U256 {
    let revision = chain_config.revision(block.header.number);
    let base: U256 = if revision >= Revision::Paris {
        U256::ZERO
    } else if revision >= Revision::Constantinople {
        U256::from(2_000_000_000_000_000_000u64)
    } else if revision >= Revision::Byzantium {
        U256::from(3_000_000_000_000_000_000u64)
    } else {
        U256::from(5_000_000_000_000_000_000u64)
    };
    base + base * U256::from(block.ommers as u64) / U256::from(32u8)
}

pub struct TraceCallExecutor {
    db: Arc<dyn DatabaseReader>,
    config: TraceConfig,
}

impl TraceCallExecutor {
    #[must_use]
    pub fn new(db: Arc<dyn DatabaseReader>, config: TraceConfig) -> Self {
        Self { db, config }
    }

    /// Trace `call` as if appended to `block`, against the block's
    /// post-state.
    pub async fn trace_call(&self, block: &Block, call: &Call) -> Result<TraceCallResult, TracerError> {
        info!(
            "trace_call {{ block: {}, to: {:?} }}",
            block.header.number, call.to
        );
        let replay = ReplayEnv::prepare(self.db.clone(), block, block.header.number).await?;
        let config = self.config;
        let tx_env = call.tx_env();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            execute_traced(&replay, &mut state, &tx_env, config, None)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }

    /// Trace a sequence of calls against the block's post-state, each call
    /// observing the effects of the previous ones.
    pub async fn trace_call_many(
        &self,
        block: &Block,
        calls: &[(Call, TraceConfig)],
    ) -> Result<Vec<TraceCallResult>, TracerError> {
        info!(
            "trace_call_many {{ block: {}, calls: {} }}",
            block.header.number,
            calls.len()
        );
        let replay = ReplayEnv::prepare(self.db.clone(), block, block.header.number).await?;
        let calls = calls.to_vec();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            let mut results = Vec::with_capacity(calls.len());
            for (call, config) in calls {
                let result =
                    execute_traced(&replay, &mut state, &call.tx_env(), config, None)?;
                state.finalize_transaction();
                results.push(result);
            }
            Ok(results)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }

    /// Replay the block up to `index`, then trace that transaction.
    pub async fn trace_transaction(
        &self,
        block: &Block,
        index: usize,
    ) -> Result<TraceCallResult, TracerError> {
        info!(
            "trace_transaction {{ block: {}, index: {index} }}",
            block.header.number
        );
        let pinned = block.header.number.saturating_sub(1);
        let replay = ReplayEnv::prepare(self.db.clone(), block, pinned).await?;
        let config = self.config;
        let mut preceding: Vec<Transaction> = block.transactions[..index].to_vec();
        let mut target = block.transactions[index].clone();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            replay.replay(&mut state, &mut preceding)?;
            let sender = target.sender()?;
            execute_traced(&replay, &mut state, &target.tx_env(sender), config, None)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }

    /// Call tree of one mined transaction, decorated with its block context.
    pub async fn trace_transaction_tree(
        &self,
        block: &Block,
        index: usize,
    ) -> Result<Vec<Trace>, TracerError> {
        let result = self.trace_transaction(block, index).await?;
        if let Some(error) = result.pre_check_error {
            return Err(TracerError::ReplayFailed(index, error));
        }
        let hash = block.transactions[index].hash;
        let mut nodes = result.traces.trace.unwrap_or_default();
        for node in &mut nodes {
            decorate_block_trace(node, block, index, hash);
        }
        Ok(nodes)
    }

    /// Trace every transaction of the block against its evolving state.
    pub async fn trace_replay_block_transactions(
        &self,
        block: &Block,
    ) -> Result<Vec<TraceCallResult>, TracerError> {
        info!(
            "trace_replay_block_transactions {{ block: {}, transactions: {} }}",
            block.header.number,
            block.transactions.len()
        );
        let pinned = block.header.number.saturating_sub(1);
        let replay = ReplayEnv::prepare(self.db.clone(), block, pinned).await?;
        let config = self.config;
        let mut transactions = block.transactions.clone();
        let handle = Handle::current();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            let mut results = Vec::with_capacity(transactions.len());
            for (index, transaction) in transactions.iter_mut().enumerate() {
                if cancelled.load(Ordering::Relaxed) {
                    return Err(TracerError::Cancelled);
                }
                let sender = transaction.sender()?;
                let mut result = execute_traced(
                    &replay,
                    &mut state,
                    &transaction.tx_env(sender),
                    config,
                    Some(index),
                )?;
                if let Some(error) = result.pre_check_error.take() {
                    return Err(TracerError::ReplayFailed(index, error));
                }
                result.traces.transaction_hash = Some(transaction.hash);
                state.finalize_transaction();
                results.push(result);
            }
            Ok(results)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }

    /// Call trees of the whole block: one Trace array per transaction, in
    /// block order, closed by a single-element array holding the synthetic
    /// coinbase reward trace. The result always has one more entry than the
    /// block has transactions.
    pub async fn trace_block(&self, block: &Block) -> Result<Vec<Vec<Trace>>, TracerError> {
        info!(
            "trace_block {{ block: {}, transactions: {} }}",
            block.header.number,
            block.transactions.len()
        );
        let pinned = block.header.number.saturating_sub(1);
        let replay = ReplayEnv::prepare(self.db.clone(), block, pinned).await?;
        let mut transactions = block.transactions.clone();
        let block_copy = block.clone();
        let handle = Handle::current();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            let mut groups = Vec::with_capacity(transactions.len() + 1);
            let config = TraceConfig {
                trace: true,
                ..TraceConfig::default()
            };
            for (index, transaction) in transactions.iter_mut().enumerate() {
                if cancelled.load(Ordering::Relaxed) {
                    return Err(TracerError::Cancelled);
                }
                let sender = transaction.sender()?;
                let result =
                    execute_traced(&replay, &mut state, &transaction.tx_env(sender), config, None)?;
                if let Some(error) = result.pre_check_error {
                    return Err(TracerError::ReplayFailed(index, error));
                }
                let mut nodes = result.traces.trace.unwrap_or_default();
                for node in &mut nodes {
                    decorate_block_trace(node, &block_copy, index, transaction.hash);
                }
                groups.push(nodes);
                state.finalize_transaction();
            }

            let mut reward = Trace::block_reward(
                block_copy.header.coinbase,
                block_reward(&replay.chain_config, &block_copy),
            );
            reward.block_hash = Some(format!("0x{}", hex::encode(block_copy.hash)));
            reward.block_number = Some(block_copy.header.number);
            groups.push(vec![reward]);
            Ok(groups)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }
}

/// Run one transaction under the trace-mode tracer set.
fn execute_traced(
    replay: &ReplayEnv,
    state: &mut IntraBlockState,
    tx_env: &TxEnv,
    config: TraceConfig,
    transaction_index: Option<usize>,
) -> Result<TraceCallResult, TracerError> {
    let mut tracers = trace_tracer_set(config, transaction_index, state);
    let outcome = Machine::execute_transaction(
        &replay.block_env,
        replay.revision,
        state,
        &mut tracers,
        tx_env,
        true,
        true,
    )?;

    let artifacts = collect_artifacts(tracers, &outcome);
    if let Some(ref error) = outcome.pre_check_error {
        let error = error.clone();
        let mut traces = traces_from(artifacts, &outcome);
        traces.output = "0x".to_owned();
        return Ok(TraceCallResult {
            traces,
            pre_check_error: Some(error),
        });
    }
    Ok(TraceCallResult {
        traces: traces_from(artifacts, &outcome),
        pre_check_error: None,
    })
}

pub struct DebugExecutor {
    db: Arc<dyn DatabaseReader>,
    config: DebugConfig,
}

impl DebugExecutor {
    #[must_use]
    pub fn new(db: Arc<dyn DatabaseReader>, config: DebugConfig) -> Self {
        Self { db, config }
    }

    pub async fn trace_call(&self, block: &Block, call: &Call) -> Result<DebugTraceResult, TracerError> {
        info!(
            "debug_trace_call {{ block: {}, to: {:?} }}",
            block.header.number, call.to
        );
        let replay = ReplayEnv::prepare(self.db.clone(), block, block.header.number).await?;
        let config = self.config;
        let tx_env = call.tx_env();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            execute_debug(&replay, &mut state, &tx_env, config)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }

    pub async fn trace_transaction(
        &self,
        block: &Block,
        index: usize,
    ) -> Result<DebugTraceResult, TracerError> {
        info!(
            "debug_trace_transaction {{ block: {}, index: {index} }}",
            block.header.number
        );
        let pinned = block.header.number.saturating_sub(1);
        let replay = ReplayEnv::prepare(self.db.clone(), block, pinned).await?;
        let config = self.config;
        let mut preceding: Vec<Transaction> = block.transactions[..index].to_vec();
        let mut target = block.transactions[index].clone();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            replay.replay(&mut state, &mut preceding)?;
            let sender = target.sender()?;
            execute_debug(&replay, &mut state, &target.tx_env(sender), config)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }

    /// One debug trace per transaction, in block order.
    pub async fn trace_block(&self, block: &Block) -> Result<Vec<Value>, TracerError> {
        info!(
            "debug_trace_block {{ block: {}, transactions: {} }}",
            block.header.number,
            block.transactions.len()
        );
        let pinned = block.header.number.saturating_sub(1);
        let replay = ReplayEnv::prepare(self.db.clone(), block, pinned).await?;
        let config = self.config;
        let mut transactions = block.transactions.clone();
        let handle = Handle::current();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());

        tokio::task::spawn_blocking(move || {
            let mut state = replay.intra_block_state(&handle);
            let mut results = Vec::with_capacity(transactions.len());
            for (index, transaction) in transactions.iter_mut().enumerate() {
                if cancelled.load(Ordering::Relaxed) {
                    return Err(TracerError::Cancelled);
                }
                let sender = transaction.sender()?;
                let result = execute_debug(&replay, &mut state, &transaction.tx_env(sender), config)?;
                if let Some(error) = result.pre_check_error {
                    return Err(TracerError::ReplayFailed(index, error));
                }
                state.finalize_transaction();
                results.push(result.trace);
            }
            Ok(results)
        })
        .await
        .map_err(|error| TracerError::WorkerGone(error.to_string()))?
    }
}

fn execute_debug(
    replay: &ReplayEnv,
    state: &mut IntraBlockState,
    tx_env: &TxEnv,
    config: DebugConfig,
) -> Result<DebugTraceResult, TracerError> {
    let mut tracers = TracerSet::new();
    tracers.push(Tracer::Debug(DebugTracer::new(config)));
    let outcome = Machine::execute_transaction(
        &replay.block_env,
        replay.revision,
        state,
        &mut tracers,
        tx_env,
        true,
        true,
    )?;

    let artifacts = collect_artifacts(tracers, &outcome);
    let trace = artifacts.debug.expect("debug tracer was attached");
    Ok(DebugTraceResult {
        trace,
        pre_check_error: outcome
            .pre_check_error
            .map(|error| format!("tracing failed: {error}")),
    })
}

#[cfg(test)]
mod tests;

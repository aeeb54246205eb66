use std::sync::Arc;

use serde_json::json;

use crate::kv::{DatabaseReader, MemoryDatabaseReader};
use crate::rawdb;
use crate::rawdb::test_fixtures::ChainFixture;
use crate::types::{Call, TraceConfig};
use traced_evm::tracing::debug::DebugConfig;

use super::{DebugExecutor, TraceCallExecutor};

fn fixture_db() -> (ChainFixture, Arc<dyn DatabaseReader>) {
    let fixture = ChainFixture::new();
    let mut db = MemoryDatabaseReader::new();
    fixture.install(&mut db);
    (fixture, Arc::new(db))
}

fn call_to_contract(fixture: &ChainFixture, gas: u64) -> Call {
    Call {
        from: Some(fixture.sender),
        to: Some(fixture.contract),
        gas: Some(gas),
        ..Call::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn debug_trace_transaction_produces_struct_logs() {
    let (fixture, db) = fixture_db();
    let block = rawdb::read_block_by_number(db.as_ref(), fixture.head_number())
        .await
        .unwrap();

    let executor = DebugExecutor::new(db, DebugConfig::default());
    let result = executor.trace_transaction(&block, 0).await.unwrap();
    assert!(result.pre_check_error.is_none());

    let trace = result.trace;
    assert_eq!(trace["failed"], false);
    assert_eq!(trace["gas"], 41_006);
    assert_eq!(trace["returnValue"], "");

    let logs = trace["structLogs"].as_array().unwrap();
    assert_eq!(logs.len(), 4);
    let expected = [
        (0u64, "PUSH1", 69_000i64, 3i64),
        (2, "PUSH1", 68_997, 3),
        (4, "SSTORE", 68_994, 20_000),
        (5, "STOP", 48_994, 0),
    ];
    for (log, (pc, op, gas, cost)) in logs.iter().zip(expected) {
        assert_eq!(log["pc"], pc);
        assert_eq!(log["op"], op);
        assert_eq!(log["gas"], gas);
        assert_eq!(log["gasCost"], cost);
        assert_eq!(log["depth"], 1);
    }
    assert_eq!(
        logs[2]["storage"]
            ["0000000000000000000000000000000000000000000000000000000000000000"],
        "000000000000000000000000000000000000000000000000000000000000002a"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn debug_config_suppresses_sections() {
    let (fixture, db) = fixture_db();
    let block = rawdb::read_block_by_number(db.as_ref(), fixture.head_number())
        .await
        .unwrap();

    let executor = DebugExecutor::new(
        db,
        DebugConfig {
            disable_storage: true,
            disable_memory: true,
            disable_stack: true,
        },
    );
    let result = executor.trace_transaction(&block, 0).await.unwrap();
    for log in result.trace["structLogs"].as_array().unwrap() {
        let keys: Vec<_> = log.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["pc", "op", "gas", "gasCost", "depth"]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn trace_call_produces_all_requested_artifacts() {
    let (fixture, db) = fixture_db();
    let block = rawdb::read_block_by_number(db.as_ref(), fixture.head_number())
        .await
        .unwrap();

    let executor = TraceCallExecutor::new(db, TraceConfig::all());
    let result = executor
        .trace_call(&block, &call_to_contract(&fixture, 100_000))
        .await
        .unwrap();
    assert!(result.pre_check_error.is_none());

    let json = result.traces.to_json();
    assert_eq!(json["output"], "0x");

    let vm = &json["vmTrace"];
    assert_eq!(vm["code"], "0x602a60005500");
    assert_eq!(vm["ops"].as_array().unwrap().len(), 4);
    assert_eq!(vm["ops"][2]["op"], "SSTORE");
    assert_eq!(vm["ops"][2]["ex"]["store"], json!({"key": "0x0", "val": "0x2a"}));

    let trace = json["trace"].as_array().unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0]["type"], "call");
    assert_eq!(trace[0]["action"]["callType"], "call");
    assert_eq!(trace[0]["action"]["to"], fixture.contract.to_string());
    assert_eq!(trace[0]["result"]["gasUsed"], "0x4e26");

    let contract_diff = &json["stateDiff"][fixture.contract.to_string()];
    assert_eq!(
        contract_diff["storage"]
            ["0x0000000000000000000000000000000000000000000000000000000000000000"],
        json!({"*": {
            "from": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "to": "0x000000000000000000000000000000000000000000000000000000000000002a"
        }})
    );
    let sender_diff = &json["stateDiff"][fixture.sender.to_string()];
    assert_eq!(sender_diff["nonce"], json!({"*": {"from": "0x0", "to": "0x1"}}));
}

#[tokio::test(flavor = "multi_thread")]
async fn trace_call_reports_pre_check_errors() {
    let (fixture, db) = fixture_db();
    let block = rawdb::read_block_by_number(db.as_ref(), fixture.head_number())
        .await
        .unwrap();

    let executor = TraceCallExecutor::new(db.clone(), TraceConfig::all());
    let result = executor
        .trace_call(&block, &call_to_contract(&fixture, 1_000))
        .await
        .unwrap();
    assert_eq!(
        result.pre_check_error.as_deref(),
        Some("intrinsic gas too low: have 1000, want 21000")
    );
    let json = result.traces.to_json();
    assert_eq!(json["output"], "0x");
    assert_eq!(json["trace"], json!([]));
    assert_eq!(json["vmTrace"]["ops"], json!([]));
    assert_eq!(json["stateDiff"], json!({}));

    let debug = DebugExecutor::new(db, DebugConfig::default());
    let result = debug
        .trace_call(&block, &call_to_contract(&fixture, 1_000))
        .await
        .unwrap();
    assert_eq!(
        result.pre_check_error.as_deref(),
        Some("tracing failed: intrinsic gas too low: have 1000, want 21000")
    );
    assert_eq!(result.trace["structLogs"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn trace_block_appends_the_reward_trace() {
    let (fixture, db) = fixture_db();
    let block = rawdb::read_block_by_number(db.as_ref(), fixture.head_number())
        .await
        .unwrap();

    let executor = TraceCallExecutor::new(db, TraceConfig::default());
    let groups = executor.trace_block(&block).await.unwrap();
    // One Trace array per transaction plus the reward array.
    assert_eq!(groups.len(), block.transactions.len() + 1);
    assert_eq!(groups[0].len(), 1);

    let call = serde_json::to_value(&groups[0][0]).unwrap();
    assert_eq!(call["type"], "call");
    assert_eq!(call["blockNumber"], fixture.head_number());
    assert_eq!(
        call["transactionHash"],
        format!("0x{}", hex::encode(fixture.tx_hash()))
    );
    assert_eq!(call["transactionPosition"], 0);

    assert_eq!(groups[1].len(), 1);
    let reward = serde_json::to_value(&groups[1][0]).unwrap();
    assert_eq!(reward["type"], "reward");
    assert_eq!(reward["action"]["rewardType"], "block");
    assert_eq!(reward["action"]["author"], fixture.coinbase.to_string());
    assert_eq!(reward["action"]["value"], "0x1bc16d674ec80000");
    assert_eq!(reward["result"], serde_json::Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_block_transactions_is_deterministic() {
    let (fixture, db) = fixture_db();
    let block = rawdb::read_block_by_number(db.as_ref(), fixture.head_number())
        .await
        .unwrap();

    let executor = TraceCallExecutor::new(db, TraceConfig::all());
    let first = executor
        .trace_replay_block_transactions(&block)
        .await
        .unwrap();
    let second = executor
        .trace_replay_block_transactions(&block)
        .await
        .unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(
        first[0].traces.transaction_hash,
        Some(fixture.tx_hash())
    );
    // The vmTrace indices carry the in-block transaction prefix.
    let json = first[0].traces.to_json();
    assert_eq!(json["vmTrace"]["ops"][0]["idx"], "0-0");

    let first_raw = serde_json::to_string(&first[0].traces.to_json()).unwrap();
    let second_raw = serde_json::to_string(&second[0].traces.to_json()).unwrap();
    assert_eq!(first_raw, second_raw);
}

#[tokio::test(flavor = "multi_thread")]
async fn trace_call_many_threads_state_through_the_calls() {
    let (fixture, db) = fixture_db();
    let block = rawdb::read_block_by_number(db.as_ref(), fixture.head_number())
        .await
        .unwrap();

    // Both calls store 0x2a into the same slot. The second call must see
    // the first call's write, so its state diff has nothing to report for
    // the contract.
    let write_call = call_to_contract(&fixture, 100_000);
    let second_write = call_to_contract(&fixture, 100_000);

    let executor = TraceCallExecutor::new(db, TraceConfig::all());
    let results = executor
        .trace_call_many(
            &block,
            &[
                (write_call, TraceConfig::all()),
                (second_write, TraceConfig::all()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    // First call: slot moves 0 -> 0x2a.
    let first = results[0].traces.to_json();
    assert_eq!(
        first["stateDiff"][fixture.contract.to_string()]["storage"]
            ["0x0000000000000000000000000000000000000000000000000000000000000000"]["*"]["to"],
        "0x000000000000000000000000000000000000000000000000000000000000002a"
    );
    // Second call observes the first call's write: the slot stays 0x2a and
    // the contract drops out of the diff entirely.
    let second = results[1].traces.to_json();
    assert!(second["stateDiff"]
        .get(fixture.contract.to_string())
        .is_none());
}

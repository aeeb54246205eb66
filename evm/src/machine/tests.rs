use std::sync::Arc;

use ethnum::U256;

use crate::revision::Revision;
use crate::state::{AccountInfo, InMemoryStateReader, IntraBlockState};
use crate::tracing::{
    DebugTracer, StateDiffTracer, StatusCode, Tracer, TracerSet, TraceTracer, VmTraceTracer,
};
use crate::types::Address;

use super::{BlockEnv, Machine, TxEnv, TxOutcome};

fn sender() -> Address {
    Address([0xE0; 20])
}

fn coinbase() -> Address {
    Address([0xC0; 20])
}

fn env() -> BlockEnv {
    BlockEnv {
        number: 5_405_095,
        coinbase: coinbase(),
        timestamp: 1_600_000_000,
        gas_limit: 10_000_000,
        difficulty: U256::from(1u8),
        base_fee: None,
        chain_id: 5,
    }
}

fn funded_state() -> IntraBlockState {
    let mut reader = InMemoryStateReader::default();
    reader.insert_account(
        sender(),
        AccountInfo {
            nonce: 0,
            balance: U256::from(10u8).pow(24),
            ..AccountInfo::default()
        },
    );
    IntraBlockState::new(Arc::new(reader))
}

fn state_with_contract(code: &[u8]) -> (IntraBlockState, Address) {
    let mut reader = InMemoryStateReader::default();
    reader.insert_account(
        sender(),
        AccountInfo {
            nonce: 0,
            balance: U256::from(10u8).pow(24),
            ..AccountInfo::default()
        },
    );
    let contract = Address([0x11; 20]);
    reader.insert_account(contract, AccountInfo::default());
    reader.insert_code(contract, code.to_vec());
    (IntraBlockState::new(Arc::new(reader)), contract)
}

fn run(
    state: &mut IntraBlockState,
    tracers: &mut TracerSet,
    tx: &TxEnv,
) -> TxOutcome {
    Machine::execute_transaction(&env(), Revision::Istanbul, state, tracers, tx, true, true)
        .expect("in-memory state reads cannot fail")
}

fn full_tracer_set(initial: &IntraBlockState) -> TracerSet {
    let mut tracers = TracerSet::new();
    tracers.push(Tracer::Debug(DebugTracer::new(Default::default())));
    tracers.push(Tracer::Vm(VmTraceTracer::new(None)));
    tracers.push(Tracer::CallTree(TraceTracer::new()));
    tracers.push(Tracer::StateDiff(StateDiffTracer::new(Box::new(
        initial.clone(),
    ))));
    tracers
}

struct Traced {
    outcome: TxOutcome,
    debug: serde_json::Value,
    vm: serde_json::Value,
    call_tree: Vec<crate::tracing::call_tree::Trace>,
    state_diff: serde_json::Value,
}

fn run_fully_traced(state: &mut IntraBlockState, tx: &TxEnv) -> Traced {
    let mut tracers = full_tracer_set(state);
    let outcome = run(state, &mut tracers, tx);

    let mut debug = None;
    let mut vm = None;
    let mut call_tree = None;
    let mut state_diff = None;
    for tracer in tracers.into_inner() {
        match tracer {
            Tracer::Debug(tracer) => {
                debug = Some(tracer.into_traces(
                    !outcome.status.is_success(),
                    outcome.gas_used,
                    &outcome.output,
                ));
            }
            Tracer::Vm(tracer) => vm = Some(tracer.into_traces()),
            Tracer::CallTree(tracer) => call_tree = Some(tracer.into_traces()),
            Tracer::StateDiff(tracer) => state_diff = Some(tracer.into_traces()),
            Tracer::Null(_) => {}
        }
    }
    Traced {
        outcome,
        debug: debug.unwrap(),
        vm: vm.unwrap(),
        call_tree: call_tree.unwrap(),
        state_diff: state_diff.unwrap(),
    }
}

/// PUSH1 0x2a PUSH1 0x00 SSTORE STOP deployed as init code.
#[test]
fn create_with_storage_write() {
    let mut state = funded_state();
    let tx = TxEnv {
        from: sender(),
        to: None,
        gas_limit: 118_936,
        gas_price: U256::from(7u8),
        value: U256::ZERO,
        data: vec![0x60, 0x2A, 0x60, 0x00, 0x55, 0x00],
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    assert_eq!(traced.outcome.status, StatusCode::Success);
    assert!(traced.outcome.pre_check_error.is_none());
    // 53000 create gas + 4 non-zero bytes at 16 + 2 zero bytes at 4.
    assert_eq!(traced.outcome.gas_left, 118_936 - 53_072 - 3 - 3 - 20_000);
    assert_eq!(traced.outcome.gas_used, 73_078);

    let logs = traced.debug["structLogs"].as_array().unwrap();
    assert_eq!(logs.len(), 4);
    let expected = [
        (0u64, "PUSH1", 65_864i64, 3i64),
        (2, "PUSH1", 65_861, 3),
        (4, "SSTORE", 65_858, 20_000),
        (5, "STOP", 45_858, 0),
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

    assert_eq!(traced.vm["code"], "0x602a60005500");
    let ops = traced.vm["ops"].as_array().unwrap();
    assert_eq!(ops.len(), 4);
    assert_eq!(ops[2]["cost"], 20_000);
    assert_eq!(
        ops[2]["ex"]["store"],
        serde_json::json!({"key": "0x0", "val": "0x2a"})
    );

    let created = Address::from_create(&sender(), 0);
    assert_eq!(traced.call_tree.len(), 1);
    let node = serde_json::to_value(&traced.call_tree[0]).unwrap();
    assert_eq!(node["type"], "create");
    assert_eq!(node["action"]["init"], "0x602a60005500");
    assert_eq!(node["result"]["address"], created.to_string());
    assert_eq!(node["result"]["code"], "0x");

    // The deployed account shows up as fully added; its zero balance strips
    // to the bare prefix.
    let entry = &traced.state_diff[created.to_string()];
    assert_eq!(entry["balance"], serde_json::json!({"+": "0x"}));
    assert_eq!(entry["nonce"], serde_json::json!({"+": "0x1"}));
    assert_eq!(
        entry["storage"]
            ["0x0000000000000000000000000000000000000000000000000000000000000000"],
        serde_json::json!({"+": "0x000000000000000000000000000000000000000000000000000000000000002a"})
    );
    // Sender paid fees and bumped its nonce; the miner got paid.
    let sender_entry = &traced.state_diff[sender().to_string()];
    assert_eq!(sender_entry["nonce"], serde_json::json!({"*": {"from": "0x0", "to": "0x1"}}));
    assert!(traced.state_diff[coinbase().to_string()]["balance"]["+"].is_string());

    // Storage of the created contract is live in the overlay.
    assert_eq!(
        state.storage(&created, &U256::ZERO).unwrap(),
        U256::from(0x2Au8)
    );
}

/// Init code returning a one-byte runtime: the deposit is charged and the
/// code lands in the state.
#[test]
fn create_deploys_the_returned_runtime() {
    let mut state = funded_state();
    // PUSH1 0xAA PUSH1 0x00 MSTORE8 PUSH1 0x01 PUSH1 0x00 RETURN
    let init = vec![0x60, 0xAA, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xF3];
    let tx = TxEnv {
        from: sender(),
        to: None,
        gas_limit: 100_000,
        gas_price: U256::ZERO,
        value: U256::ZERO,
        data: init,
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    assert_eq!(traced.outcome.status, StatusCode::Success);
    assert_eq!(traced.outcome.output, vec![0xAA]);

    let created = Address::from_create(&sender(), 0);
    assert_eq!(state.code(&created).unwrap(), vec![0xAA]);

    let node = serde_json::to_value(&traced.call_tree[0]).unwrap();
    assert_eq!(node["type"], "create");
    assert_eq!(node["result"]["code"], "0xaa");
    assert_eq!(node["result"]["address"], created.to_string());

    // Intrinsic create gas plus the init data bytes, five pushes, MSTORE8
    // with one word of memory growth, and the 200-per-byte deposit.
    let intrinsic = 53_000 + 8 * 16 + 2 * 4;
    let body = 5 * 3 + 3 + 200;
    assert_eq!(traced.outcome.gas_used, intrinsic + body);
}

/// COINBASE then an opcode that does not exist in Istanbul.
#[test]
fn undefined_opcode_fails_the_frame() {
    let (mut state, contract) = state_with_contract(&[0x41, 0x4B]);
    let tx = TxEnv {
        from: sender(),
        to: Some(contract),
        gas_limit: 71_000,
        gas_price: U256::from(7u8),
        value: U256::ZERO,
        data: Vec::new(),
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    assert_eq!(traced.outcome.status, StatusCode::UndefinedInstruction);
    assert_eq!(traced.outcome.gas_left, 0);
    assert_eq!(traced.outcome.gas_used, 71_000);

    let logs = traced.debug["structLogs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1]["op"], "opcode 0x4b not defined");
    assert_eq!(logs[1]["error"], serde_json::json!({}));
    assert_eq!(traced.debug["failed"], true);

    assert_eq!(traced.call_tree[0].error.as_deref(), Some("Bad instruction"));
    assert!(traced.call_tree[0].result.is_none());
}

/// Direct call to the highest Istanbul precompile with rounds it cannot pay.
#[test]
fn precompile_without_enough_gas() {
    let mut state = funded_state();
    let mut precompile_address = [0u8; 20];
    precompile_address[19] = 0x09;
    let tx = TxEnv {
        from: sender(),
        to: Some(Address(precompile_address)),
        gas_limit: 50_000,
        gas_price: U256::from(7u8),
        value: U256::ZERO,
        data: vec![0xFF, 0xFF, 0xFF, 0xFF],
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    assert_eq!(traced.outcome.status, StatusCode::OutOfGas);
    assert_eq!(traced.outcome.gas_used, 50_000);
    // No frame ran: no struct logs and no call node.
    assert_eq!(traced.debug["structLogs"], serde_json::json!([]));
    assert_eq!(traced.debug["failed"], true);
    assert!(traced.call_tree.is_empty());
    // Only the sender's nonce and balance and the miner balance move.
    let diff = traced.state_diff.as_object().unwrap();
    assert_eq!(diff.len(), 2);
    assert!(diff.contains_key(&sender().to_string()));
    assert!(diff.contains_key(&coinbase().to_string()));
}

/// A static frame rejects SSTORE.
#[test]
fn static_frame_cannot_write() {
    // Callee: PUSH1 0x01 PUSH1 0x00 SSTORE STOP
    let callee_code = [0x60, 0x01, 0x60, 0x00, 0x55, 0x00];
    let callee = Address([0x11; 20]);
    let caller = Address([0x22; 20]);

    // Caller: STATICCALL(gas=0xffff, to=callee, in=0..0, out=0..0), STOP
    let mut caller_code = vec![0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x73];
    caller_code.extend_from_slice(callee.as_bytes());
    caller_code.extend_from_slice(&[0x61, 0xFF, 0xFF, 0xFA, 0x00]);

    let mut reader = InMemoryStateReader::default();
    reader.insert_account(
        sender(),
        AccountInfo {
            nonce: 0,
            balance: U256::from(10u8).pow(24),
            ..AccountInfo::default()
        },
    );
    reader.insert_account(callee, AccountInfo::default());
    reader.insert_code(callee, callee_code.to_vec());
    reader.insert_account(caller, AccountInfo::default());
    reader.insert_code(caller, caller_code.clone());
    let mut state = IntraBlockState::new(Arc::new(reader));

    let tx = TxEnv {
        from: sender(),
        to: Some(caller),
        gas_limit: 100_000,
        gas_price: U256::ZERO,
        value: U256::ZERO,
        data: Vec::new(),
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    // The outer frame succeeds; the inner static frame fails.
    assert_eq!(traced.outcome.status, StatusCode::Success);
    assert_eq!(traced.call_tree.len(), 2);
    let child = &traced.call_tree[1];
    assert_eq!(child.trace_address, vec![0]);
    let child_json = serde_json::to_value(child).unwrap();
    assert_eq!(child_json["action"]["callType"], "staticcall");
    assert!(child.error.is_some());
    assert_eq!(state.storage(&callee, &U256::ZERO).unwrap(), U256::ZERO);
}

/// Contract calling another contract that writes storage.
#[test]
fn nested_call_accounting() {
    let callee_code = [0x60, 0x01, 0x60, 0x00, 0x55, 0x00];
    let callee = Address([0x11; 20]);
    let caller = Address([0x22; 20]);

    let mut caller_code = vec![
        0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x73,
    ];
    caller_code.extend_from_slice(callee.as_bytes());
    caller_code.extend_from_slice(&[0x61, 0xFF, 0xFF, 0xF1, 0x00]);

    let mut reader = InMemoryStateReader::default();
    reader.insert_account(
        sender(),
        AccountInfo {
            nonce: 0,
            balance: U256::from(10u8).pow(24),
            ..AccountInfo::default()
        },
    );
    reader.insert_account(callee, AccountInfo::default());
    reader.insert_code(callee, callee_code.to_vec());
    reader.insert_account(caller, AccountInfo::default());
    reader.insert_code(caller, caller_code.clone());
    let mut state = IntraBlockState::new(Arc::new(reader));

    let tx = TxEnv {
        from: sender(),
        to: Some(caller),
        gas_limit: 100_000,
        gas_price: U256::ZERO,
        value: U256::ZERO,
        data: Vec::new(),
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    assert_eq!(traced.outcome.status, StatusCode::Success);
    assert_eq!(state.storage(&callee, &U256::ZERO).unwrap(), U256::ONE);

    // 7 pushes + CALL + STOP in the caller, 4 steps in the callee.
    let logs = traced.debug["structLogs"].as_array().unwrap();
    assert_eq!(logs.len(), 13);
    assert_eq!(logs[7]["op"], "CALL");
    assert_eq!(logs[8]["depth"], 2);
    assert_eq!(logs[12]["depth"], 1);

    let ops = traced.vm["ops"].as_array().unwrap();
    assert_eq!(ops.len(), 9);
    let call_op = &ops[7];
    assert_eq!(call_op["op"], "CALL");
    let sub_ops = call_op["sub"]["ops"].as_array().unwrap();
    assert_eq!(sub_ops.len(), 4);
    assert_eq!(sub_ops[0]["idx"], "7-0");

    assert_eq!(traced.call_tree.len(), 2);
    assert_eq!(traced.call_tree[0].subtraces, 1);
    let child = serde_json::to_value(&traced.call_tree[1]).unwrap();
    // 3 + 3 + 20000 and the trailing STOP.
    assert_eq!(child["result"]["gasUsed"], "0x4e26");

    // 21000 intrinsic + 21 for pushes + 700 CALL + 20006 in the callee.
    assert_eq!(traced.outcome.gas_used, 41_727);
    // The CALL entry's cost closes against the callee's opening gas.
    assert_eq!(logs[7]["gasCost"], 78_979 - 65_535);
    // The vmTrace CALL op closes against the caller's next step instead.
    assert_eq!(ops[7]["cost"], 78_979 - 58_273);
    let child_costs: i64 = logs
        .iter()
        .filter(|log| log["depth"] == 2)
        .map(|log| log["gasCost"].as_i64().unwrap())
        .sum();
    assert_eq!(child_costs, 20_006);
}

/// REVERT rolls the write back but returns the remaining gas.
#[test]
fn revert_rolls_back_state() {
    let code = [0x60, 0x01, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xFD];
    let (mut state, contract) = state_with_contract(&code);
    let tx = TxEnv {
        from: sender(),
        to: Some(contract),
        gas_limit: 100_000,
        gas_price: U256::from(1u8),
        value: U256::ZERO,
        data: Vec::new(),
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    assert_eq!(traced.outcome.status, StatusCode::Revert);
    assert!(traced.outcome.gas_left > 0);
    assert_eq!(state.storage(&contract, &U256::ZERO).unwrap(), U256::ZERO);
    // Nonce and fee charges survive the revert.
    assert_eq!(state.nonce(&sender()).unwrap(), 1);
    assert_eq!(traced.call_tree[0].error.as_deref(), Some("Reverted"));
    assert_eq!(traced.debug["failed"], true);
}

/// Pre-check failures short-circuit before any tracer sees a frame.
#[test]
fn intrinsic_gas_too_low() {
    let mut state = funded_state();
    let tx = TxEnv {
        from: sender(),
        to: None,
        gas_limit: 50_000,
        gas_price: U256::from(7u8),
        value: U256::ZERO,
        data: vec![0x60, 0x2A, 0x60, 0x00, 0x55, 0x00],
        nonce: Some(0),
    };
    let mut tracers = TracerSet::new();
    let outcome = run(&mut state, &mut tracers, &tx);
    assert_eq!(
        outcome.pre_check_error.as_deref(),
        Some("intrinsic gas too low: have 50000, want 53072")
    );
    // Nothing moved.
    assert_eq!(state.nonce(&sender()).unwrap(), 0);
}

#[test]
fn nonce_mismatch_is_a_pre_check_error() {
    let mut state = funded_state();
    let tx = TxEnv {
        from: sender(),
        to: Some(Address([0x11; 20])),
        gas_limit: 21_000,
        gas_price: U256::ZERO,
        value: U256::ZERO,
        data: Vec::new(),
        nonce: Some(7),
    };
    let mut tracers = TracerSet::new();
    let outcome = run(&mut state, &mut tracers, &tx);
    assert_eq!(
        outcome.pre_check_error.as_deref(),
        Some("invalid nonce: got 7, expected 0")
    );
}

/// Plain value transfer with no code: one empty frame.
#[test]
fn value_transfer_without_code() {
    let mut state = funded_state();
    let recipient = Address([0x77; 20]);
    let tx = TxEnv {
        from: sender(),
        to: Some(recipient),
        gas_limit: 21_000,
        gas_price: U256::ZERO,
        value: U256::from(1_000u64),
        data: Vec::new(),
        nonce: Some(0),
    };
    let traced = run_fully_traced(&mut state, &tx);

    assert_eq!(traced.outcome.status, StatusCode::Success);
    assert_eq!(traced.outcome.gas_used, 21_000);
    assert_eq!(state.balance(&recipient).unwrap(), U256::from(1_000u64));
    assert_eq!(traced.call_tree.len(), 1);
    let node = serde_json::to_value(&traced.call_tree[0]).unwrap();
    assert_eq!(node["type"], "call");
    assert_eq!(node["action"]["value"], "0x3e8");
    assert_eq!(node["result"]["gasUsed"], "0x0");
    assert_eq!(traced.debug["structLogs"], serde_json::json!([]));
}

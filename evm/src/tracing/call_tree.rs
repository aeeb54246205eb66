//! Parity-compatible flat call tree (`trace` mode).

use ethnum::U256;
use serde::Serialize;

use crate::revision::Revision;
use crate::state::StateView;
use crate::types::quantity;
use crate::types::{Address, HexBytes};

use super::{CallKind, ExecutionResult, EvmTracer, Message, StatusCode};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    pub from: Address,
    #[serde(serialize_with = "quantity::serialize_u64")]
    pub gas: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<HexBytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<HexBytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(serialize_with = "quantity::serialize_u256")]
    pub value: U256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardAction {
    pub author: Address,
    pub reward_type: String,
    #[serde(serialize_with = "quantity::serialize_u256")]
    pub value: U256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TraceAction {
    Call(CallAction),
    Reward(RewardAction),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<HexBytes>,
    #[serde(serialize_with = "quantity::serialize_u64")]
    pub gas_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<HexBytes>,
}

/// One node of the call tree. Block-scope fields stay empty until the
/// executor decorates the node with its transaction context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub action: TraceAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: Option<TraceResult>,
    pub subtraces: usize,
    pub trace_address: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_position: Option<usize>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Trace {
    /// Synthetic coinbase credit node appended after a whole-block trace.
    #[must_use]
    pub fn block_reward(author: Address, value: U256) -> Self {
        Self {
            action: TraceAction::Reward(RewardAction {
                author,
                reward_type: "block".to_owned(),
                value,
            }),
            block_hash: None,
            block_number: None,
            error: None,
            result: None,
            subtraces: 0,
            trace_address: Vec::new(),
            transaction_hash: None,
            transaction_position: None,
            kind: "reward".to_owned(),
        }
    }
}

fn error_text(status: StatusCode) -> String {
    match status {
        StatusCode::Revert => "Reverted".to_owned(),
        StatusCode::OutOfGas | StatusCode::StackOverflow => "Out of gas".to_owned(),
        StatusCode::UndefinedInstruction | StatusCode::InvalidInstruction => {
            "Bad instruction".to_owned()
        }
        StatusCode::StackUnderflow => "Stack underflow".to_owned(),
        StatusCode::BadJumpDestination => "Bad jump destination".to_owned(),
        _ => String::new(),
    }
}

pub struct TraceTracer {
    traces: Vec<Trace>,
    index_stack: Vec<usize>,
    start_gas: Vec<i64>,
    initial_gas: i64,
}

impl TraceTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            traces: Vec::new(),
            index_stack: Vec::new(),
            start_gas: Vec::new(),
            initial_gas: 0,
        }
    }

    #[must_use]
    pub fn into_traces(self) -> Vec<Trace> {
        self.traces
    }
}

impl Default for TraceTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl EvmTracer for TraceTracer {
    fn on_execution_start(&mut self, _revision: Revision, message: &Message, code: &[u8]) {
        let create = matches!(message.kind, CallKind::Create | CallKind::Create2);
        let frame_gas = message.gas.unsigned_abs();

        let action = if create {
            CallAction {
                call_type: None,
                from: message.sender,
                gas: frame_gas,
                init: Some(code.into()),
                input: None,
                to: None,
                value: message.value,
            }
        } else {
            let call_type = match message.kind {
                CallKind::Call if message.is_static => "staticcall",
                CallKind::Call => "call",
                CallKind::DelegateCall => "delegatecall",
                CallKind::CallCode => "callcode",
                CallKind::Create | CallKind::Create2 => unreachable!(),
            };
            CallAction {
                call_type: Some(call_type.to_owned()),
                from: message.sender,
                gas: frame_gas,
                init: None,
                input: Some(message.input.as_slice().into()),
                to: Some(message.recipient),
                value: message.value,
            }
        };

        let result = if create {
            TraceResult {
                address: Some(message.recipient),
                code: Some(HexBytes::default()),
                gas_used: 0,
                output: None,
            }
        } else {
            TraceResult {
                address: None,
                code: None,
                gas_used: 0,
                output: Some(HexBytes::default()),
            }
        };

        let trace_address = if message.depth > 0 {
            let parent_index = *self.index_stack.last().expect("nested frame has a parent");
            let parent = &mut self.traces[parent_index];
            let mut path = parent.trace_address.clone();
            path.push(parent.subtraces);
            parent.subtraces += 1;
            path
        } else {
            self.initial_gas = message.gas;
            Vec::new()
        };

        let index = self.traces.len();
        self.traces.push(Trace {
            action: TraceAction::Call(action),
            block_hash: None,
            block_number: None,
            error: None,
            result: Some(result),
            subtraces: 0,
            trace_address,
            transaction_hash: None,
            transaction_position: None,
            kind: if create { "create" } else { "call" }.to_owned(),
        });
        self.index_stack.push(index);
        self.start_gas.push(message.gas);
    }

    fn on_execution_end(&mut self, result: &ExecutionResult, _ibs: &dyn StateView) {
        let Some(index) = self.index_stack.pop() else {
            return;
        };
        let start_gas = self.start_gas.pop().unwrap_or_default();
        let trace = &mut self.traces[index];

        match result.status {
            StatusCode::Success => {
                let node = trace.result.as_mut().expect("set at frame start");
                node.gas_used = (start_gas - result.gas_left).unsigned_abs();
                if trace.kind == "create" {
                    node.code = Some(result.output.as_slice().into());
                } else {
                    node.output = Some(result.output.as_slice().into());
                }
            }
            status => {
                trace.error = Some(error_text(status));
                trace.result = None;
            }
        }
    }

    fn on_reward_granted(&mut self, result: &ExecutionResult, _ibs: &dyn StateView) {
        // Only the root node reflects the final, refund-adjusted outcome.
        let Some(trace) = self.traces.first_mut() else {
            return;
        };

        match result.status {
            StatusCode::Success => {
                let Some(node) = trace.result.as_mut() else {
                    return;
                };
                node.gas_used = (self.initial_gas - result.gas_left).unsigned_abs();
                if !result.output.is_empty() {
                    if trace.kind == "create" {
                        node.code = Some(result.output.as_slice().into());
                    } else {
                        node.output = Some(result.output.as_slice().into());
                    }
                }
            }
            status => {
                trace.error = Some(error_text(status));
                trace.result = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InMemoryStateReader, IntraBlockState};
    use std::sync::Arc;

    fn view() -> IntraBlockState {
        IntraBlockState::new(Arc::new(InMemoryStateReader::default()))
    }

    fn message(kind: CallKind, depth: i32, gas: i64) -> Message {
        Message {
            kind,
            is_static: false,
            depth,
            gas,
            recipient: Address([0x11; 20]),
            sender: Address([0x22; 20]),
            code_address: Address([0x11; 20]),
            input: vec![0xAB],
            value: U256::ZERO,
        }
    }

    #[test]
    fn create_node_reports_address_and_code() {
        let ibs = view();
        let mut tracer = TraceTracer::new();
        let msg = message(CallKind::Create, 0, 65_864);
        let init = [0x60, 0x2a, 0x60, 0x00, 0x55, 0x00];

        tracer.on_execution_start(Revision::Istanbul, &msg, &init);
        tracer.on_execution_end(
            &ExecutionResult {
                status: StatusCode::Success,
                gas_left: 43_758,
                output: Vec::new(),
            },
            &ibs,
        );
        tracer.on_reward_granted(
            &ExecutionResult {
                status: StatusCode::Success,
                gas_left: 43_758,
                output: Vec::new(),
            },
            &ibs,
        );

        let traces = tracer.into_traces();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert_eq!(trace.kind, "create");
        assert!(trace.error.is_none());
        let json = serde_json::to_value(trace).unwrap();
        assert_eq!(json["action"]["init"], "0x602a60005500");
        assert!(json["action"].get("to").is_none());
        assert_eq!(json["action"]["gas"], "0x10148");
        assert_eq!(json["action"]["value"], "0x0");
        assert_eq!(json["result"]["gasUsed"], "0x565a");
        assert_eq!(
            json["result"]["address"],
            "0x1111111111111111111111111111111111111111"
        );
        assert_eq!(json["subtraces"], 0);
        assert_eq!(json["traceAddress"], serde_json::json!([]));
        assert_eq!(json["type"], "create");
    }

    #[test]
    fn nested_calls_get_their_tree_path() {
        let ibs = view();
        let mut tracer = TraceTracer::new();

        tracer.on_execution_start(Revision::Istanbul, &message(CallKind::Call, 0, 100_000), &[]);
        tracer.on_execution_start(Revision::Istanbul, &message(CallKind::Call, 1, 90_000), &[]);
        tracer.on_execution_end(
            &ExecutionResult {
                status: StatusCode::Success,
                gas_left: 89_000,
                output: Vec::new(),
            },
            &ibs,
        );
        tracer.on_execution_start(
            Revision::Istanbul,
            &message(CallKind::DelegateCall, 1, 80_000),
            &[],
        );
        tracer.on_execution_start(Revision::Istanbul, &message(CallKind::Call, 2, 70_000), &[]);
        for gas_left in [69_000, 79_000, 99_000] {
            tracer.on_execution_end(
                &ExecutionResult {
                    status: StatusCode::Success,
                    gas_left,
                    output: Vec::new(),
                },
                &ibs,
            );
        }

        let traces = tracer.into_traces();
        assert_eq!(traces.len(), 4);
        assert_eq!(traces[0].trace_address, Vec::<usize>::new());
        assert_eq!(traces[0].subtraces, 2);
        assert_eq!(traces[1].trace_address, vec![0]);
        assert_eq!(traces[2].trace_address, vec![1]);
        assert_eq!(traces[2].subtraces, 1);
        assert_eq!(traces[3].trace_address, vec![1, 0]);
        let action = match &traces[2].action {
            TraceAction::Call(action) => action,
            TraceAction::Reward(_) => panic!("expected a call action"),
        };
        assert_eq!(action.call_type.as_deref(), Some("delegatecall"));
    }

    #[test]
    fn failed_frames_carry_an_error_and_no_result() {
        let ibs = view();
        let mut tracer = TraceTracer::new();
        tracer.on_execution_start(Revision::Istanbul, &message(CallKind::Call, 0, 100_000), &[]);
        tracer.on_execution_end(
            &ExecutionResult {
                status: StatusCode::UndefinedInstruction,
                gas_left: 0,
                output: Vec::new(),
            },
            &ibs,
        );
        tracer.on_reward_granted(
            &ExecutionResult {
                status: StatusCode::UndefinedInstruction,
                gas_left: 0,
                output: Vec::new(),
            },
            &ibs,
        );

        let traces = tracer.into_traces();
        assert_eq!(traces[0].error.as_deref(), Some("Bad instruction"));
        assert!(traces[0].result.is_none());
        let json = serde_json::to_value(&traces[0]).unwrap();
        assert_eq!(json["result"], serde_json::Value::Null);
        assert_eq!(json["error"], "Bad instruction");
    }

    #[test]
    fn reward_node_shape() {
        let trace = Trace::block_reward(
            Address([0xAA; 20]),
            U256::from_str_hex("0x1bc16d674ec80000").unwrap(),
        );
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["action"]["author"], "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(json["action"]["rewardType"], "block");
        assert_eq!(json["action"]["value"], "0x1bc16d674ec80000");
        assert_eq!(json["result"], serde_json::Value::Null);
        assert_eq!(json["type"], "reward");
    }
}

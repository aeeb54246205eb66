//! Parity-compatible vmTrace tracer. Call nesting is modeled as an arena of
//! nodes with index links; the serialized tree is rebuilt by a recursive walk.

use serde_json::{json, Value};

use crate::opcode_table::{self, opcode};
use crate::revision::Revision;
use crate::state::StateView;
use crate::types::quantity;

use super::{
    copy_stack, memory_offset_len, ExecutionContext, ExecutionResult, EvmTracer, Message,
    StackView, StatusCode,
};

#[derive(Debug, Clone)]
pub struct TraceMemory {
    pub offset: u64,
    pub len: u64,
    pub data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TraceStorage {
    pub key: String,
    pub val: String,
}

#[derive(Debug, Clone, Default)]
pub struct TraceEx {
    pub memory: Option<TraceMemory>,
    pub push: Vec<String>,
    pub storage: Option<TraceStorage>,
    pub used: i64,
}

#[derive(Debug, Clone)]
pub struct TraceOp {
    pub gas_cost: i64,
    pub trace_ex: TraceEx,
    pub idx: String,
    pub op_code: u8,
    pub op_name: String,
    pub pc: usize,
    pub call_gas: Option<i64>,
    pub sub: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct VmTraceNode {
    pub code: String,
    pub ops: Vec<TraceOp>,
}

pub struct VmTraceTracer {
    arena: Vec<VmTraceNode>,
    node_stack: Vec<usize>,
    start_gas: Vec<i64>,
    index_prefix: Vec<String>,
    names: Option<&'static [Option<&'static str>; 256]>,
    transaction_index: Option<usize>,
}

impl VmTraceTracer {
    #[must_use]
    pub fn new(transaction_index: Option<usize>) -> Self {
        Self {
            arena: vec![VmTraceNode {
                code: "0x".to_owned(),
                ops: Vec::new(),
            }],
            node_stack: Vec::new(),
            start_gas: Vec::new(),
            index_prefix: Vec::new(),
            names: None,
            transaction_index,
        }
    }

    fn node_to_json(&self, index: usize) -> Value {
        let node = &self.arena[index];
        let ops = node
            .ops
            .iter()
            .map(|op| {
                let mem = match &op.trace_ex.memory {
                    Some(memory) => match &memory.data {
                        Some(data) => json!({ "data": data, "off": memory.offset }),
                        None => Value::Null,
                    },
                    None => Value::Null,
                };
                let store = match &op.trace_ex.storage {
                    Some(storage) => json!({ "key": storage.key, "val": storage.val }),
                    None => Value::Null,
                };
                let sub = match op.sub {
                    Some(child) => self.node_to_json(child),
                    None => Value::Null,
                };
                json!({
                    "cost": op.gas_cost,
                    "ex": {
                        "mem": mem,
                        "push": op.trace_ex.push,
                        "store": store,
                        "used": op.trace_ex.used,
                    },
                    "idx": op.idx,
                    "op": op.op_name,
                    "pc": op.pc,
                    "sub": sub,
                })
            })
            .collect::<Vec<_>>();
        json!({ "code": node.code, "ops": ops })
    }

    #[must_use]
    pub fn into_traces(self) -> Value {
        self.node_to_json(0)
    }
}

impl EvmTracer for VmTraceTracer {
    fn on_execution_start(&mut self, revision: Revision, message: &Message, code: &[u8]) {
        if self.names.is_none() {
            self.names = Some(opcode_table::instruction_names(revision));
        }
        self.start_gas.push(message.gas);

        if message.depth == 0 {
            self.arena[0].code = format!("0x{}", hex::encode(code));
            self.node_stack.push(0);
            let prefix = match self.transaction_index {
                Some(index) => format!("{index}-"),
                None => String::new(),
            };
            self.index_prefix.push(prefix);
            return;
        }

        let current = *self.node_stack.last().expect("frame stack is non-empty");
        if self.arena[current].ops.is_empty() {
            // The caller emitted no step for this frame; keep recording into
            // its node so the pop in on_execution_end stays balanced.
            self.node_stack.push(current);
            let prefix = self.index_prefix.last().cloned().unwrap_or_default();
            self.index_prefix.push(prefix);
            return;
        }

        let prefix = format!(
            "{}{}-",
            self.index_prefix.last().cloned().unwrap_or_default(),
            self.arena[current].ops.len() - 1
        );
        self.index_prefix.push(prefix);

        let child = self.arena.len();
        self.arena.push(VmTraceNode {
            code: format!("0x{}", hex::encode(code)),
            ops: Vec::new(),
        });
        self.arena[current]
            .ops
            .last_mut()
            .expect("checked above")
            .sub = Some(child);
        self.node_stack.push(child);
    }

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        _ibs: &dyn StateView,
    ) {
        let Some(&current) = self.node_stack.last() else {
            return;
        };

        if let Some(previous) = self.arena[current].ops.last_mut() {
            if let Some(call_gas) = previous.call_gas.take() {
                previous.gas_cost -= call_gas;
            } else {
                previous.gas_cost -= context.gas_left;
            }
            previous.trace_ex.used = context.gas_left;

            if let Some(memory) = &mut previous.trace_ex.memory {
                if memory.len == 0 {
                    previous.trace_ex.memory = None;
                } else {
                    #[allow(clippy::cast_possible_truncation)]
                    let start = (memory.offset as usize).min(context.memory.len());
                    #[allow(clippy::cast_possible_truncation)]
                    let end = (start + memory.len as usize).min(context.memory.len());
                    memory.data = Some(format!("0x{}", hex::encode(&context.memory[start..end])));
                }
            }
            previous.trace_ex.push = copy_stack(previous.op_code, stack);
        }

        let op = context.code.get(pc).copied().unwrap_or(opcode::STOP);
        let names = self
            .names
            .unwrap_or_else(|| opcode_table::instruction_names(Revision::LATEST));
        let mut op_name = opcode_table::op_name(names, op);
        if op_name == "KECCAK256" {
            // RPC daemons kept the historical name.
            op_name = "SHA3".to_owned();
        }

        let idx = format!(
            "{}{}",
            self.index_prefix.last().cloned().unwrap_or_default(),
            self.arena[current].ops.len()
        );

        let trace_ex = TraceEx {
            memory: memory_offset_len(op, stack).map(|(offset, len)| TraceMemory {
                offset,
                len,
                data: None,
            }),
            push: Vec::new(),
            storage: (op == opcode::SSTORE).then(|| TraceStorage {
                key: quantity::from_u256(stack.peek(0)),
                val: quantity::from_u256(stack.peek(1)),
            }),
            used: 0,
        };

        self.arena[current].ops.push(TraceOp {
            gas_cost: context.gas_left,
            trace_ex,
            idx,
            op_code: op,
            op_name,
            pc,
            call_gas: None,
            sub: None,
        });
    }

    fn on_precompiled_run(&mut self, _result: &ExecutionResult, gas: i64, _ibs: &dyn StateView) {
        let Some(&current) = self.node_stack.last() else {
            return;
        };
        let child = self.arena.len();
        if let Some(op) = self.arena[current].ops.last_mut() {
            op.call_gas = Some(gas);
            op.sub = Some(child);
            self.arena.push(VmTraceNode {
                code: "0x".to_owned(),
                ops: Vec::new(),
            });
        }
    }

    fn on_execution_end(&mut self, result: &ExecutionResult, _ibs: &dyn StateView) {
        let Some(current) = self.node_stack.pop() else {
            return;
        };
        let start_gas = self.start_gas.pop().unwrap_or_default();
        self.index_prefix.pop();

        if self.arena[current].ops.is_empty() {
            return;
        }

        // A frame whose entire body is a single STOP serializes with no ops.
        // Kept for byte compatibility with the OpenEthereum output; the
        // reason behind the original rule is unknown.
        if self.arena[current].ops.len() == 1
            && self.arena[current].ops[0].op_code == opcode::STOP
        {
            self.arena[current].ops.clear();
            return;
        }

        let op = self.arena[current].ops.last_mut().expect("checked above");
        match result.status {
            StatusCode::Revert | StatusCode::OutOfGas => {
                op.trace_ex.used = op.gas_cost;
                op.gas_cost = 0;
            }
            StatusCode::UndefinedInstruction => {
                op.trace_ex.used = op.gas_cost;
                op.gas_cost = start_gas - op.gas_cost;
                op.trace_ex.used -= op.gas_cost;
            }
            _ => {
                op.gas_cost -= result.gas_left;
                op.trace_ex.used = result.gas_left;
            }
        }
    }
}

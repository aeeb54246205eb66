//! Geth-compatible structLog tracer.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::opcode_table::{self, opcode};
use crate::revision::Revision;
use crate::state::StateView;
use crate::types::quantity;
use crate::types::Address;

use super::{
    copy_stack, ExecutionContext, ExecutionResult, EvmTracer, Message, StackView, StatusCode,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugConfig {
    pub disable_storage: bool,
    pub disable_memory: bool,
    pub disable_stack: bool,
}

type Storage = BTreeMap<String, String>;

/// One executed instruction. `gas` is the gas remaining when the instruction
/// starts; `gas_cost` is only known once the next step (or the frame end)
/// reports the new remaining gas.
#[derive(Debug, Clone)]
pub struct DebugLog {
    pub pc: u64,
    pub op: String,
    pub gas: i64,
    pub gas_cost: i64,
    pub depth: i32,
    pub error: bool,
    pub memory: Option<Vec<String>>,
    pub stack: Option<Vec<String>>,
    pub storage: Option<Storage>,
}

impl DebugLog {
    fn to_json(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("pc".into(), json!(self.pc));
        entry.insert("op".into(), json!(self.op));
        entry.insert("gas".into(), json!(self.gas));
        entry.insert("gasCost".into(), json!(self.gas_cost));
        entry.insert("depth".into(), json!(self.depth));
        if self.error {
            entry.insert("error".into(), json!({}));
        }
        if let Some(stack) = &self.stack {
            entry.insert("stack".into(), json!(stack));
        }
        if let Some(memory) = &self.memory {
            entry.insert("memory".into(), json!(memory));
        }
        if let Some(storage) = &self.storage {
            entry.insert("storage".into(), json!(storage));
        }
        Value::Object(entry)
    }
}

pub struct DebugTracer {
    config: DebugConfig,
    logs: Vec<DebugLog>,
    storage: HashMap<Address, Storage>,
    names: Option<&'static [Option<&'static str>; 256]>,
    gas_on_precompile: Option<i64>,
    /// Whether the latest log still belongs to the running frame and awaits
    /// its gas cost.
    last_open: bool,
}

impl DebugTracer {
    #[must_use]
    pub fn new(config: DebugConfig) -> Self {
        Self {
            config,
            logs: Vec::new(),
            storage: HashMap::new(),
            names: None,
            gas_on_precompile: None,
            last_open: false,
        }
    }

    pub fn logs(&self) -> &[DebugLog] {
        &self.logs
    }

    /// Assemble the reply. The execution summary comes from the caller, who
    /// has the full transaction outcome including intrinsic gas and refunds.
    #[must_use]
    pub fn into_traces(self, failed: bool, gas_used: u64, return_value: &[u8]) -> Value {
        json!({
            "failed": failed,
            "gas": gas_used,
            "returnValue": hex::encode(return_value),
            "structLogs": self.logs.iter().map(DebugLog::to_json).collect::<Vec<_>>(),
        })
    }
}

impl EvmTracer for DebugTracer {
    fn on_execution_start(&mut self, revision: Revision, message: &Message, _code: &[u8]) {
        if self.names.is_none() {
            self.names = Some(opcode_table::instruction_names(revision));
        }
        // Each frame observes only its own writes.
        self.storage.remove(&message.recipient);
    }

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        _ibs: &dyn StateView,
    ) {
        if self.last_open {
            let previous = self.logs.last_mut().expect("open log exists");
            if let Some(gas) = self.gas_on_precompile.take() {
                previous.gas_cost = previous.gas - gas;
            } else {
                previous.gas_cost = previous.gas - context.gas_left;
            }
        }

        let op = context.code.get(pc).copied().unwrap_or(opcode::STOP);
        let names = self
            .names
            .unwrap_or_else(|| opcode_table::instruction_names(Revision::LATEST));

        if op == opcode::SSTORE && !self.config.disable_storage {
            self.storage
                .entry(context.message.recipient)
                .or_default()
                .insert(
                    quantity::bare_padded_u256(stack.peek(0)),
                    quantity::bare_padded_u256(stack.peek(1)),
                );
        }

        let stack_copy = if self.config.disable_stack {
            None
        } else {
            Some(copy_stack(op, stack))
        };
        let memory = if self.config.disable_memory {
            None
        } else {
            Some(
                context
                    .memory
                    .chunks(32)
                    .map(hex::encode)
                    .collect::<Vec<_>>(),
            )
        };
        let storage = if self.config.disable_storage {
            None
        } else {
            self.storage
                .get(&context.message.recipient)
                .filter(|slots| !slots.is_empty())
                .cloned()
        };

        #[allow(clippy::cast_possible_truncation)]
        self.logs.push(DebugLog {
            pc: pc as u64,
            op: opcode_table::op_name(names, op),
            gas: context.gas_left,
            gas_cost: 0,
            depth: context.message.depth + 1,
            error: false,
            memory,
            stack: stack_copy,
            storage,
        });
        self.last_open = true;
    }

    fn on_execution_end(&mut self, result: &ExecutionResult, _ibs: &dyn StateView) {
        // A precompile gas marker never outlives the frame that produced it.
        self.gas_on_precompile = None;
        if !self.last_open {
            return;
        }
        self.last_open = false;
        let last = self.logs.last_mut().expect("open log exists");
        match result.status {
            StatusCode::Success => {
                last.gas_cost = last.gas - result.gas_left;
            }
            _ => {
                last.gas_cost = 0;
                last.error = true;
            }
        }
    }

    fn on_precompiled_run(&mut self, _result: &ExecutionResult, gas: i64, _ibs: &dyn StateView) {
        self.gas_on_precompile = Some(gas);
    }
}

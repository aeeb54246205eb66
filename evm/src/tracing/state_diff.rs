//! Parity-compatible per-account state delta tracer (`stateDiff` mode).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ethnum::U256;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::opcode_table::opcode;
use crate::revision::Revision;
use crate::state::StateView;
use crate::types::quantity;
use crate::types::Address;

use super::{ExecutionContext, ExecutionResult, EvmTracer, Message, StackView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffValue {
    Unchanged,
    Added(String),
    Removed(String),
    Changed { from: String, to: String },
}

impl Serialize for DiffValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DiffValue::Unchanged => serializer.serialize_str("="),
            DiffValue::Added(value) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("+", value)?;
                map.end()
            }
            DiffValue::Removed(value) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("-", value)?;
                map.end()
            }
            DiffValue::Changed { from, to } => {
                #[derive(Serialize)]
                struct FromTo<'a> {
                    from: &'a str,
                    to: &'a str,
                }
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("*", &FromTo { from, to })?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateDiffEntry {
    pub balance: DiffValue,
    pub code: DiffValue,
    pub nonce: DiffValue,
    pub storage: BTreeMap<String, DiffValue>,
}

impl Default for StateDiffEntry {
    fn default() -> Self {
        Self {
            balance: DiffValue::Unchanged,
            code: DiffValue::Unchanged,
            nonce: DiffValue::Unchanged,
            storage: BTreeMap::new(),
        }
    }
}

pub struct StateDiffTracer {
    initial: Box<dyn StateView>,
    touched_slots: HashMap<Address, BTreeSet<U256>>,
    state_diff: BTreeMap<String, StateDiffEntry>,
}

impl StateDiffTracer {
    /// `initial` is the pre-transaction snapshot the deltas are computed
    /// against.
    #[must_use]
    pub fn new(initial: Box<dyn StateView>) -> Self {
        Self {
            initial,
            touched_slots: HashMap::new(),
            state_diff: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn into_traces(self) -> Value {
        serde_json::to_value(&self.state_diff).expect("state diff serialization cannot fail")
    }
}

fn code_hex(code: &[u8]) -> String {
    format!("0x{}", hex::encode(code))
}

impl EvmTracer for StateDiffTracer {
    fn on_execution_start(&mut self, _revision: Revision, _message: &Message, _code: &[u8]) {}

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        _ibs: &dyn StateView,
    ) {
        let op = context.code.get(pc).copied().unwrap_or(opcode::STOP);
        if op == opcode::SSTORE {
            self.touched_slots
                .entry(context.message.recipient)
                .or_default()
                .insert(stack.peek(0));
        }
    }

    fn on_reward_granted(&mut self, _result: &ExecutionResult, ibs: &dyn StateView) {
        for address in ibs.touched() {
            let initial_exists = self.initial.exists(&address);
            let final_exists = ibs.exists(&address);
            let slots = self.touched_slots.get(&address).cloned().unwrap_or_default();

            let mut entry = StateDiffEntry::default();
            if initial_exists && final_exists {
                let mut all_equal = true;

                let initial_balance = self.initial.balance(&address);
                let final_balance = ibs.balance(&address);
                if initial_balance != final_balance {
                    all_equal = false;
                    entry.balance = DiffValue::Changed {
                        from: quantity::stripped_u256(initial_balance),
                        to: quantity::stripped_u256(final_balance),
                    };
                }

                let initial_code = self.initial.code(&address);
                let final_code = ibs.code(&address);
                if initial_code != final_code {
                    all_equal = false;
                    entry.code = DiffValue::Changed {
                        from: code_hex(&initial_code),
                        to: code_hex(&final_code),
                    };
                }

                let initial_nonce = self.initial.nonce(&address);
                let final_nonce = ibs.nonce(&address);
                if initial_nonce != final_nonce {
                    all_equal = false;
                    entry.nonce = DiffValue::Changed {
                        from: quantity::from_u64(initial_nonce),
                        to: quantity::from_u64(final_nonce),
                    };
                }

                for slot in &slots {
                    let original = ibs.original_storage(&address, slot);
                    let current = ibs.current_storage(&address, slot);
                    if original != current {
                        all_equal = false;
                        entry.storage.insert(
                            quantity::padded_u256(*slot),
                            DiffValue::Changed {
                                from: quantity::padded_u256(original),
                                to: quantity::padded_u256(current),
                            },
                        );
                    }
                }

                if all_equal {
                    continue;
                }
            } else if initial_exists {
                entry.balance =
                    DiffValue::Removed(quantity::stripped_u256(self.initial.balance(&address)));
                entry.code = DiffValue::Removed(code_hex(&self.initial.code(&address)));
                entry.nonce = DiffValue::Removed(quantity::from_u64(self.initial.nonce(&address)));
                for slot in &slots {
                    entry.storage.insert(
                        quantity::padded_u256(*slot),
                        DiffValue::Removed(quantity::padded_u256(
                            ibs.original_storage(&address, slot),
                        )),
                    );
                }
            } else if final_exists {
                entry.balance = DiffValue::Added(quantity::stripped_u256(ibs.balance(&address)));
                entry.code = DiffValue::Added(code_hex(&ibs.code(&address)));
                entry.nonce = DiffValue::Added(quantity::from_u64(ibs.nonce(&address)));
                for slot in &slots {
                    entry.storage.insert(
                        quantity::padded_u256(*slot),
                        DiffValue::Added(quantity::padded_u256(
                            ibs.current_storage(&address, slot),
                        )),
                    );
                }
            } else {
                continue;
            }

            self.state_diff.insert(address.to_string(), entry);
        }
    }
}

//! Generic ABI event decoding.
//!
//! Unlike a fixed contract set with codegen'd bindings (`alloy::sol!`), this
//! engine indexes whatever contracts a user declares at config time, so event
//! shapes aren't known until the ABI JSON is loaded. [`AbiRegistry`] parses
//! each declared contract's ABI once and decodes logs against it dynamically
//! via `alloy`'s `dyn-abi` crate, keyed by the same `"{Contract}:{Event}"`
//! function key the scheduler uses everywhere else.

use std::collections::HashMap;

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::{Event as AbiEvent, JsonAbi};
use alloy::primitives::B256;
use serde_json::{Map, Value, json};

use crate::error::DomainError;
use crate::types::entities::Log;

/// A single contract's parsed ABI, indexed by event name.
#[derive(Debug, Clone, Default)]
struct ContractAbi {
    events: HashMap<String, AbiEvent>,
}

/// All declared contracts' ABIs, keyed by contract name.
///
/// Built once at scheduler reset from user configuration and shared
/// read-only across the worker pool thereafter.
#[derive(Debug, Clone, Default)]
pub struct AbiRegistry {
    contracts: HashMap<String, ContractAbi>,
}

impl AbiRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `abi_json` (a standard Solidity ABI array) and register every
    /// event it declares under `contract_name`.
    ///
    /// # Errors
    /// Returns an error if `abi_json` isn't a valid ABI document.
    pub fn register_contract(
        &mut self,
        contract_name: impl Into<String>,
        abi_json: &str,
    ) -> Result<(), DomainError> {
        let abi: JsonAbi = serde_json::from_str(abi_json).map_err(|e| {
            DomainError::InvalidDependencyGraph(format!("malformed ABI JSON: {e}"))
        })?;
        let mut events = HashMap::new();
        for event in abi.events.into_values().flatten() {
            events.insert(event.name.clone(), event);
        }
        self.contracts
            .insert(contract_name.into(), ContractAbi { events });
        Ok(())
    }

    fn event_for(&self, contract_name: &str, event_name: &str) -> Option<&AbiEvent> {
        self.contracts.get(contract_name)?.events.get(event_name)
    }

    /// Decode `log` against the ABI declared for `contract_name`/`event_name`.
    ///
    /// `spec.md` §4.3: "decoding failures are logged and skipped (common when
    /// an indexed-argument filter's selector matches a log whose payload
    /// cannot be decoded under the nominal ABI)" — callers are expected to
    /// catch [`DomainError::EventDecodeFailed`], log it, and drop the event
    /// rather than propagate it.
    ///
    /// # Errors
    /// Returns [`DomainError::EventDecodeFailed`] if no ABI is registered for
    /// the key, the log's `topic0` doesn't match the event's selector, or the
    /// payload fails to decode under the declared parameter types.
    pub fn decode_event(
        &self,
        contract_name: &str,
        event_name: &str,
        log: &Log,
    ) -> Result<Map<String, Value>, DomainError> {
        let function_key = format!("{contract_name}:{event_name}");
        let abi_event = self.event_for(contract_name, event_name).ok_or_else(|| {
            DomainError::EventDecodeFailed {
                function_key: function_key.clone(),
                reason: "no ABI registered for this contract/event".to_string(),
            }
        })?;

        let selector = abi_event.selector();
        if log.topics[0] != Some(B256::from(selector)) {
            return Err(DomainError::EventDecodeFailed {
                function_key,
                reason: "topic0 does not match the event's selector".to_string(),
            });
        }

        let topics: Vec<B256> = log.topics.iter().filter_map(|t| *t).collect();
        let decoded = abi_event
            .decode_log_parts(topics, &log.data)
            .map_err(|e| DomainError::EventDecodeFailed {
                function_key: function_key.clone(),
                reason: e.to_string(),
            })?;

        Ok(named_values_to_json(abi_event, &decoded.indexed, &decoded.body))
    }
}

/// Zip an event's indexed and non-indexed parameter names back onto the
/// decoded values, the same pairing `alloy`'s codegen'd bindings produce,
/// and render each value as plain JSON.
fn named_values_to_json(
    abi_event: &AbiEvent,
    indexed: &[DynSolValue],
    body: &[DynSolValue],
) -> Map<String, Value> {
    let mut out = Map::new();
    let (indexed_params, body_params): (Vec<_>, Vec<_>) =
        abi_event.inputs.iter().partition(|p| p.indexed);
    for (param, value) in indexed_params.into_iter().zip(indexed) {
        out.insert(param.name.clone(), sol_value_to_json(value));
    }
    for (param, value) in body_params.into_iter().zip(body) {
        out.insert(param.name.clone(), sol_value_to_json(value));
    }
    out
}

/// Render a decoded Solidity value as JSON. Integers are rendered as decimal
/// strings rather than JSON numbers, since `uint256` routinely exceeds
/// `f64`/`i64` precision.
fn sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => json!(b),
        DynSolValue::Int(i, _) => json!(i.to_string()),
        DynSolValue::Uint(u, _) => json!(u.to_string()),
        DynSolValue::FixedBytes(b, size) => json!(format!("0x{}", hex::encode(&b[..*size]))),
        DynSolValue::Address(a) => json!(a.to_string()),
        DynSolValue::Function(f) => json!(f.to_string()),
        DynSolValue::Bytes(b) => json!(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => json!(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            Value::Array(items.iter().map(sol_value_to_json).collect())
        }
        DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(sol_value_to_json).collect())
        }
        // `CustomStruct` already surfaces its named fields via `Tuple`'s
        // element order in `alloy`'s dyn-abi encoding; no extra case needed.
        other => json!(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitives::{BlockNumber, ChainId};
    use alloy::primitives::{Address, address, keccak256};

    const TRANSFER_ABI: &str = r#"[
        {
            "type": "event",
            "name": "Transfer",
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ]
        }
    ]"#;

    fn transfer_log(from: Address, to: Address, value: u64) -> Log {
        let selector = keccak256(b"Transfer(address,address,uint256)");
        let topic_from = B256::from(alloy::primitives::U256::from_be_slice(from.as_slice()));
        let topic_to = B256::from(alloy::primitives::U256::from_be_slice(to.as_slice()));
        let data = alloy::primitives::U256::from(value).to_be_bytes_vec();
        Log {
            chain_id: ChainId::new(1),
            block_hash: B256::repeat_byte(1),
            block_number: BlockNumber::new(1),
            log_index: 0,
            transaction_hash: B256::repeat_byte(2),
            address: from,
            topics: [Some(selector), Some(topic_from), Some(topic_to), None],
            data,
        }
    }

    #[test]
    fn decodes_indexed_and_body_params() {
        let mut registry = AbiRegistry::new();
        registry.register_contract("Token", TRANSFER_ABI).unwrap();

        let from = address!("0000000000000000000000000000000000000a");
        let to = address!("0000000000000000000000000000000000000b");
        let log = transfer_log(from, to, 1000);

        let args = registry.decode_event("Token", "Transfer", &log).unwrap();
        assert_eq!(args.get("value").unwrap(), &json!("1000"));
        assert!(args.contains_key("from"));
        assert!(args.contains_key("to"));
    }

    #[test]
    fn unregistered_contract_fails_to_decode() {
        let registry = AbiRegistry::new();
        let log = transfer_log(Address::ZERO, Address::ZERO, 1);
        let err = registry.decode_event("Token", "Transfer", &log).unwrap_err();
        assert!(matches!(err, DomainError::EventDecodeFailed { .. }));
    }

    #[test]
    fn mismatched_selector_fails_to_decode() {
        let mut registry = AbiRegistry::new();
        registry.register_contract("Token", TRANSFER_ABI).unwrap();
        let mut log = transfer_log(Address::ZERO, Address::ZERO, 1);
        log.topics[0] = Some(B256::repeat_byte(0xFF));
        let err = registry.decode_event("Token", "Transfer", &log).unwrap_err();
        assert!(matches!(err, DomainError::EventDecodeFailed { .. }));
    }
}

//! Signature mining.
//!
//! The State-History block body carries each transaction in packed form. The
//! packed payload is speculatively decoded against a fixed candidate type
//! list; when it turns out to be a plain `transaction`, its actions are
//! fingerprinted and bound to the transaction's signatures, producing the
//! per-block signature map the assembler joins traces against.

use crate::abi::Codec;
use crate::hasher::{fingerprint, HashMode};
use serde_json::Value;
use std::collections::HashMap;
use tevm_indexer_types::Action;

/// Candidate types tried in order for `packed_trx` payloads; the first
/// successful checked decode wins.
const PACKED_TRX_CANDIDATES: [&str; 9] = [
    "transaction",
    "code_v0",
    "account_v0",
    "contract_table_v0",
    "contract_row_v0",
    "code",
    "account",
    "contract_table",
    "contract_row",
];

fn variant_pair(value: &Value) -> Option<(&str, &Value)> {
    let parts = value.as_array().filter(|parts| parts.len() == 2)?;
    Some((parts[0].as_str()?, &parts[1]))
}

fn decode_first_candidate(codec: &Codec, raw: &[u8]) -> Option<(&'static str, Value)> {
    for candidate in PACKED_TRX_CANDIDATES {
        if !codec.has_type(candidate) {
            continue;
        }
        if let Ok(value) = codec.decode_checked(candidate, raw) {
            return Some((candidate, value));
        }
    }
    None
}

/// Signatures live either directly on the packed transaction or, for pruned
/// transactions, inside the legacy prunable-data envelope.
fn transaction_signatures(packed: &Value) -> Vec<String> {
    let signatures = packed.get("signatures").and_then(Value::as_array).or_else(|| {
        let (tag, prunable) = variant_pair(packed.get("prunable_data")?)?;
        if tag != "prunable_data_full_legacy" {
            return None;
        }
        prunable.get("signatures")?.as_array()
    });
    signatures
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Builds the per-block fingerprint -> signatures map from a decoded block
/// body. Undecodable packed payloads are logged and skipped; the block stays
/// emittable and the affected actions surface with empty signature lists.
pub fn mine_signatures(
    block: &Value,
    codec: &Codec,
    mode: HashMode,
) -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    let Some(transactions) = block.get("transactions").and_then(Value::as_array) else {
        return map;
    };
    for receipt in transactions {
        let Some(trx) = receipt.get("trx") else {
            continue;
        };
        let Some((tag, packed)) = variant_pair(trx) else {
            continue;
        };
        if tag != "packed_transaction" {
            continue;
        }
        let Some(packed_hex) = packed.get("packed_trx").and_then(Value::as_str) else {
            continue;
        };
        let Ok(raw) = hex::decode(packed_hex) else {
            tracing::warn!("packed_trx payload is not hex, skipping");
            continue;
        };
        let Some((candidate, decoded)) = decode_first_candidate(codec, &raw) else {
            tracing::warn!("packed_trx matched no candidate type, skipping");
            continue;
        };
        if candidate != "transaction" {
            continue;
        }
        let signatures = transaction_signatures(packed);
        let Some(actions) = decoded.get("actions").and_then(Value::as_array) else {
            continue;
        };
        for action_value in actions {
            match serde_json::from_value::<Action>(action_value.clone()) {
                Ok(action) => {
                    map.insert(fingerprint(&action, mode), signatures.clone());
                }
                Err(err) => tracing::warn!("unreadable action in packed transaction: {err}"),
            }
        }
    }
    map
}

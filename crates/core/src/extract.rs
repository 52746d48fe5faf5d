//! Pulls EVM-relevant structures out of decoded block payloads: executed
//! action traces in canonical order, and the singleton `eosio/eosio/global`
//! table row carrying the EVM block number.

use crate::abi::{Codec, CodecError};
use serde_json::Value;
use std::sync::Arc;
use tevm_indexer_types::Action;

/// Delta tables whose rows get a second-stage decode after the top-level
/// `table_delta[]` pass.
pub const ROW_WHITELIST: &[&str] = &["contract_row"];

const STATUS_EXECUTED: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unexpected payload shape: {0}")]
    Shape(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// One executed, non-notification action trace, paired with enough context to
/// bind it back to its transaction's signatures.
#[derive(Debug, Clone)]
pub struct ExtractedTrace {
    pub trx_id: String,
    pub action_ordinal: u32,
    pub global_sequence: u64,
    pub act: Action,
    /// All kept actions of the enclosing transaction in execution order,
    /// shared across that transaction's traces.
    pub tx_actions: Arc<Vec<Action>>,
}

/// Decoded `eosio/eosio/global` row.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRow {
    pub block_num: u64,
    pub row: Value,
}

fn variant_pair(value: &Value) -> Result<(&str, &Value), ExtractError> {
    let parts = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| ExtractError::Shape("expected a [tag, value] pair".to_string()))?;
    let tag = parts[0]
        .as_str()
        .ok_or_else(|| ExtractError::Shape("variant tag is not a string".to_string()))?;
    Ok((tag, &parts[1]))
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value, ExtractError> {
    value
        .get(name)
        .ok_or_else(|| ExtractError::Shape(format!("missing field `{name}`")))
}

fn field_str<'a>(value: &'a Value, name: &str) -> Result<&'a str, ExtractError> {
    field(value, name)?
        .as_str()
        .ok_or_else(|| ExtractError::Shape(format!("field `{name}` is not a string")))
}

fn field_u64(value: &Value, name: &str) -> Result<u64, ExtractError> {
    let raw = field(value, name)?;
    raw.as_u64()
        .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| ExtractError::Shape(format!("field `{name}` is not an integer")))
}

/// Flattens executed `transaction_trace_v0` entries into a single list of
/// action traces, dropping inline notifications (`receiver != act.account`)
/// and sorting globally by `global_sequence` so cross-transaction execution
/// order is preserved.
pub fn extract_traces(traces: &Value) -> Result<Vec<ExtractedTrace>, ExtractError> {
    let entries = traces
        .as_array()
        .ok_or_else(|| ExtractError::Shape("traces payload is not an array".to_string()))?;
    let mut out = Vec::new();
    for entry in entries {
        let (tag, body) = variant_pair(entry)?;
        if tag != "transaction_trace_v0" {
            tracing::debug!(tag, "skipping unrecognized transaction trace variant");
            continue;
        }
        if field_u64(body, "status")? != STATUS_EXECUTED {
            continue;
        }
        let trx_id = field_str(body, "id")?.to_string();

        let mut kept = Vec::new();
        for trace_entry in field(body, "action_traces")?
            .as_array()
            .ok_or_else(|| ExtractError::Shape("action_traces is not an array".to_string()))?
        {
            let (trace_tag, trace) = variant_pair(trace_entry)?;
            if !trace_tag.starts_with("action_trace_v") {
                tracing::debug!(tag = trace_tag, "skipping unrecognized action trace variant");
                continue;
            }
            let act: Action = serde_json::from_value(field(trace, "act")?.clone())
                .map_err(|err| ExtractError::Shape(format!("bad act: {err}")))?;
            // Inline notifications replay the action under every notified
            // receiver; only the original execution counts.
            if field_str(trace, "receiver")? != act.account {
                continue;
            }
            let (_, receipt) = variant_pair(field(trace, "receipt")?)?;
            kept.push((
                field_u64(trace, "action_ordinal")? as u32,
                field_u64(receipt, "global_sequence")?,
                act,
            ));
        }

        let tx_actions = Arc::new(kept.iter().map(|(_, _, act)| act.clone()).collect::<Vec<_>>());
        for (action_ordinal, global_sequence, act) in kept {
            out.push(ExtractedTrace {
                trx_id: trx_id.clone(),
                action_ordinal,
                global_sequence,
                act,
                tx_actions: Arc::clone(&tx_actions),
            });
        }
    }
    out.sort_by_key(|trace| trace.global_sequence);
    Ok(out)
}

/// Second-stage decode of whitelisted delta rows: rewrites each row's opaque
/// `data` hex into its structured form using the session schema.
pub fn decode_whitelisted_rows(deltas: Value, codec: &Codec) -> Result<Value, ExtractError> {
    let mut entries = match deltas {
        Value::Array(entries) => entries,
        _ => return Err(ExtractError::Shape("deltas payload is not an array".to_string())),
    };
    for entry in &mut entries {
        let (tag, body) = variant_pair(entry)?;
        if !tag.starts_with("table_delta_v") {
            continue;
        }
        let name = field_str(body, "name")?.to_string();
        if !ROW_WHITELIST.contains(&name.as_str()) {
            continue;
        }
        let rows = entry
            .get_mut(1)
            .and_then(|body| body.get_mut("rows"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| ExtractError::Shape("rows is not an array".to_string()))?;
        for row in rows {
            let data = field_str(row, "data")?;
            let raw = hex::decode(data)
                .map_err(|err| ExtractError::Shape(format!("row data is not hex: {err}")))?;
            let decoded = codec.decode_checked(&name, &raw)?;
            row["data"] = decoded;
        }
    }
    Ok(Value::Array(entries))
}

/// Scans whitelisted-decoded deltas for the singleton `eosio/eosio/global`
/// row and decodes its payload with the system contract's schema. Returns
/// `None` when the block carries no global row (the limbo case).
pub fn extract_global_row(
    deltas: &Value,
    eosio_abi: &Codec,
) -> Result<Option<GlobalRow>, ExtractError> {
    let entries = deltas
        .as_array()
        .ok_or_else(|| ExtractError::Shape("deltas payload is not an array".to_string()))?;
    for entry in entries {
        let (tag, body) = variant_pair(entry)?;
        if !tag.starts_with("table_delta_v") || field_str(body, "name")? != "contract_row" {
            continue;
        }
        for row in field(body, "rows")?
            .as_array()
            .ok_or_else(|| ExtractError::Shape("rows is not an array".to_string()))?
        {
            let (_, contract_row) = variant_pair(field(row, "data")?)?;
            if field_str(contract_row, "code")? != "eosio"
                || field_str(contract_row, "scope")? != "eosio"
                || field_str(contract_row, "table")? != "global"
            {
                continue;
            }
            let row_type = eosio_abi
                .table_row_type("global")
                .ok_or_else(|| {
                    ExtractError::Shape("system contract schema lacks a `global` table".to_string())
                })?
                .to_string();
            let payload = hex::decode(field_str(contract_row, "value")?)
                .map_err(|err| ExtractError::Shape(format!("row value is not hex: {err}")))?;
            let decoded = eosio_abi.decode(&row_type, &payload)?;
            let block_num = field_u64(&decoded, "block_num")?;
            return Ok(Some(GlobalRow {
                block_num,
                row: decoded,
            }));
        }
    }
    Ok(None)
}

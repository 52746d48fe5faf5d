//! Seam to the EVM transaction decoders.
//!
//! The pipeline only cares about the contract: each handler turns a native
//! action into an [`EvmTx`] and advances the block's cumulative gas counter.
//! Receipt-level gas accounting belongs to the EVM execution collaborator;
//! the native implementation here charges the intrinsic cost per
//! transaction.

use alloy::primitives::U256;
use serde_json::{json, Value};
use tevm_indexer_types::{Action, EvmTx, EvmTxKind};

/// Base cost of any EVM transaction.
const INTRINSIC_GAS: u64 = 21_000;

#[derive(Debug, thiserror::Error)]
#[error("tx deserialization: {0}")]
pub struct TxDeserializationError(pub String);

/// Decoders for the three EVM-relevant native actions. `gas_used_block` is
/// the block's cumulative gas before this transaction; implementations
/// return the transaction with the counter advanced past it.
pub trait EvmActionHandler: Send + Sync {
    fn handle_raw(
        &self,
        act: &Action,
        data: &Value,
        gas_used_block: U256,
    ) -> Result<EvmTx, TxDeserializationError>;

    fn handle_withdraw(
        &self,
        act: &Action,
        data: &Value,
        gas_used_block: U256,
    ) -> Result<EvmTx, TxDeserializationError>;

    fn handle_deposit(
        &self,
        act: &Action,
        data: &Value,
        gas_used_block: U256,
    ) -> Result<EvmTx, TxDeserializationError>;
}

#[derive(Debug, Default)]
pub struct NativeEvmHandler;

impl NativeEvmHandler {
    fn require_str(data: &Value, field: &str) -> Result<String, TxDeserializationError> {
        data.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TxDeserializationError(format!("missing `{field}` in action data")))
    }
}

impl EvmActionHandler for NativeEvmHandler {
    fn handle_raw(
        &self,
        _act: &Action,
        data: &Value,
        gas_used_block: U256,
    ) -> Result<EvmTx, TxDeserializationError> {
        let tx_bytes = Self::require_str(data, "tx")?;
        if tx_bytes.is_empty() {
            return Err(TxDeserializationError("empty raw transaction".to_string()));
        }
        let sender = data.get("sender").and_then(Value::as_str);
        Ok(EvmTx {
            kind: EvmTxKind::Raw,
            doc: json!({"raw": tx_bytes, "sender": sender}),
            gas_used_block: gas_used_block + U256::from(INTRINSIC_GAS),
        })
    }

    fn handle_withdraw(
        &self,
        _act: &Action,
        data: &Value,
        gas_used_block: U256,
    ) -> Result<EvmTx, TxDeserializationError> {
        let to = Self::require_str(data, "to")?;
        let quantity = Self::require_str(data, "quantity")?;
        Ok(EvmTx {
            kind: EvmTxKind::Withdraw,
            doc: json!({"to": to, "quantity": quantity}),
            gas_used_block: gas_used_block + U256::from(INTRINSIC_GAS),
        })
    }

    fn handle_deposit(
        &self,
        _act: &Action,
        data: &Value,
        gas_used_block: U256,
    ) -> Result<EvmTx, TxDeserializationError> {
        let from = Self::require_str(data, "from")?;
        let quantity = Self::require_str(data, "quantity")?;
        let memo = data.get("memo").and_then(Value::as_str).unwrap_or_default();
        Ok(EvmTx {
            kind: EvmTxKind::Deposit,
            doc: json!({"from": from, "quantity": quantity, "memo": memo}),
            gas_used_block: gas_used_block + U256::from(INTRINSIC_GAS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act() -> Action {
        Action {
            account: "eosio.evm".to_string(),
            name: "raw".to_string(),
            authorization: vec![],
            data: String::new(),
        }
    }

    #[test]
    fn raw_advances_gas_counter() {
        let handler = NativeEvmHandler;
        let tx = handler
            .handle_raw(&act(), &json!({"tx": "f86b", "sender": null}), U256::from(100u64))
            .unwrap();
        assert_eq!(tx.kind, EvmTxKind::Raw);
        assert_eq!(tx.gas_used_block, U256::from(21_100u64));
    }

    #[test]
    fn raw_rejects_empty_payload() {
        let handler = NativeEvmHandler;
        assert!(handler
            .handle_raw(&act(), &json!({"tx": ""}), U256::ZERO)
            .is_err());
        assert!(handler.handle_raw(&act(), &json!({}), U256::ZERO).is_err());
    }

    #[test]
    fn deposit_keeps_transfer_fields() {
        let handler = NativeEvmHandler;
        let tx = handler
            .handle_deposit(
                &act(),
                &json!({"from": "alice", "to": "eosio.evm", "quantity": "1.0000 TLOS", "memo": "0xabc"}),
                U256::ZERO,
            )
            .unwrap();
        assert_eq!(tx.doc["from"], "alice");
        assert_eq!(tx.doc["memo"], "0xabc");
        assert_eq!(tx.gas_used_block, U256::from(21_000u64));
    }
}

use crate::types::UserOperation;
use anyhow::{anyhow, Context};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::Value;

/// Full-width lowercase hex (the `Display` impls of the hash types abbreviate).
pub fn fmt_address(addr: Address) -> String {
    format!("{addr:#x}")
}

pub fn fmt_h256(h: H256) -> String {
    format!("{h:#x}")
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn user_op_to_json(op: &UserOperation) -> Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

/// Bundlers and paymasters are inconsistent about quantities: most send hex strings,
/// some send plain JSON numbers. Accept both.
pub fn parse_u256_value(v: &Value) -> anyhow::Result<U256> {
    match v {
        Value::String(s) => parse_u256_quantity(s),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| anyhow!("quantity {n} is not an unsigned integer")),
        other => Err(anyhow!("expected quantity, got {other}")),
    }
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    if let Some(hex_str) = s.strip_prefix("0x") {
        if hex_str.is_empty() {
            return Ok(U256::zero());
        }
        return Ok(U256::from_str_radix(hex_str, 16)?);
    }
    Ok(U256::from_dec_str(s)?)
}

pub fn parse_bytes(s: &str) -> anyhow::Result<Bytes> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str).with_context(|| format!("invalid hex bytes {s}"))?;
    Ok(Bytes::from(bytes))
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let bytes = parse_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hash, got {} bytes", bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

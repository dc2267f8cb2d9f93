use crate::encoding::{self, parse_bytes, parse_u256_value};
use crate::rpc::HttpRpc;
use crate::types::UserOperation;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;

/// Paymaster response: sponsorship payload plus any gas fields the paymaster decided
/// to override.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sponsorship {
    pub paymaster_and_data: Bytes,
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
}

#[async_trait]
pub trait PaymasterApi: Send + Sync {
    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
        context: &Value,
    ) -> Result<Sponsorship>;
}

/// Verifying-paymaster web service client (`pm_sponsorUserOperation`).
///
/// The context object is free-form and forwarded verbatim; Stackup-style services expect
/// `{"type": "payg"}`.
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    rpc: HttpRpc,
}

impl PaymasterClient {
    pub fn new(url: String) -> Self {
        Self {
            rpc: HttpRpc::new(url),
        }
    }
}

#[async_trait]
impl PaymasterApi for PaymasterClient {
    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
        context: &Value,
    ) -> Result<Sponsorship> {
        let params = serde_json::json!([
            encoding::user_op_to_json(op),
            encoding::fmt_address(entry_point),
            context,
        ]);
        let res = self
            .rpc
            .call("pm_sponsorUserOperation", params)
            .await
            .with_context(|| format!("pm_sponsorUserOperation RPC failed ({})", self.rpc.url()))?;
        parse_sponsorship(&res)
    }
}

fn parse_sponsorship(result: &Value) -> Result<Sponsorship> {
    // Most services return the v0.6 fields at the top level:
    //   { "paymasterAndData": "0x...", "callGasLimit": "0x...", ... }
    // Alchemy wraps them per EntryPoint version:
    //   { "entrypointV06Response": { "paymasterAndData": "0x..." }, "entrypointV07Response": { ... } }
    // Some services return the bare hex string.
    if let Some(s) = result.as_str() {
        return Ok(Sponsorship {
            paymaster_and_data: parse_bytes(s).context("invalid hex in paymasterAndData")?,
            ..Default::default()
        });
    }

    let body = if result.get("paymasterAndData").is_some() {
        result
    } else {
        result
            .get("entrypointV06Response")
            .or_else(|| result.get("entryPointV06Response"))
            .ok_or_else(|| {
                anyhow!(
                    "missing paymasterAndData (expected top-level paymasterAndData or entrypointV06Response.paymasterAndData)"
                )
            })?
    };

    let pm = body
        .get("paymasterAndData")
        .and_then(|x| x.as_str())
        .ok_or_else(|| anyhow!("missing paymasterAndData field"))?;

    Ok(Sponsorship {
        paymaster_and_data: parse_bytes(pm).context("invalid hex in paymasterAndData")?,
        call_gas_limit: optional_u256(body, "callGasLimit")?,
        verification_gas_limit: optional_u256(body, "verificationGasLimit")?,
        pre_verification_gas: optional_u256(body, "preVerificationGas")?,
    })
}

fn optional_u256(v: &Value, key: &str) -> Result<Option<U256>> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => parse_u256_value(x)
            .with_context(|| format!("invalid {key}"))
            .map(Some),
    }
}

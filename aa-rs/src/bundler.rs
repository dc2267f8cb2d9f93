use crate::encoding::{self, parse_h256, parse_u256_value};
use crate::error::AccountError;
use crate::rpc::{HttpRpc, RpcCallError};
use crate::types::UserOperation;
use anyhow::anyhow;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256, U64};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

/// Subset of `eth_getUserOperationReceipt` this crate reads. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub receipt: InclusionReceipt,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionReceipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: Option<U64>,
}

/// Bundler JSON-RPC surface (ERC-4337 `eth_*UserOperation*` namespace).
#[async_trait]
pub trait BundlerApi: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimates, AccountError>;

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, AccountError>;

    /// `Ok(None)` while the operation is not yet included.
    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, AccountError>;
}

#[derive(Debug, Clone)]
pub struct BundlerClient {
    rpc: HttpRpc,
}

impl BundlerClient {
    pub fn new(url: String) -> Self {
        Self {
            rpc: HttpRpc::new(url),
        }
    }
}

#[async_trait]
impl BundlerApi for BundlerClient {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimates, AccountError> {
        let params = serde_json::json!([
            encoding::user_op_to_json(op),
            encoding::fmt_address(entry_point)
        ]);
        let res = self
            .rpc
            .call("eth_estimateUserOperationGas", params)
            .await?;
        parse_gas_estimates(&res).map_err(|e| RpcCallError::Malformed(format!("{e:#}")).into())
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, AccountError> {
        let params = serde_json::json!([
            encoding::user_op_to_json(op),
            encoding::fmt_address(entry_point)
        ]);
        let res = match self.rpc.call("eth_sendUserOperation", params).await {
            Ok(v) => v,
            Err(e @ RpcCallError::Rpc { .. }) => {
                return Err(AccountError::SubmissionRejected { reason: e.reason() })
            }
            Err(e) => return Err(e.into()),
        };
        parse_userop_hash(&res).map_err(|e| RpcCallError::Malformed(format!("{e:#}")).into())
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, AccountError> {
        let params = serde_json::json!([encoding::fmt_h256(user_op_hash)]);
        let res = self.rpc.call("eth_getUserOperationReceipt", params).await?;
        parse_receipt(res).map_err(|e| RpcCallError::Malformed(format!("{e:#}")).into())
    }
}

fn parse_gas_estimates(res: &Value) -> anyhow::Result<GasEstimates> {
    Ok(GasEstimates {
        call_gas_limit: parse_u256_field(res, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(res, "verificationGasLimit")?,
        pre_verification_gas: parse_u256_field(res, "preVerificationGas")?,
    })
}

fn parse_u256_field(v: &Value, key: &str) -> anyhow::Result<U256> {
    let field = v
        .get(key)
        .ok_or_else(|| anyhow!("missing or invalid field {key}"))?;
    parse_u256_value(field)
}

fn parse_receipt(res: Value) -> anyhow::Result<Option<UserOperationReceipt>> {
    if res.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(res)?))
}

fn parse_userop_hash(res: &Value) -> anyhow::Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string.
    // Alchemy's docs (and sometimes responses) wrap it in an object: { "result": "0x..." }.
    // Accept both shapes for maximum compatibility.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(anyhow!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {}",
            res
        ));
    };

    parse_h256(hash_str)
}

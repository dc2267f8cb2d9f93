use super::{BuildContext, UserOperationMiddleware};
use anyhow::Context;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{BlockNumber, U256};
use std::sync::Arc;

/// Percentage added on top of the node's suggested priority fee.
const PRIORITY_FEE_BUFFER_PCT: u64 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeFields {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// EIP-1559 fees: tip plus buffer, and twice the latest base fee on top.
pub fn eip1559_fees(suggested_tip: U256, base_fee: Option<U256>) -> FeeFields {
    let tip = suggested_tip + suggested_tip / 100 * PRIORITY_FEE_BUFFER_PCT;
    let max_fee = match base_fee {
        Some(base) => base * 2 + tip,
        None => tip,
    };
    FeeFields {
        max_fee_per_gas: max_fee,
        max_priority_fee_per_gas: tip,
    }
}

/// Fallback for nodes without `eth_maxPriorityFeePerGas`: use `eth_gasPrice` for both.
pub fn legacy_fees(gas_price: U256) -> FeeFields {
    FeeFields {
        max_fee_per_gas: gas_price,
        max_priority_fee_per_gas: gas_price,
    }
}

/// Scales both fee fields by a multiplier in basis points (10_000 = 1x).
pub fn apply_multiplier(fees: FeeFields, bps: u64) -> FeeFields {
    let bps = U256::from(bps.max(1));
    let denom = U256::from(10_000u64);
    FeeFields {
        max_fee_per_gas: fees.max_fee_per_gas * bps / denom,
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas * bps / denom,
    }
}

/// Fills `maxFeePerGas` / `maxPriorityFeePerGas` from current network conditions unless the
/// caller pinned them through overrides.
pub struct GasPriceFiller<M> {
    client: Arc<M>,
    multiplier_bps: u64,
}

impl<M: Middleware + 'static> GasPriceFiller<M> {
    pub fn new(client: Arc<M>, multiplier_bps: u64) -> Self {
        Self {
            client,
            multiplier_bps,
        }
    }

    async fn current_fees(&self) -> anyhow::Result<FeeFields> {
        let tip = self
            .client
            .provider()
            .request::<_, U256>("eth_maxPriorityFeePerGas", ())
            .await;

        let fees = match tip {
            Ok(tip) => {
                let block = self
                    .client
                    .get_block(BlockNumber::Latest)
                    .await
                    .context("failed to fetch latest block")?;
                eip1559_fees(tip, block.and_then(|b| b.base_fee_per_gas))
            }
            Err(err) => {
                tracing::debug!(error = %err, "eth_maxPriorityFeePerGas unavailable; using eth_gasPrice");
                let gas_price = self
                    .client
                    .get_gas_price()
                    .await
                    .context("failed to fetch gas price")?;
                legacy_fees(gas_price)
            }
        };

        Ok(apply_multiplier(fees, self.multiplier_bps))
    }
}

#[async_trait]
impl<M: Middleware + 'static> UserOperationMiddleware for GasPriceFiller<M> {
    fn name(&self) -> &'static str {
        "gas-price"
    }

    async fn run(&self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        if ctx.overrides.max_fee_per_gas.is_some()
            && ctx.overrides.max_priority_fee_per_gas.is_some()
        {
            return Ok(());
        }

        let fees = self.current_fees().await?;

        if ctx.overrides.max_fee_per_gas.is_none() {
            ctx.op.max_fee_per_gas = fees.max_fee_per_gas;
        }
        if ctx.overrides.max_priority_fee_per_gas.is_none() {
            // A tip above the fee cap is rejected by bundlers; cap it at a pinned max fee.
            ctx.op.max_priority_fee_per_gas =
                fees.max_priority_fee_per_gas.min(ctx.op.max_fee_per_gas);
        }

        if self.multiplier_bps != 10_000 {
            tracing::info!(
                "gas multiplier applied: {} bps (maxFeePerGas={}, maxPriorityFeePerGas={})",
                self.multiplier_bps,
                ctx.op.max_fee_per_gas,
                ctx.op.max_priority_fee_per_gas
            );
        }
        Ok(())
    }
}

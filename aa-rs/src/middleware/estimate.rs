use super::{BuildContext, UserOperationMiddleware};
use crate::bundler::BundlerApi;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

/// Self-funded gas: asks the bundler to estimate the still-unsigned operation (carrying the
/// placeholder signature) and writes whichever gas limits the caller did not pin.
pub struct EstimateUserOperationGas<B> {
    bundler: Arc<B>,
}

impl<B: BundlerApi> EstimateUserOperationGas<B> {
    pub fn new(bundler: Arc<B>) -> Self {
        Self { bundler }
    }
}

#[async_trait]
impl<B: BundlerApi + 'static> UserOperationMiddleware for EstimateUserOperationGas<B> {
    fn name(&self) -> &'static str {
        "estimate-gas"
    }

    async fn run(&self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        let est = self
            .bundler
            .estimate_user_operation_gas(&ctx.op, ctx.entry_point)
            .await
            .context("bundler gas estimate failed")?;

        if ctx.overrides.pre_verification_gas.is_none() {
            ctx.op.pre_verification_gas = est.pre_verification_gas;
        }
        if ctx.overrides.verification_gas_limit.is_none() {
            ctx.op.verification_gas_limit = est.verification_gas_limit;
        }
        if ctx.overrides.call_gas_limit.is_none() {
            ctx.op.call_gas_limit = est.call_gas_limit;
        }

        tracing::debug!(
            call_gas_limit = %est.call_gas_limit,
            verification_gas_limit = %est.verification_gas_limit,
            pre_verification_gas = %est.pre_verification_gas,
            "estimated user operation gas"
        );
        Ok(())
    }
}

use super::{BuildContext, UserOperationMiddleware};
use crate::paymaster::PaymasterApi;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Requests sponsorship from a verifying paymaster and applies its `paymasterAndData` plus any
/// gas fields it returns. Replaces self-estimation in the pipeline.
pub struct VerifyingPaymaster<P> {
    paymaster: Arc<P>,
    context: Value,
}

impl<P: PaymasterApi> VerifyingPaymaster<P> {
    pub fn new(paymaster: Arc<P>, context: Value) -> Self {
        Self { paymaster, context }
    }
}

#[async_trait]
impl<P: PaymasterApi + 'static> UserOperationMiddleware for VerifyingPaymaster<P> {
    fn name(&self) -> &'static str {
        "paymaster"
    }

    async fn run(&self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        let sponsorship = self
            .paymaster
            .sponsor_user_operation(&ctx.op, ctx.entry_point, &self.context)
            .await
            .context("paymaster sponsorship failed")?;

        ctx.op.paymaster_and_data = sponsorship.paymaster_and_data;
        // Gas fields the caller pinned win over the paymaster's.
        if ctx.overrides.pre_verification_gas.is_none() {
            if let Some(v) = sponsorship.pre_verification_gas {
                ctx.op.pre_verification_gas = v;
            }
        }
        if ctx.overrides.verification_gas_limit.is_none() {
            if let Some(v) = sponsorship.verification_gas_limit {
                ctx.op.verification_gas_limit = v;
            }
        }
        if ctx.overrides.call_gas_limit.is_none() {
            if let Some(v) = sponsorship.call_gas_limit {
                ctx.op.call_gas_limit = v;
            }
        }

        tracing::debug!(
            paymaster_and_data_len = ctx.op.paymaster_and_data.len(),
            "applied paymaster sponsorship"
        );
        Ok(())
    }
}

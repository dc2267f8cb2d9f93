//! Ordered UserOperation build pipeline.
//!
//! Each step reads and mutates the in-progress operation. Steps run strictly in registration
//! order because later steps depend on fields written by earlier ones: the signature commits to
//! every gas and paymaster field, so signing is always last.

mod account;
mod estimate;
mod gas_price;
mod paymaster;
mod signature;

pub use account::AccountResolver;
pub use estimate::EstimateUserOperationGas;
pub use gas_price::GasPriceFiller;
pub use paymaster::VerifyingPaymaster;
pub use signature::EoaSignature;

#[cfg(test)]
pub(crate) use gas_price::tests::latest_block;

use crate::error::AccountError;
use crate::types::{UserOperation, UserOperationOverrides};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use std::sync::Arc;

/// State shared by every step of one build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub op: UserOperation,
    /// Fields the caller pinned explicitly; steps must not overwrite these.
    pub overrides: UserOperationOverrides,
    pub entry_point: Address,
    pub chain_id: u64,
}

impl BuildContext {
    pub fn new(overrides: UserOperationOverrides, entry_point: Address, chain_id: u64) -> Self {
        Self {
            op: UserOperation::with_overrides(&overrides),
            overrides,
            entry_point,
            chain_id,
        }
    }

    pub fn user_op_hash(&self) -> H256 {
        self.op.hash(self.entry_point, self.chain_id)
    }
}

#[async_trait]
pub trait UserOperationMiddleware: Send + Sync {
    /// Step identity reported in `AccountError::MiddlewareFailed`.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut BuildContext) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn UserOperationMiddleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: Arc<dyn UserOperationMiddleware>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step in order. The first failure aborts the build; the partially filled
    /// operation is dropped.
    pub async fn build(&self, mut ctx: BuildContext) -> Result<UserOperation, AccountError> {
        for step in &self.steps {
            tracing::debug!(step = step.name(), "running middleware");
            step.run(&mut ctx)
                .await
                .map_err(|source| AccountError::MiddlewareFailed {
                    step: step.name(),
                    source,
                })?;
        }
        Ok(ctx.op)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.step_names()).finish()
    }
}

use super::{BuildContext, UserOperationMiddleware};
use crate::contracts::EntryPoint;
use anyhow::Context;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

/// Fetches the EntryPoint nonce for `(sender, key = 0)` and attaches the deployment payload
/// only when that nonce is zero.
///
/// The decision depends solely on the observed nonce, so a build after a partially
/// successful earlier attempt still does the right thing.
pub struct AccountResolver<M> {
    entry_point: EntryPoint<M>,
    init_code: Bytes,
}

impl<M: Middleware + 'static> AccountResolver<M> {
    pub fn new(client: Arc<M>, entry_point: Address, init_code: Bytes) -> Self {
        Self {
            entry_point: EntryPoint::new(entry_point, client),
            init_code,
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> UserOperationMiddleware for AccountResolver<M> {
    fn name(&self) -> &'static str {
        "resolve-account"
    }

    async fn run(&self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        let nonce: U256 = self
            .entry_point
            .get_nonce(ctx.op.sender, U256::zero())
            .call()
            .await
            .context("entryPoint.getNonce failed")?;

        ctx.op.nonce = nonce;
        ctx.op.init_code = if nonce.is_zero() {
            self.init_code.clone()
        } else {
            Bytes::default()
        };

        tracing::debug!(
            sender = ?ctx.op.sender,
            %nonce,
            deploying = nonce.is_zero(),
            "resolved account nonce"
        );
        Ok(())
    }
}

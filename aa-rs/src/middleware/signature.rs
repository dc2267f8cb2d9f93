use super::{BuildContext, UserOperationMiddleware};
use anyhow::Context;
use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::Bytes;
use std::sync::Arc;

/// Signs the canonical user-op hash (EIP-191 personal message) with the owner key.
/// Must be the last step: the hash commits to every gas and paymaster field.
pub struct EoaSignature<S> {
    signer: Arc<S>,
}

impl<S: Signer> EoaSignature<S> {
    pub fn new(signer: Arc<S>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl<S> UserOperationMiddleware for EoaSignature<S>
where
    S: Signer + 'static,
    S::Error: 'static,
{
    fn name(&self) -> &'static str {
        "signature"
    }

    async fn run(&self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        let user_op_hash = ctx.user_op_hash();
        let sig = self
            .signer
            .sign_message(user_op_hash.as_bytes())
            .await
            .context("failed to sign userOpHash")?;

        ctx.op.signature = Bytes::from(sig.to_vec());
        Ok(())
    }
}

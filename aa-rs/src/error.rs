use crate::rpc::RpcCallError;
use ethers::types::H256;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    /// `getSenderAddress` always reverts on a canonical EntryPoint. A clean return means the target is
    /// not a canonical EntryPoint.
    #[error("getSenderAddress returned without reverting; cannot read the counterfactual sender")]
    UnexpectedSuccess,

    #[error("failed to resolve smart account address: {reason}")]
    AddressResolutionFailed { reason: String },

    #[error("middleware `{step}` failed")]
    MiddlewareFailed {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("bundler rejected user operation: {reason}")]
    SubmissionRejected { reason: String },

    #[error("user operation {user_op_hash:?} not included after {waited:?}")]
    InclusionTimeout { user_op_hash: H256, waited: Duration },

    #[error("{context}: {reason}")]
    Node { context: &'static str, reason: String },

    #[error("signer failed: {0}")]
    Signer(String),

    #[error(transparent)]
    Rpc(#[from] RpcCallError),
}

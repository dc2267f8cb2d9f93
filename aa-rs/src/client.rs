use crate::account::PendingOperation;
use crate::bundler::{BundlerApi, UserOperationReceipt};
use crate::error::AccountError;
use crate::rpc::RpcCallError;
use crate::types::UserOperation;
use ethers::providers::Middleware;
use ethers::types::{Address, H256};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct SendOptions<'a> {
    /// Build and sign, but do not submit.
    pub dry_run: bool,
    /// Observes the finalized operation before submission.
    pub on_build: Option<Box<dyn Fn(&UserOperation) + Send + Sync + 'a>>,
}

/// Submits finished operations to a bundler and tracks their inclusion.
pub struct SubmissionClient<B> {
    bundler: Arc<B>,
    entry_point: Address,
    wait_interval: Duration,
    wait_timeout: Duration,
}

impl<B: BundlerApi> SubmissionClient<B> {
    pub fn new(bundler: Arc<B>, entry_point: Address) -> Self {
        Self {
            bundler,
            entry_point,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Polling cadence and budget for `SendResult::wait`. A zero timeout polls once.
    pub fn with_wait(mut self, interval: Duration, timeout: Duration) -> Self {
        self.wait_interval = interval;
        self.wait_timeout = timeout;
        self
    }

    pub async fn send_user_operation<M: Middleware + 'static>(
        &self,
        pending: &PendingOperation<'_, M>,
        opts: SendOptions<'_>,
    ) -> Result<SendResult<B>, AccountError> {
        let account = pending.account();
        if account.entry_point() != self.entry_point {
            tracing::warn!(
                account_entry_point = ?account.entry_point(),
                client_entry_point = ?self.entry_point,
                "account and submission client disagree on the EntryPoint"
            );
        }

        let op = pending.build().await?;

        if let Some(hook) = opts.on_build.as_ref() {
            hook(&op);
        }

        if opts.dry_run {
            let user_op_hash = account.user_op_hash(&op);
            tracing::info!(user_op_hash = ?user_op_hash, "dry run: not sending user operation");
            return Ok(SendResult {
                user_op_hash,
                bundler: None,
                wait_interval: self.wait_interval,
                wait_timeout: self.wait_timeout,
            });
        }

        let user_op_hash = self
            .bundler
            .send_user_operation(&op, self.entry_point)
            .await?;
        tracing::info!(user_op_hash = ?user_op_hash, sender = ?op.sender, nonce = %op.nonce, "user operation submitted");

        Ok(SendResult {
            user_op_hash,
            bundler: Some(self.bundler.clone()),
            wait_interval: self.wait_interval,
            wait_timeout: self.wait_timeout,
        })
    }
}

/// Handle for a submitted (or dry-run) operation.
pub struct SendResult<B> {
    pub user_op_hash: H256,
    /// `None` for dry runs.
    bundler: Option<Arc<B>>,
    wait_interval: Duration,
    wait_timeout: Duration,
}

impl<B: BundlerApi> SendResult<B> {
    pub fn is_dry_run(&self) -> bool {
        self.bundler.is_none()
    }

    /// Polls for the receipt. `Ok(None)` when the polling budget runs out (or for a dry run).
    /// Transport, HTTP and JSON-RPC errors are logged and polling continues; an undecodable
    /// receipt is returned as an error.
    pub async fn wait(&self) -> Result<Option<UserOperationReceipt>, AccountError> {
        let Some(bundler) = self.bundler.as_ref() else {
            return Ok(None);
        };

        let start = Instant::now();
        loop {
            match bundler.get_user_operation_receipt(self.user_op_hash).await {
                Ok(Some(receipt)) => return Ok(Some(receipt)),
                Ok(None) => {}
                // A receipt we cannot decode will not decode on the next poll either.
                Err(e @ AccountError::Rpc(RpcCallError::Malformed(_))) => return Err(e),
                Err(e) => {
                    // transient errors are common on free-tier bundlers; keep polling
                    tracing::warn!(error = %e, "bundler receipt poll error");
                }
            }

            if start.elapsed() + self.wait_interval > self.wait_timeout {
                tracing::debug!(user_op_hash = ?self.user_op_hash, "receipt polling budget exhausted");
                return Ok(None);
            }
            tokio::time::sleep(self.wait_interval).await;
        }
    }

    /// Like `wait`, but a missing receipt is an `InclusionTimeout` error.
    pub async fn wait_for_inclusion(&self) -> Result<UserOperationReceipt, AccountError> {
        self.wait()
            .await?
            .ok_or(AccountError::InclusionTimeout {
                user_op_hash: self.user_op_hash,
                waited: self.wait_timeout,
            })
    }
}

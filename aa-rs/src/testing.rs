//! Shared fakes for unit tests.

use crate::bundler::{BundlerApi, GasEstimates, InclusionReceipt, UserOperationReceipt};
use crate::error::AccountError;
use crate::paymaster::{PaymasterApi, Sponsorship};
use crate::rpc::RpcCallError;
use crate::types::UserOperation;
use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256, U64};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) const OWNER_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub(crate) fn owner_wallet() -> LocalWallet {
    OWNER_KEY.parse().unwrap()
}

pub(crate) fn uint_word(n: u64) -> Bytes {
    Bytes::from(abi::encode(&[Token::Uint(U256::from(n))]))
}

pub(crate) fn receipt_for(user_op_hash: H256, sender: Address) -> UserOperationReceipt {
    UserOperationReceipt {
        user_op_hash,
        sender,
        nonce: U256::zero(),
        paymaster: None,
        actual_gas_cost: U256::from(1_000u64),
        actual_gas_used: U256::from(100u64),
        success: true,
        reason: None,
        receipt: InclusionReceipt {
            transaction_hash: H256::repeat_byte(0x77),
            block_number: Some(U64::from(1u64)),
        },
    }
}

pub(crate) struct FakeBundler {
    pub estimates: GasEstimates,
    pub reject_with: Option<String>,
    /// Receipt becomes available on this poll (1-based); `None` never includes.
    pub include_on_poll: Option<usize>,
    /// Every receipt poll fails with this error instead.
    pub receipt_error: Option<fn() -> RpcCallError>,
    pub polls: AtomicUsize,
    pub estimated: Mutex<Vec<UserOperation>>,
    pub sent: Mutex<Vec<UserOperation>>,
}

impl FakeBundler {
    pub(crate) fn new() -> Self {
        Self {
            estimates: GasEstimates {
                call_gas_limit: U256::from(52_000u64),
                verification_gas_limit: U256::from(310_000u64),
                pre_verification_gas: U256::from(48_000u64),
            },
            reject_with: None,
            include_on_poll: None,
            receipt_error: None,
            polls: AtomicUsize::new(0),
            estimated: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BundlerApi for FakeBundler {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        _entry_point: Address,
    ) -> Result<GasEstimates, AccountError> {
        self.estimated.lock().unwrap().push(op.clone());
        Ok(self.estimates.clone())
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        _entry_point: Address,
    ) -> Result<H256, AccountError> {
        if let Some(reason) = &self.reject_with {
            return Err(AccountError::SubmissionRejected {
                reason: reason.clone(),
            });
        }
        self.sent.lock().unwrap().push(op.clone());
        Ok(H256::repeat_byte(0x99))
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, AccountError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.receipt_error {
            return Err(err().into());
        }
        match self.include_on_poll {
            Some(n) if poll >= n => Ok(Some(receipt_for(user_op_hash, Address::zero()))),
            _ => Ok(None),
        }
    }
}

pub(crate) struct FakePaymaster {
    pub response: Sponsorship,
    pub seen_context: Mutex<Option<Value>>,
}

impl FakePaymaster {
    pub(crate) fn new(response: Sponsorship) -> Self {
        Self {
            response,
            seen_context: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PaymasterApi for FakePaymaster {
    async fn sponsor_user_operation(
        &self,
        _op: &UserOperation,
        _entry_point: Address,
        context: &Value,
    ) -> anyhow::Result<Sponsorship> {
        *self.seen_context.lock().unwrap() = Some(context.clone());
        Ok(self.response.clone())
    }
}

//! Smart account UserOperation builder.
//!
//! Construction is two-phase: `SmartAccount::init` talks to the network (chain id, counterfactual
//! address, placeholder signature) and then hands the resolved values to `SmartAccount::new`,
//! after which the account's identity never changes.

use crate::bundler::BundlerApi;
use crate::contracts::{ExecuteAndRevertCall, SmartAccountContract};
use crate::error::AccountError;
use crate::middleware::{
    AccountResolver, BuildContext, EoaSignature, EstimateUserOperationGas, GasPriceFiller,
    Pipeline, UserOperationMiddleware,
};
use crate::predictor::{self, ResolvedAccount};
use crate::types::{UserOperation, UserOperationOverrides};
use ethers::abi::AbiEncode;
use ethers::providers::Middleware;
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use std::sync::Arc;

/// `executeAndRevert` call-type tag for a plain call.
pub const CALL_OPERATION: u8 = 0;

#[derive(Debug, Clone, Copy)]
pub struct AccountParams {
    pub entry_point: Address,
    pub factory: Address,
    pub salt: U256,
    /// Fee multiplier in basis points (10_000 = 1x).
    pub gas_multiplier_bps: u64,
}

/// Owner signature over `keccak256(0xdead)`. Well-formed, so bundlers can run signature
/// validation during estimation, but never valid for a real operation.
pub async fn placeholder_signature<S: Signer>(signer: &S) -> Result<Bytes, AccountError> {
    let sig = signer
        .sign_message(keccak256([0xde, 0xad]))
        .await
        .map_err(|e| AccountError::Signer(e.to_string()))?;
    Ok(Bytes::from(sig.to_vec()))
}

#[derive(Debug)]
pub struct SmartAccount<M> {
    client: Arc<M>,
    owner: Address,
    sender: Address,
    init_code: Bytes,
    entry_point: Address,
    chain_id: u64,
    defaults: UserOperationOverrides,
    pipeline: Pipeline,
}

impl<M: Middleware + 'static> SmartAccount<M> {
    /// Resolves the counterfactual address and assembles the standard pipeline:
    /// account resolver, gas price, paymaster (or bundler estimation), signature.
    pub async fn init<S, B>(
        signer: S,
        client: Arc<M>,
        bundler: Arc<B>,
        params: AccountParams,
        paymaster: Option<Arc<dyn UserOperationMiddleware>>,
    ) -> Result<Self, AccountError>
    where
        S: Signer + 'static,
        S::Error: 'static,
        B: BundlerApi + 'static,
    {
        let chain_id = client
            .get_chainid()
            .await
            .map_err(|e| AccountError::Node {
                context: "eth_chainId failed",
                reason: e.to_string(),
            })?
            .as_u64();

        let owner = signer.address();
        let resolved = predictor::resolve_address(
            client.as_ref(),
            params.entry_point,
            params.factory,
            owner,
            params.salt,
        )
        .await?;
        let dummy_signature = placeholder_signature(&signer).await?;

        let gas_step: Arc<dyn UserOperationMiddleware> = match paymaster {
            Some(pm) => pm,
            None => Arc::new(EstimateUserOperationGas::new(bundler)),
        };

        let pipeline = Pipeline::new()
            .with(Arc::new(AccountResolver::new(
                client.clone(),
                params.entry_point,
                resolved.init_code.clone(),
            )))
            .with(Arc::new(GasPriceFiller::new(
                client.clone(),
                params.gas_multiplier_bps,
            )))
            .with(gas_step)
            .with(Arc::new(EoaSignature::new(Arc::new(signer))));

        tracing::info!(
            chain_id,
            sender = ?resolved.sender,
            steps = ?pipeline.step_names(),
            "smart account ready"
        );

        Ok(
            Self::new(client, owner, resolved, params.entry_point, chain_id, pipeline)
                .use_defaults(UserOperationOverrides {
                    signature: Some(dummy_signature),
                    ..Default::default()
                }),
        )
    }

    pub fn new(
        client: Arc<M>,
        owner: Address,
        resolved: ResolvedAccount,
        entry_point: Address,
        chain_id: u64,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            client,
            owner,
            sender: resolved.sender,
            init_code: resolved.init_code,
            entry_point,
            chain_id,
            defaults: UserOperationOverrides {
                sender: Some(resolved.sender),
                ..Default::default()
            },
            pipeline,
        }
    }

    /// Layers defaults under every operation this account builds. The sender is fixed at
    /// construction; a sender override is ignored.
    pub fn use_defaults(mut self, mut overrides: UserOperationOverrides) -> Self {
        if overrides.sender.take().is_some_and(|s| s != self.sender) {
            tracing::warn!("ignoring sender override; the smart account address is fixed");
        }
        self.defaults = self.defaults.merge(overrides);
        self
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn init_code(&self) -> &Bytes {
        &self.init_code
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn user_op_hash(&self, op: &UserOperation) -> H256 {
        op.hash(self.entry_point, self.chain_id)
    }

    /// Wraps a call in `executeAndRevert(to, value, data, Call)` so a failing inner call
    /// reverts the whole operation.
    pub fn execute(&self, to: Address, value: U256, data: Bytes) -> PendingOperation<'_, M> {
        let call_data = ExecuteAndRevertCall {
            to,
            value,
            data,
            operation: CALL_OPERATION,
        }
        .encode();

        PendingOperation {
            account: self,
            call_data: Bytes::from(call_data),
            overrides: UserOperationOverrides::default(),
        }
    }

    pub async fn is_deployed(&self) -> Result<bool, AccountError> {
        let code = self
            .client
            .get_code(self.sender, None)
            .await
            .map_err(|e| AccountError::Node {
                context: "eth_getCode failed",
                reason: e.to_string(),
            })?;
        Ok(!code.as_ref().is_empty())
    }

    /// Only meaningful once the account is deployed.
    pub async fn is_owner(&self, owner: Address) -> Result<bool, AccountError> {
        SmartAccountContract::new(self.sender, self.client.clone())
            .is_owner(owner)
            .call()
            .await
            .map_err(|e| AccountError::Node {
                context: "account.isOwner failed",
                reason: e.to_string(),
            })
    }

    /// EntryPoint the deployed account trusts.
    pub async fn account_entry_point(&self) -> Result<Address, AccountError> {
        SmartAccountContract::new(self.sender, self.client.clone())
            .entry_point()
            .call()
            .await
            .map_err(|e| AccountError::Node {
                context: "account.entryPoint failed",
                reason: e.to_string(),
            })
    }
}

/// A call packaged for one account, waiting for the pipeline.
pub struct PendingOperation<'a, M> {
    account: &'a SmartAccount<M>,
    call_data: Bytes,
    overrides: UserOperationOverrides,
}

impl<'a, M: Middleware + 'static> PendingOperation<'a, M> {
    /// Per-operation overrides on top of the account defaults (e.g. pinned fees).
    pub fn with_overrides(mut self, mut overrides: UserOperationOverrides) -> Self {
        overrides.sender = None;
        overrides.call_data = None;
        self.overrides = self.overrides.merge(overrides);
        self
    }

    pub fn account(&self) -> &'a SmartAccount<M> {
        self.account
    }

    /// Runs the full pipeline on a fresh context. Nonce, initCode and gas are re-derived from
    /// the network on every call.
    pub async fn build(&self) -> Result<UserOperation, AccountError> {
        let overrides = self
            .account
            .defaults
            .clone()
            .merge(self.overrides.clone())
            .merge(UserOperationOverrides {
                sender: Some(self.account.sender),
                call_data: Some(self.call_data.clone()),
                ..Default::default()
            });

        let ctx = BuildContext::new(overrides, self.account.entry_point, self.account.chain_id);
        self.account.pipeline.build(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{latest_block, VerifyingPaymaster};
    use crate::paymaster::Sponsorship;
    use crate::predictor::tests::{revert_response, sender_revert_data};
    use crate::testing::{owner_wallet, uint_word, FakeBundler, FakePaymaster};
    use ethers::abi::AbiDecode;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::Signature;

    const GWEI: u64 = 1_000_000_000;
    const CHAIN_ID: u64 = 84532;

    fn params() -> AccountParams {
        AccountParams {
            entry_point: "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789"
                .parse()
                .unwrap(),
            factory: Address::repeat_byte(0xbb),
            salt: U256::zero(),
            gas_multiplier_bps: 10_000,
        }
    }

    fn predicted_sender() -> Address {
        Address::repeat_byte(0x5a)
    }

    /// Queues the responses `init` consumes: eth_chainId, then getSenderAddress.
    fn queue_init(mock: &MockProvider) {
        // MockProvider answers the most recently pushed response first.
        mock.push_response(revert_response(&sender_revert_data(predicted_sender())));
        mock.push::<U256, _>(U256::from(CHAIN_ID)).unwrap();
    }

    /// Queues the responses one build consumes: getNonce, eth_maxPriorityFeePerGas, latest block.
    fn queue_build(mock: &MockProvider, nonce: u64) {
        mock.push::<serde_json::Value, _>(latest_block(U256::from(GWEI)))
            .unwrap();
        mock.push::<U256, _>(U256::from(2 * GWEI)).unwrap();
        mock.push::<Bytes, _>(uint_word(nonce)).unwrap();
    }

    async fn init_account(
        provider: Provider<MockProvider>,
        bundler: Arc<FakeBundler>,
    ) -> SmartAccount<Provider<MockProvider>> {
        SmartAccount::init(owner_wallet(), Arc::new(provider), bundler, params(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_operation_deploys_and_is_signed_by_owner() {
        let (provider, mock) = Provider::mocked();
        queue_build(&mock, 0);
        queue_init(&mock);
        let bundler = Arc::new(FakeBundler::new());

        let account = init_account(provider, bundler.clone()).await;
        assert_eq!(account.sender(), predicted_sender());
        assert_eq!(account.chain_id(), CHAIN_ID);
        assert_eq!(
            account.pipeline().step_names(),
            vec!["resolve-account", "gas-price", "estimate-gas", "signature"]
        );

        let to = Address::repeat_byte(0x01);
        let op = account
            .execute(to, U256::from(1_000u64), Bytes::default())
            .build()
            .await
            .unwrap();

        assert_eq!(op.sender, predicted_sender());
        assert_eq!(op.nonce, U256::zero());
        assert!(op.init_code.starts_with(params().factory.as_bytes()));
        assert_eq!(op.call_gas_limit, U256::from(52_000u64));
        assert_eq!(op.verification_gas_limit, U256::from(310_000u64));
        assert_eq!(op.pre_verification_gas, U256::from(48_000u64));
        assert_eq!(op.max_priority_fee_per_gas, U256::from(2_260_000_000u64));
        assert_eq!(op.max_fee_per_gas, U256::from(4_260_000_000u64));

        // Estimation ran on the placeholder signature; the final one differs and recovers
        // to the owner over the hash of the finished operation.
        let dummy = placeholder_signature(&owner_wallet()).await.unwrap();
        assert_eq!(bundler.estimated.lock().unwrap()[0].signature, dummy);
        assert_ne!(op.signature, dummy);

        let sig = Signature::try_from(op.signature.as_ref()).unwrap();
        let recovered = sig
            .recover(account.user_op_hash(&op).as_bytes())
            .unwrap();
        assert_eq!(recovered, owner_wallet().address());
    }

    #[tokio::test]
    async fn deployed_account_omits_init_code() {
        let (provider, mock) = Provider::mocked();
        queue_build(&mock, 3);
        queue_init(&mock);

        let account = init_account(provider, Arc::new(FakeBundler::new())).await;
        let op = account
            .execute(Address::repeat_byte(0x01), U256::zero(), Bytes::default())
            .build()
            .await
            .unwrap();

        assert_eq!(op.nonce, U256::from(3u64));
        assert!(op.init_code.is_empty());
        // The cached payload is still there for reference; it is just not attached.
        assert!(!account.init_code().is_empty());
    }

    #[tokio::test]
    async fn call_data_decodes_to_execute_and_revert() {
        let (provider, mock) = Provider::mocked();
        queue_build(&mock, 1);
        queue_init(&mock);

        let account = init_account(provider, Arc::new(FakeBundler::new())).await;
        let to = Address::repeat_byte(0x0c);
        let data = Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]);
        let op = account
            .execute(to, U256::from(7u64), data.clone())
            .build()
            .await
            .unwrap();

        let call = ExecuteAndRevertCall::decode(op.call_data.as_ref()).unwrap();
        assert_eq!(call.to, to);
        assert_eq!(call.value, U256::from(7u64));
        assert_eq!(call.data, data);
        assert_eq!(call.operation, CALL_OPERATION);
    }

    #[tokio::test]
    async fn rebuilding_same_state_is_identical() {
        let (provider, mock) = Provider::mocked();
        queue_build(&mock, 2);
        queue_build(&mock, 2);
        queue_init(&mock);

        let account = init_account(provider, Arc::new(FakeBundler::new())).await;
        let pending = account.execute(Address::repeat_byte(0x01), U256::zero(), Bytes::default());

        let first = pending.build().await.unwrap();
        let second = pending.build().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn pinned_fees_survive_the_pipeline() {
        let (provider, mock) = Provider::mocked();
        // Fees are pinned, so the build only reads the nonce.
        mock.push::<Bytes, _>(uint_word(1)).unwrap();
        queue_init(&mock);

        let account = init_account(provider, Arc::new(FakeBundler::new())).await;
        let op = account
            .execute(Address::repeat_byte(0x01), U256::zero(), Bytes::default())
            .with_overrides(UserOperationOverrides {
                max_fee_per_gas: Some(U256::from(9 * GWEI)),
                max_priority_fee_per_gas: Some(U256::from(GWEI)),
                ..Default::default()
            })
            .build()
            .await
            .unwrap();

        assert_eq!(op.max_fee_per_gas, U256::from(9 * GWEI));
        assert_eq!(op.max_priority_fee_per_gas, U256::from(GWEI));
    }

    #[tokio::test]
    async fn pinned_gas_limit_survives_estimation() {
        let (provider, mock) = Provider::mocked();
        queue_build(&mock, 1);
        queue_init(&mock);
        let bundler = Arc::new(FakeBundler::new());

        let account = init_account(provider, bundler.clone()).await;
        let op = account
            .execute(Address::repeat_byte(0x01), U256::zero(), Bytes::default())
            .with_overrides(UserOperationOverrides {
                call_gas_limit: Some(U256::from(900_000u64)),
                ..Default::default()
            })
            .build()
            .await
            .unwrap();

        assert_eq!(bundler.estimated.lock().unwrap().len(), 1);
        assert_eq!(op.call_gas_limit, U256::from(900_000u64));
        assert_eq!(op.verification_gas_limit, U256::from(310_000u64));
        assert_eq!(op.pre_verification_gas, U256::from(48_000u64));
    }

    #[tokio::test]
    async fn sponsored_account_uses_paymaster_instead_of_estimation() {
        let (provider, mock) = Provider::mocked();
        queue_build(&mock, 0);
        queue_init(&mock);
        let bundler = Arc::new(FakeBundler::new());
        let paymaster: Arc<dyn UserOperationMiddleware> = Arc::new(VerifyingPaymaster::new(
            Arc::new(FakePaymaster::new(Sponsorship {
                paymaster_and_data: Bytes::from(vec![0xcc; 20]),
                call_gas_limit: Some(U256::from(60_000u64)),
                verification_gas_limit: Some(U256::from(250_000u64)),
                pre_verification_gas: Some(U256::from(50_000u64)),
            })),
            serde_json::json!({ "type": "payg" }),
        ));

        let account = SmartAccount::init(
            owner_wallet(),
            Arc::new(provider),
            bundler.clone(),
            params(),
            Some(paymaster),
        )
        .await
        .unwrap();

        assert_eq!(
            account.pipeline().step_names(),
            vec!["resolve-account", "gas-price", "paymaster", "signature"]
        );

        let op = account
            .execute(Address::repeat_byte(0x01), U256::zero(), Bytes::default())
            .build()
            .await
            .unwrap();

        assert_eq!(op.paymaster_and_data, Bytes::from(vec![0xcc; 20]));
        assert_eq!(op.call_gas_limit, U256::from(60_000u64));
        assert_eq!(op.verification_gas_limit, U256::from(250_000u64));
        assert_eq!(op.pre_verification_gas, U256::from(50_000u64));
        assert!(bundler.estimated.lock().unwrap().is_empty());

        // The signature commits to the sponsored fields.
        let sig = Signature::try_from(op.signature.as_ref()).unwrap();
        let recovered = sig.recover(account.user_op_hash(&op).as_bytes()).unwrap();
        assert_eq!(recovered, owner_wallet().address());
    }

    #[tokio::test]
    async fn failing_step_returns_no_operation() {
        let (provider, mock) = Provider::mocked();
        // Nothing queued for the build: getNonce fails.
        queue_init(&mock);

        let account = init_account(provider, Arc::new(FakeBundler::new())).await;
        let err = account
            .execute(Address::repeat_byte(0x01), U256::zero(), Bytes::default())
            .build()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AccountError::MiddlewareFailed {
                step: "resolve-account",
                ..
            }
        ));
    }

    #[test]
    fn sender_cannot_be_overridden() {
        let (provider, _mock) = Provider::mocked();
        let account = SmartAccount::new(
            Arc::new(provider),
            owner_wallet().address(),
            ResolvedAccount {
                sender: predicted_sender(),
                init_code: Bytes::default(),
            },
            params().entry_point,
            CHAIN_ID,
            Pipeline::new(),
        )
        .use_defaults(UserOperationOverrides {
            sender: Some(Address::repeat_byte(0x99)),
            call_gas_limit: Some(U256::from(1u64)),
            ..Default::default()
        });

        assert_eq!(account.sender(), predicted_sender());
        assert_eq!(account.defaults.sender, Some(predicted_sender()));
        assert_eq!(account.defaults.call_gas_limit, Some(U256::from(1u64)));
    }

    #[tokio::test]
    async fn deployment_and_owner_reads() {
        let (provider, mock) = Provider::mocked();
        let account = SmartAccount::new(
            Arc::new(provider),
            owner_wallet().address(),
            ResolvedAccount {
                sender: predicted_sender(),
                init_code: Bytes::default(),
            },
            params().entry_point,
            CHAIN_ID,
            Pipeline::new(),
        );

        mock.push::<Bytes, _>(uint_word(1)).unwrap();
        mock.push::<Bytes, _>(Bytes::from(vec![0x60, 0x80])).unwrap();

        assert!(account.is_deployed().await.unwrap());
        assert!(account.is_owner(owner_wallet().address()).await.unwrap());
    }
}

//! Counterfactual smart account address resolution.
//!
//! The EntryPoint exposes no view for "what address would this initCode deploy to". Instead,
//! `getSenderAddress(initCode)` runs the factory inside the EntryPoint and always reverts with
//! `SenderAddressResult(address sender)`. We `eth_call` it and read the address out of the
//! revert data.

use crate::contracts::{CreateAccountCall, GetSenderAddressCall};
use crate::error::AccountError;
use ethers::abi::AbiEncode;
use ethers::providers::{Middleware, MiddlewareError};
use ethers::types::{Address, Bytes, TransactionRequest, U256};

/// `bytes4(keccak256("SenderAddressResult(address)"))`
pub const SENDER_ADDRESS_RESULT_SELECTOR: [u8; 4] = [0x6c, 0xa7, 0xb8, 0x06];

/// Outcome of a non-state-changing call. `data` is the return data when `success` is set
/// and the revert data otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCall {
    pub success: bool,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub sender: Address,
    /// `factory ‖ createAccount(owner, salt)`; attached to the first operation only.
    pub init_code: Bytes,
}

pub fn init_code(factory: Address, owner: Address, salt: U256) -> Bytes {
    let create_calldata = CreateAccountCall { owner, salt }.encode();
    let mut v = Vec::with_capacity(20 + create_calldata.len());
    v.extend_from_slice(factory.as_bytes());
    v.extend_from_slice(&create_calldata);
    Bytes::from(v)
}

pub async fn simulate_get_sender_address<M: Middleware>(
    client: &M,
    entry_point: Address,
    init_code: Bytes,
) -> Result<SimulatedCall, AccountError> {
    let tx = TransactionRequest::new()
        .to(entry_point)
        .data(GetSenderAddressCall { init_code }.encode());

    match client.call(&tx.into(), None).await {
        Ok(data) => Ok(SimulatedCall {
            success: true,
            data,
        }),
        Err(err) => match err.as_error_response().and_then(|e| e.as_revert_data()) {
            Some(data) => Ok(SimulatedCall {
                success: false,
                data,
            }),
            None => Err(AccountError::AddressResolutionFailed {
                reason: format!("getSenderAddress eth_call failed: {err}"),
            }),
        },
    }
}

pub fn decode_sender_address(revert: &[u8]) -> Result<Address, AccountError> {
    let (selector, args) = match revert {
        [a, b, c, d, rest @ ..] => ([*a, *b, *c, *d], rest),
        _ => {
            return Err(AccountError::AddressResolutionFailed {
                reason: format!("revert data too short ({} bytes)", revert.len()),
            })
        }
    };

    if selector != SENDER_ADDRESS_RESULT_SELECTOR {
        return Err(AccountError::AddressResolutionFailed {
            reason: format!(
                "unexpected revert selector 0x{} (want SenderAddressResult)",
                hex::encode(selector)
            ),
        });
    }

    // One ABI word: 12 zero bytes of padding, then the address.
    let word: &[u8; 32] = args.try_into().map_err(|_| AccountError::AddressResolutionFailed {
        reason: format!(
            "malformed SenderAddressResult: expected one 32-byte word, got {} bytes",
            args.len()
        ),
    })?;
    if word[..12].iter().any(|b| *b != 0) {
        return Err(AccountError::AddressResolutionFailed {
            reason: "malformed SenderAddressResult: address word has dirty padding".to_string(),
        });
    }
    Ok(Address::from_slice(&word[12..]))
}

pub fn sender_from_simulation(call: &SimulatedCall) -> Result<Address, AccountError> {
    if call.success {
        return Err(AccountError::UnexpectedSuccess);
    }
    decode_sender_address(&call.data)
}

pub async fn resolve_address<M: Middleware>(
    client: &M,
    entry_point: Address,
    factory: Address,
    owner: Address,
    salt: U256,
) -> Result<ResolvedAccount, AccountError> {
    let init_code = init_code(factory, owner, salt);
    let call = simulate_get_sender_address(client, entry_point, init_code.clone()).await?;
    let sender = sender_from_simulation(&call)?;

    tracing::info!(owner = ?owner, factory = ?factory, sender = ?sender, "resolved smart account address");

    Ok(ResolvedAccount { sender, init_code })
}

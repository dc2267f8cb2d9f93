use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

pub const DEFAULT_CALL_GAS_LIMIT: u64 = 35_000;
pub const DEFAULT_VERIFICATION_GAS_LIMIT: u64 = 70_000;
pub const DEFAULT_PRE_VERIFICATION_GAS: u64 = 21_000;

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
///
/// Note: EntryPoint v0.7 uses a *different* packed struct layout.
///
/// `paymaster_and_data` stays empty for self-funded operations and is filled by the
/// paymaster middleware otherwise. `signature` holds the placeholder signature until the
/// signing middleware runs as the last pipeline step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl Default for UserOperation {
    fn default() -> Self {
        Self {
            sender: Address::zero(),
            nonce: U256::zero(),
            init_code: Bytes::default(),
            call_data: Bytes::default(),
            call_gas_limit: U256::from(DEFAULT_CALL_GAS_LIMIT),
            verification_gas_limit: U256::from(DEFAULT_VERIFICATION_GAS_LIMIT),
            pre_verification_gas: U256::from(DEFAULT_PRE_VERIFICATION_GAS),
            max_fee_per_gas: U256::zero(),
            max_priority_fee_per_gas: U256::zero(),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        }
    }
}

impl UserOperation {
    /// Seeds an operation from the hardcoded defaults, then applies every field the
    /// overrides set.
    pub fn with_overrides(overrides: &UserOperationOverrides) -> Self {
        let d = Self::default();
        Self {
            sender: overrides.sender.unwrap_or(d.sender),
            nonce: overrides.nonce.unwrap_or(d.nonce),
            init_code: overrides.init_code.clone().unwrap_or(d.init_code),
            call_data: overrides.call_data.clone().unwrap_or(d.call_data),
            call_gas_limit: overrides.call_gas_limit.unwrap_or(d.call_gas_limit),
            verification_gas_limit: overrides
                .verification_gas_limit
                .unwrap_or(d.verification_gas_limit),
            pre_verification_gas: overrides
                .pre_verification_gas
                .unwrap_or(d.pre_verification_gas),
            max_fee_per_gas: overrides.max_fee_per_gas.unwrap_or(d.max_fee_per_gas),
            max_priority_fee_per_gas: overrides
                .max_priority_fee_per_gas
                .unwrap_or(d.max_priority_fee_per_gas),
            paymaster_and_data: overrides
                .paymaster_and_data
                .clone()
                .unwrap_or(d.paymaster_and_data),
            signature: overrides.signature.clone().unwrap_or(d.signature),
        }
    }

    /// ABI encoding of every field except the signature, with the dynamic byte fields
    /// replaced by their keccak256 (EntryPoint v0.6 `UserOperationLib.pack`).
    pub fn pack_without_signature(&self) -> Bytes {
        let encoded = encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ]);
        Bytes::from(encoded)
    }

    /// Same value `EntryPoint.getUserOpHash` returns on-chain.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let op_hash = keccak256(self.pack_without_signature());
        H256::from(keccak256(encode(&[
            Token::FixedBytes(op_hash.to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ])))
    }
}

/// Caller-supplied values layered over the defaults. `None` means "not set".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperationOverrides {
    pub sender: Option<Address>,
    pub nonce: Option<U256>,
    pub init_code: Option<Bytes>,
    pub call_data: Option<Bytes>,
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub paymaster_and_data: Option<Bytes>,
    pub signature: Option<Bytes>,
}

impl UserOperationOverrides {
    /// Shallow, per-field merge: fields set in `newer` win, everything else is kept.
    pub fn merge(self, newer: UserOperationOverrides) -> Self {
        Self {
            sender: newer.sender.or(self.sender),
            nonce: newer.nonce.or(self.nonce),
            init_code: newer.init_code.or(self.init_code),
            call_data: newer.call_data.or(self.call_data),
            call_gas_limit: newer.call_gas_limit.or(self.call_gas_limit),
            verification_gas_limit: newer.verification_gas_limit.or(self.verification_gas_limit),
            pre_verification_gas: newer.pre_verification_gas.or(self.pre_verification_gas),
            max_fee_per_gas: newer.max_fee_per_gas.or(self.max_fee_per_gas),
            max_priority_fee_per_gas: newer
                .max_priority_fee_per_gas
                .or(self.max_priority_fee_per_gas),
            paymaster_and_data: newer.paymaster_and_data.or(self.paymaster_and_data),
            signature: newer.signature.or(self.signature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_every_gas_limit() {
        let op = UserOperation::with_overrides(&UserOperationOverrides::default());
        assert_eq!(op.call_gas_limit, U256::from(DEFAULT_CALL_GAS_LIMIT));
        assert_eq!(op.verification_gas_limit, U256::from(DEFAULT_VERIFICATION_GAS_LIMIT));
        assert_eq!(op.pre_verification_gas, U256::from(DEFAULT_PRE_VERIFICATION_GAS));
        assert!(op.init_code.is_empty());
        assert!(op.paymaster_and_data.is_empty());
    }

    #[test]
    fn override_does_not_reset_siblings() {
        let first = UserOperationOverrides {
            call_gas_limit: Some(U256::from(1_000_000u64)),
            max_fee_per_gas: Some(U256::from(7u64)),
            ..Default::default()
        };
        let second = UserOperationOverrides {
            max_fee_per_gas: Some(U256::from(9u64)),
            ..Default::default()
        };

        let merged = first.merge(second);
        let op = UserOperation::with_overrides(&merged);

        assert_eq!(op.call_gas_limit, U256::from(1_000_000u64));
        assert_eq!(op.max_fee_per_gas, U256::from(9u64));
        assert_eq!(op.verification_gas_limit, U256::from(DEFAULT_VERIFICATION_GAS_LIMIT));
    }

    // Vector from a Goerli v0.6 SimpleAccount deployment.
    #[test]
    fn hash_matches_entry_point_get_user_op_hash() {
        let op = UserOperation {
            sender: "0x921f125a92930cabb2969ad9323261d3a2a784e7".parse().unwrap(),
            nonce: U256::zero(),
            init_code: "0x9406cc6185a346906296840746125a0e449764545fbfb9cf00000000000000000000000043378ff8c70109ee4dbe85af34428ab0615ebd230000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_data: "0xb61d27f6000000000000000000000000a02bfd0ba5d182226627a933333ba92d1a60e234000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_gas_limit: 530_100.into(),
            verification_gas_limit: 500_624.into(),
            pre_verification_gas: 104_056.into(),
            max_fee_per_gas: 1_695_000_030u64.into(),
            max_priority_fee_per_gas: 1_695_000_000u64.into(),
            paymaster_and_data: Bytes::default(),
            signature: "0x5ae30c60c3ad36192f6efc38b3ac41d70d2c08fd8efc5a2f2457bfc17a4deea72fb6b40081dc8e05da85a5f05b977d15a9583fbe0d1766357d2553ad233ddd2f1c".parse().unwrap(),
        };
        let entry_point: Address = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap();

        assert_eq!(
            op.hash(entry_point, 5),
            "0x7bca0c9a2ffbd23c25c7d5e1df0520142c0c39454cee778c3201eef6a8a27f06"
                .parse::<H256>()
                .unwrap()
        );
    }

    #[test]
    fn hash_ignores_signature_but_commits_to_gas() {
        let entry_point = Address::repeat_byte(0x11);
        let op = UserOperation::default();

        let mut resigned = op.clone();
        resigned.signature = Bytes::from(vec![1u8; 65]);
        assert_eq!(op.hash(entry_point, 1), resigned.hash(entry_point, 1));

        let mut regassed = op.clone();
        regassed.call_gas_limit = U256::from(1u64);
        assert_ne!(op.hash(entry_point, 1), regassed.hash(entry_point, 1));
    }
}

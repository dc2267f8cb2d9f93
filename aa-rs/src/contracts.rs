use ethers::contract::abigen;

// Minimal EntryPoint v0.6 surface used by the builder.
//
// `getSenderAddress` always reverts; its `SenderAddressResult(address)` revert data is decoded
// by hand in `predictor.rs`, so the error is not declared here.
abigen!(
    EntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) view returns (uint256 nonce)
        function getSenderAddress(bytes initCode)
    ]"#
);

abigen!(
    SmartAccountFactory,
    r#"[
        function createAccount(address owner, uint256 salt) returns (address ret)
    ]"#
);

// `operation` is the call-type tag: 0 == Call, 1 == DelegateCall.
abigen!(
    SmartAccountContract,
    r#"[
        function executeAndRevert(address to, uint256 value, bytes data, uint8 operation)
        function isOwner(address owner) view returns (bool)
        function entryPoint() view returns (address)
    ]"#
);

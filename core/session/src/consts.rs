use alloy_primitives::{address, Address};

/// Chain id of the local development network (hardhat node with the mock coprocessor).
pub const LOCAL_CHAIN_ID: u64 = 31337;
/// Chain id of the public test network served by the relayer.
pub const REMOTE_CHAIN_ID: u64 = 11155111;

/// Gateway chain id the simulated local engine is constructed against.
/// This is deliberately not the chain id of the local network.
pub const SIMULATED_GATEWAY_CHAIN_ID: u64 = 55815;
pub const REMOTE_GATEWAY_CHAIN_ID: u64 = 55815;

/// Validity window of a user decryption authorization.
pub const USER_DECRYPT_DURATION_DAYS: u64 = 10;
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

// The amount of bytes in a ciphertext handle
pub const HANDLE_LENGTH: usize = 32;
// The amount of bytes in a recoverable ECDSA signature (r, s, v)
pub const SIG_SIZE: usize = 65;
pub const HANDLE_VERSION: u8 = 0;

pub const LOCAL_RPC_URL: &str = "http://localhost:8545";
pub const LOCAL_VERIFYING_CONTRACT_DECRYPTION: Address =
    address!("5ffdaAB0373E62E2ea2944776209aEf29E631A64");
pub const LOCAL_VERIFYING_CONTRACT_INPUT_VERIFICATION: Address =
    address!("812b06e1CDCE800494b79fFE4f925A504a9A9810");

pub const REMOTE_RELAYER_URL: &str = "https://relayer.testnet.zama.cloud";
pub const REMOTE_ACL_ADDRESS: Address = address!("687820221192C5B662b25367F70076A37bc79b6c");
pub const REMOTE_KMS_VERIFIER_ADDRESS: Address =
    address!("1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC");
pub const REMOTE_INPUT_VERIFIER_ADDRESS: Address =
    address!("bc91f3daD1A5F19F8390c400196e58073B6a0BC4");
pub const REMOTE_VERIFYING_CONTRACT_DECRYPTION: Address =
    address!("b6E160B1ff80D67Bfe90A85eE06Ce0A2613607D1");
pub const REMOTE_VERIFYING_CONTRACT_INPUT_VERIFICATION: Address =
    address!("7048C39f048125eDa9d678AEbaDfB22F7900a29F");

/// BalanceValidator deployment on the local network.
pub const LOCAL_BALANCE_VALIDATOR_ADDRESS: Address =
    address!("610178dA211FEF7D417bC0e6FeD39F05609AD788");

/// JSON-RPC method the local node exposes its verifier contract addresses under.
pub const RELAYER_METADATA_METHOD: &str = "fhevm_relayer_metadata";

// Size of the CRS slot requested from the relayer for 32-bit inputs
pub const CRS_BITS: &str = "2048";

pub const SAFE_SER_SIZE_LIMIT: u64 = 1024 * 1024 * 1024 * 2;

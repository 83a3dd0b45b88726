//! Encrypted session and decryption authorization manager.
//!
//! This library establishes a cipher context bound to the active network, encrypts
//! scalar inputs into ciphertext handles with a validity proof, and runs the
//! user-authorized decryption protocol of the local development network and of
//! the remote relayer network.
use std::fmt;
use std::panic::Location;

pub mod conf;
pub mod consts;
pub mod context;
pub mod contract;
pub mod decryption;
pub mod encryptor;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod network;
pub mod signer;
pub mod simulation;
pub mod solidity_types;

pub mod cryptography {
    pub mod error;
    pub mod hybrid_ml_kem;
}

pub mod engine {
    mod base;
    pub mod coprocessor;
    pub mod local;
    pub mod metadata;
    pub mod relayer;

    pub use base::{
        CipherEngine, DefaultEngineFactory, EngineFactory, HandleContractPair, RawEncryptedInput,
    };
}

pub use context::{BootstrapStatus, CipherContext};
pub use contract::{BalanceValidatorClient, ContractTransport};
pub use decryption::{
    AuthorizationGrant, DecryptPath, DecryptedResult, DecryptionAuthorizer, DecryptionOutcome,
    ResultType,
};
pub use encryptor::EncryptedInput;
pub use error::{SessionError, SessionResult};
pub use handle::Handle;
pub use lifecycle::SessionLifecycle;
pub use network::{NetworkMode, NetworkProfile, NetworkResolver};
pub use signer::{LocalWalletSigner, SigningProvider};

/// Truncate s to a maximum of 128 chars.
pub(crate) fn top_n_chars(s: String) -> String {
    match s.char_indices().nth(128) {
        Some((end, _)) => s[..end].to_string(),
        None => s,
    }
}

#[track_caller]
pub(crate) fn anyhow_error_and_log<S: AsRef<str> + fmt::Display>(msg: S) -> anyhow::Error {
    tracing::error!("Error in {}: {}", Location::caller(), msg);
    anyhow::anyhow!("Error in {}: {}", Location::caller(), msg)
}

/// Seconds since the unix epoch.
pub(crate) fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

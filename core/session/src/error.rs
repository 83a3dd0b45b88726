use crate::consts::{LOCAL_CHAIN_ID, REMOTE_CHAIN_ID};
use std::panic::Location;
use thiserror::Error;

/// Errors reported by the session to its caller.
///
/// None of these are retried inside the session. [SessionError::is_retryable] tells the
/// caller whether repeating the same action can succeed without user intervention.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "Unsupported network (chain id {chain_id}). Please switch to the local network ({}) or the test network ({}).",
        LOCAL_CHAIN_ID,
        REMOTE_CHAIN_ID
    )]
    NotSupported { chain_id: u64 },

    #[error("No active network. Connect a wallet before using the session.")]
    NoActiveNetwork,

    #[error("Cipher engine initialization failed on chain {chain_id}: {reason}. {}", init_hint(.chain_id))]
    EngineInitFailed { chain_id: u64, reason: String },

    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("Signing rejected: {reason}")]
    SigningRejected { reason: String },

    #[error("Decryption transport failed: {reason}")]
    DecryptTransportFailed { reason: String },

    #[error("Network changed from chain {from} to chain {to} while the operation was in flight")]
    NetworkChanged { from: u64, to: u64 },

    #[error("Contract not deployed on chain {chain_id}")]
    ContractNotDeployed { chain_id: u64 },

    #[error("Contract call failed: {0}")]
    ContractCall(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn init_hint(chain_id: &u64) -> &'static str {
    match *chain_id {
        LOCAL_CHAIN_ID => {
            "Please ensure the local node is running with the fhevm plugin loaded, restart it and retry."
        }
        REMOTE_CHAIN_ID => "Please check the relayer configuration and connectivity, then retry.",
        _ => "",
    }
}

impl SessionError {
    /// Logs the error together with the location it was raised at.
    #[track_caller]
    pub(crate) fn logged(self) -> Self {
        tracing::error!("Error in {}: {}", Location::caller(), self);
        self
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::EngineInitFailed { .. }
            | SessionError::EncryptionFailed { .. }
            | SessionError::NetworkChanged { .. } => true,
            SessionError::NotSupported { .. }
            | SessionError::NoActiveNetwork
            | SessionError::SigningRejected { .. }
            | SessionError::DecryptTransportFailed { .. }
            | SessionError::ContractNotDeployed { .. }
            | SessionError::ContractCall(_)
            | SessionError::InvalidConfig(_) => false,
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

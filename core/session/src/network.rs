use crate::conf::{LocalConfig, RelayerConfig, SessionConfig};
use crate::consts::{LOCAL_CHAIN_ID, REMOTE_CHAIN_ID};
use crate::error::{SessionError, SessionResult};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Operating regime of a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum NetworkMode {
    /// Local development network with a simulated coprocessor.
    Local,
    /// Public test network reached through the relayer.
    Remote,
}

/// The closed table of supported chains.
pub fn mode_for_chain(chain_id: u64) -> Option<NetworkMode> {
    match chain_id {
        LOCAL_CHAIN_ID => Some(NetworkMode::Local),
        REMOTE_CHAIN_ID => Some(NetworkMode::Remote),
        _ => None,
    }
}

/// Addresses of the verifier contracts an engine needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierAddresses {
    pub acl: Address,
    pub input_verifier: Address,
    pub kms_verifier: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeConfig {
    Local(LocalConfig),
    Remote(RelayerConfig),
}

/// Immutable description of a supported network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkProfile {
    chain_id: u64,
    config: ModeConfig,
}

impl NetworkProfile {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn mode(&self) -> NetworkMode {
        match self.config {
            ModeConfig::Local(_) => NetworkMode::Local,
            ModeConfig::Remote(_) => NetworkMode::Remote,
        }
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    /// Chain id the signing domains are bound to.
    pub fn gateway_chain_id(&self) -> u64 {
        match &self.config {
            ModeConfig::Local(c) => c.gateway_chain_id,
            ModeConfig::Remote(c) => c.gateway_chain_id,
        }
    }

    pub fn verifying_contract_decryption(&self) -> Address {
        match &self.config {
            ModeConfig::Local(c) => c.verifying_contract_decryption,
            ModeConfig::Remote(c) => c.verifying_contract_decryption,
        }
    }

    pub fn verifying_contract_input_verification(&self) -> Address {
        match &self.config {
            ModeConfig::Local(c) => c.verifying_contract_input_verification,
            ModeConfig::Remote(c) => c.verifying_contract_input_verification,
        }
    }
}

/// Maps a chain id to its [NetworkProfile].
#[derive(Clone, Debug, Default)]
pub struct NetworkResolver {
    local: LocalConfig,
    remote: RelayerConfig,
}

impl NetworkResolver {
    pub fn new(conf: &SessionConfig) -> Self {
        Self {
            local: conf.local.clone(),
            remote: conf.remote.clone(),
        }
    }

    /// Resolve the profile of a chain. Pure: same input, same output.
    pub fn resolve(&self, chain_id: u64) -> SessionResult<NetworkProfile> {
        let config = match mode_for_chain(chain_id) {
            Some(NetworkMode::Local) => ModeConfig::Local(self.local.clone()),
            Some(NetworkMode::Remote) => ModeConfig::Remote(self.remote.clone()),
            None => return Err(SessionError::NotSupported { chain_id }),
        };
        Ok(NetworkProfile { chain_id, config })
    }
}

use crate::consts::*;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationError};

/// Session configuration.
///
/// Every section has defaults matching the deployed networks, so an empty
/// configuration file is valid.
#[derive(Deserialize, Serialize, Clone, Debug, Default, Validate, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    #[validate(nested)]
    pub local: LocalConfig,
    #[serde(default)]
    #[validate(nested)]
    pub remote: RelayerConfig,
    #[serde(default)]
    pub contracts: ContractRegistry,
}

/// Settings of the local development network.
#[derive(Deserialize, Serialize, Clone, Debug, Validate, PartialEq, Eq)]
#[serde(default)]
pub struct LocalConfig {
    /// JSON-RPC endpoint of the local node, also used for the metadata query.
    #[validate(url)]
    pub rpc_url: String,
    #[validate(range(min = 1))]
    pub gateway_chain_id: u64,
    pub verifying_contract_decryption: Address,
    pub verifying_contract_input_verification: Address,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            rpc_url: LOCAL_RPC_URL.to_string(),
            gateway_chain_id: SIMULATED_GATEWAY_CHAIN_ID,
            verifying_contract_decryption: LOCAL_VERIFYING_CONTRACT_DECRYPTION,
            verifying_contract_input_verification: LOCAL_VERIFYING_CONTRACT_INPUT_VERIFICATION,
        }
    }
}

/// Settings of the relayer-backed network.
#[derive(Deserialize, Serialize, Clone, Debug, Validate, PartialEq, Eq)]
#[serde(default)]
#[validate(schema(function = validate_relayer_conf))]
pub struct RelayerConfig {
    #[validate(url)]
    pub relayer_url: String,
    #[validate(range(min = 1))]
    pub gateway_chain_id: u64,
    pub acl_address: Address,
    pub kms_verifier_address: Address,
    pub input_verifier_address: Address,
    pub verifying_contract_decryption: Address,
    pub verifying_contract_input_verification: Address,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            relayer_url: REMOTE_RELAYER_URL.to_string(),
            gateway_chain_id: REMOTE_GATEWAY_CHAIN_ID,
            acl_address: REMOTE_ACL_ADDRESS,
            kms_verifier_address: REMOTE_KMS_VERIFIER_ADDRESS,
            input_verifier_address: REMOTE_INPUT_VERIFIER_ADDRESS,
            verifying_contract_decryption: REMOTE_VERIFYING_CONTRACT_DECRYPTION,
            verifying_contract_input_verification: REMOTE_VERIFYING_CONTRACT_INPUT_VERIFICATION,
        }
    }
}

fn validate_relayer_conf(conf: &RelayerConfig) -> Result<(), ValidationError> {
    let required = [
        ("acl_address", conf.acl_address),
        ("kms_verifier_address", conf.kms_verifier_address),
        ("input_verifier_address", conf.input_verifier_address),
        (
            "verifying_contract_decryption",
            conf.verifying_contract_decryption,
        ),
        (
            "verifying_contract_input_verification",
            conf.verifying_contract_input_verification,
        ),
    ];
    for (name, addr) in required {
        if addr == Address::ZERO {
            return Err(ValidationError::new("Zero Address")
                .with_message(format!("{name} must not be the zero address").into()));
        }
    }
    Ok(())
}

/// Deployed application contracts, keyed by the decimal chain id.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ContractRegistry {
    pub balance_validator: HashMap<String, Address>,
}

impl Default for ContractRegistry {
    fn default() -> Self {
        let mut balance_validator = HashMap::new();
        balance_validator.insert(
            LOCAL_CHAIN_ID.to_string(),
            LOCAL_BALANCE_VALIDATOR_ADDRESS,
        );
        // not deployed yet
        balance_validator.insert(REMOTE_CHAIN_ID.to_string(), Address::ZERO);
        Self { balance_validator }
    }
}

impl ContractRegistry {
    /// Address of the BalanceValidator on the given chain.
    ///
    /// Unknown chains map to the zero address. This lookup is only used for display and
    /// for addressing calls; it never decides which network mode is used.
    pub fn balance_validator_address(&self, chain_id: u64) -> Address {
        self.balance_validator
            .get(&chain_id.to_string())
            .copied()
            .unwrap_or(Address::ZERO)
    }

    pub fn is_deployed(&self, chain_id: u64) -> bool {
        self.balance_validator_address(chain_id) != Address::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let conf = SessionConfig::default();
        conf.validate().unwrap();
        assert_eq!(conf.local.gateway_chain_id, SIMULATED_GATEWAY_CHAIN_ID);
        assert_ne!(conf.local.gateway_chain_id, LOCAL_CHAIN_ID);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let conf: SessionConfig = serde_json::from_str(
            r#"{ "local": { "rpc_url": "http://127.0.0.1:9545" } }"#,
        )
        .unwrap();
        assert_eq!(conf.local.rpc_url, "http://127.0.0.1:9545");
        assert_eq!(
            conf.local.verifying_contract_decryption,
            LOCAL_VERIFYING_CONTRACT_DECRYPTION
        );
        assert_eq!(conf.remote, RelayerConfig::default());
    }

    #[test]
    fn test_invalid_urls_and_addresses() {
        let mut conf = SessionConfig::default();
        conf.local.rpc_url = "not a url".to_string();
        assert!(conf.validate().is_err());

        let mut conf = SessionConfig::default();
        conf.remote.acl_address = Address::ZERO;
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_contract_registry() {
        let registry = ContractRegistry::default();
        assert!(registry.is_deployed(LOCAL_CHAIN_ID));
        assert_eq!(
            registry.balance_validator_address(LOCAL_CHAIN_ID),
            LOCAL_BALANCE_VALIDATOR_ADDRESS
        );
        assert!(!registry.is_deployed(REMOTE_CHAIN_ID));
        assert!(!registry.is_deployed(1));
        assert_eq!(registry.balance_validator_address(1), Address::ZERO);
    }
}

//! Solidity types used in EIP-712 signing and contract calls.
//! WARNING: the EIP-712 structures must match the verifying contracts field for field.

use alloy_primitives::{Address, U256};
use alloy_sol_types::Eip712Domain;

// Authorization signed by the user before a user decryption.
alloy_sol_types::sol! {
    #[derive(Debug)]
    struct UserDecryptRequestVerification {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
        bytes extraData;
    }
}

// Attestation of the coprocessor over a verified encrypted input.
alloy_sol_types::sol! {
    #[derive(Debug)]
    struct CiphertextVerification {
        bytes32[] ctHandles;
        address userAddress;
        address contractAddress;
        uint256 contractChainId;
        bytes extraData;
    }
}

alloy_sol_types::sol! {
    #[derive(Debug)]
    interface IBalanceValidator {
        event BalanceSet(address indexed user, uint256 timestamp);
        event BalanceCleared(address indexed user, uint256 timestamp);
        event ValidationRequested(address indexed user, uint256 timestamp);

        function setBalance(bytes32 encryptedBalance, bytes inputProof) external;
        function clearBalance(bytes32 encryptedZero, bytes inputProof) external;
        function validateTransfer(bytes32 encryptedAmount, bytes inputProof) external returns (bytes32 result);
        function hasBalance(address user) external view returns (bool);
        function getEncryptedBalance(address user) external view returns (bytes32);
    }
}

pub(crate) const DECRYPTION_DOMAIN_NAME: &str = "Decryption";
pub(crate) const INPUT_VERIFICATION_DOMAIN_NAME: &str = "InputVerification";
const DOMAIN_VERSION: &str = "1";

fn domain(name: &'static str, chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some(name.into()),
        Some(DOMAIN_VERSION.into()),
        Some(U256::from(chain_id)),
        Some(verifying_contract),
        None,
    )
}

/// Domain user decryption authorizations are signed under.
pub fn decryption_domain(gateway_chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    domain(DECRYPTION_DOMAIN_NAME, gateway_chain_id, verifying_contract)
}

/// Domain coprocessor input attestations are signed under.
pub fn input_verification_domain(
    gateway_chain_id: u64,
    verifying_contract: Address,
) -> Eip712Domain {
    domain(
        INPUT_VERIFICATION_DOMAIN_NAME,
        gateway_chain_id,
        verifying_contract,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{LOCAL_VERIFYING_CONTRACT_DECRYPTION, SIMULATED_GATEWAY_CHAIN_ID};
    use alloy_sol_types::{SolCall, SolStruct};

    #[test]
    fn test_signing_hash_depends_on_domain() {
        let msg = UserDecryptRequestVerification {
            publicKey: vec![1, 2, 3].into(),
            contractAddresses: vec![Address::repeat_byte(7)],
            startTimestamp: U256::from(1_700_000_000u64),
            durationDays: U256::from(10),
            extraData: Default::default(),
        };
        let d1 = decryption_domain(SIMULATED_GATEWAY_CHAIN_ID, LOCAL_VERIFYING_CONTRACT_DECRYPTION);
        let d2 = decryption_domain(31337, LOCAL_VERIFYING_CONTRACT_DECRYPTION);
        assert_ne!(msg.eip712_signing_hash(&d1), msg.eip712_signing_hash(&d2));
        assert_eq!(d1.chain_id, Some(U256::from(SIMULATED_GATEWAY_CHAIN_ID)));
    }

    #[test]
    fn test_call_selectors_are_stable() {
        assert_eq!(
            IBalanceValidator::setBalanceCall::SIGNATURE,
            "setBalance(bytes32,bytes)"
        );
        assert_eq!(
            IBalanceValidator::validateTransferCall::SIGNATURE,
            "validateTransfer(bytes32,bytes)"
        );
        assert_eq!(
            IBalanceValidator::hasBalanceCall::SIGNATURE,
            "hasBalance(address)"
        );
    }
}

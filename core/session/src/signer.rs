use crate::solidity_types::UserDecryptRequestVerification;
use alloy_primitives::{Address, Signature};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolStruct};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// The wallet the session acts on behalf of.
///
/// Signing may require user interaction and may be declined, in which case
/// an error is returned.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SigningProvider: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_typed_data(
        &self,
        domain: &Eip712Domain,
        message: &UserDecryptRequestVerification,
    ) -> anyhow::Result<Signature>;
}

/// Signing provider backed by an in-memory secp256k1 key.
#[derive(Clone, Debug)]
pub struct LocalWalletSigner {
    inner: PrivateKeySigner,
}

impl LocalWalletSigner {
    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }

    pub fn from_private_key_hex(key: &str) -> anyhow::Result<Self> {
        let inner: PrivateKeySigner = key.trim_start_matches("0x").parse()?;
        Ok(Self { inner })
    }
}

impl From<PrivateKeySigner> for LocalWalletSigner {
    fn from(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SigningProvider for LocalWalletSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_typed_data(
        &self,
        domain: &Eip712Domain,
        message: &UserDecryptRequestVerification,
    ) -> anyhow::Result<Signature> {
        let message_hash = message.eip712_signing_hash(domain);
        tracing::debug!("User decrypt EIP-712 message hash: {:?}", message_hash);
        Ok(self.inner.sign_hash(&message_hash).await?)
    }
}

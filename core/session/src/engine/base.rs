use super::coprocessor::MockCoprocessor;
use super::local::LocalEngine;
use super::metadata::{NetworkMetadataSource, RpcMetadataSource};
use super::relayer::{HttpRelayer, KeyMaterial, RelayerEngine, RelayerTransport};
use crate::conf::SessionConfig;
use crate::decryption::AuthorizationGrant;
use crate::handle::Handle;
use crate::network::{ModeConfig, NetworkMode, NetworkProfile};
use alloy_primitives::{Address, U256};
use alloy_sol_types::Eip712Domain;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Output of an engine before handle normalization.
#[derive(Clone, Debug, Default)]
pub struct RawEncryptedInput {
    pub handles: Vec<Vec<u8>>,
    pub input_proof: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleContractPair {
    pub handle: Handle,
    pub contract_address: Address,
}

/// Encryption and decryption backend of one network.
///
/// The session only ever talks to this trait; [LocalEngine] and [RelayerEngine]
/// are the two implementations.
#[async_trait]
pub trait CipherEngine: Send + Sync {
    fn mode(&self) -> NetworkMode;

    /// One-time preparation, e.g. downloading key material. Must be idempotent.
    async fn bootstrap(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn encrypt_u32(
        &self,
        contract_address: Address,
        user_address: Address,
        value: u32,
    ) -> anyhow::Result<RawEncryptedInput>;

    /// Domain user decryption authorizations have to be signed under.
    fn eip712_domain(&self) -> Eip712Domain;

    /// Decrypt under a signed authorization. Handles the engine does not know
    /// may be absent from the returned map.
    async fn user_decrypt(
        &self,
        pairs: &[HandleContractPair],
        grant: &AuthorizationGrant,
        user_address: Address,
    ) -> anyhow::Result<HashMap<Handle, U256>>;

    /// Provider-level decryption keyed by the signer identity, without an authorization.
    async fn direct_decrypt(
        &self,
        handle: Handle,
        _contract_address: Address,
        _user_address: Address,
    ) -> anyhow::Result<U256> {
        Err(anyhow::anyhow!(
            "direct decryption of {handle} is not available on the {} network",
            self.mode()
        ))
    }
}

/// Builds the engine of a resolved network.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, profile: &NetworkProfile) -> anyhow::Result<Arc<dyn CipherEngine>>;
}

/// Factory for the two supported networks.
pub struct DefaultEngineFactory {
    metadata: Arc<dyn NetworkMetadataSource>,
    coprocessor: Arc<MockCoprocessor>,
    relayer: Option<Arc<dyn RelayerTransport>>,
    // key material is shared by every relayer engine of the process
    keys: Arc<OnceCell<Arc<KeyMaterial>>>,
}

impl DefaultEngineFactory {
    pub fn new(conf: &SessionConfig) -> Self {
        Self {
            metadata: Arc::new(RpcMetadataSource::new(&conf.local.rpc_url)),
            coprocessor: Arc::new(MockCoprocessor::new()),
            relayer: None,
            keys: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_metadata_source(mut self, metadata: Arc<dyn NetworkMetadataSource>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_coprocessor(mut self, coprocessor: Arc<MockCoprocessor>) -> Self {
        self.coprocessor = coprocessor;
        self
    }

    pub fn with_relayer_transport(mut self, relayer: Arc<dyn RelayerTransport>) -> Self {
        self.relayer = Some(relayer);
        self
    }

    pub fn coprocessor(&self) -> Arc<MockCoprocessor> {
        Arc::clone(&self.coprocessor)
    }
}

#[async_trait]
impl EngineFactory for DefaultEngineFactory {
    async fn build(&self, profile: &NetworkProfile) -> anyhow::Result<Arc<dyn CipherEngine>> {
        match profile.config() {
            ModeConfig::Local(conf) => {
                let verifiers = self.metadata.relayer_metadata().await?.verifiers()?;
                tracing::info!(
                    "Local network verifiers: ACL {}, input verifier {}, KMS verifier {}",
                    verifiers.acl,
                    verifiers.input_verifier,
                    verifiers.kms_verifier
                );
                Ok(Arc::new(LocalEngine::new(
                    profile.chain_id(),
                    conf,
                    Arc::clone(&self.coprocessor),
                )))
            }
            ModeConfig::Remote(conf) => {
                let transport = match &self.relayer {
                    Some(t) => Arc::clone(t),
                    None => {
                        Arc::new(HttpRelayer::new(&conf.relayer_url)) as Arc<dyn RelayerTransport>
                    }
                };
                Ok(Arc::new(RelayerEngine::new(
                    profile.chain_id(),
                    conf.clone(),
                    transport,
                    Arc::clone(&self.keys),
                )))
            }
        }
    }
}

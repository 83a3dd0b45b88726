use crate::conf::SessionConfig;
use crate::context::{BootstrapStatus, CipherContext, ContextManager};
use crate::decryption::{DecryptionAuthorizer, DecryptionOutcome, ResultType};
use crate::encryptor::{self, EncryptedInput};
use crate::engine::{DefaultEngineFactory, EngineFactory};
use crate::error::{SessionError, SessionResult};
use crate::handle::Handle;
use crate::network::NetworkResolver;
use crate::signer::SigningProvider;
use alloy_primitives::Address;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Entry point of the library: follows the active network of the wallet and
/// serves encryption and decryption against a context bound to it.
pub struct SessionLifecycle {
    resolver: NetworkResolver,
    contexts: ContextManager,
    active_chain: RwLock<Option<u64>>,
}

impl SessionLifecycle {
    pub fn new(conf: &SessionConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            resolver: NetworkResolver::new(conf),
            contexts: ContextManager::new(factory),
            active_chain: RwLock::new(None),
        }
    }

    /// Session using the real network backends.
    pub fn from_config(conf: &SessionConfig) -> Self {
        Self::new(conf, Arc::new(DefaultEngineFactory::new(conf)))
    }

    pub fn resolver(&self) -> &NetworkResolver {
        &self.resolver
    }

    pub async fn active_chain_id(&self) -> Option<u64> {
        *self.active_chain.read().await
    }

    /// The wallet reported a (possibly identical) network. The current context is
    /// dropped in every case and rebuilt on the next operation.
    pub async fn on_network_changed(&self, chain_id: u64) {
        let mut active = self.active_chain.write().await;
        tracing::info!("Network changed from {:?} to {}", *active, chain_id);
        *active = Some(chain_id);
        self.contexts.invalidate().await;
    }

    pub async fn disconnect(&self) {
        let mut active = self.active_chain.write().await;
        *active = None;
        self.contexts.invalidate().await;
    }

    pub async fn bootstrap_status(&self) -> BootstrapStatus {
        self.contexts.bootstrap_status().await
    }

    /// Context of the active network, created on first use.
    pub async fn context(&self) -> SessionResult<Arc<CipherContext>> {
        let chain_id = self
            .active_chain_id()
            .await
            .ok_or(SessionError::NoActiveNetwork)?;
        let profile = self.resolver.resolve(chain_id).map_err(|e| e.logged())?;
        let ctx = self.contexts.get_or_create(&profile).await?;
        self.ensure_current(&ctx).await?;
        Ok(ctx)
    }

    /// Fail when `ctx` no longer belongs to the active network.
    pub async fn ensure_current(&self, ctx: &CipherContext) -> SessionResult<()> {
        let active = self.active_chain_id().await;
        match active {
            Some(chain_id) if chain_id == ctx.chain_id() && self.contexts.is_current(ctx) => Ok(()),
            Some(chain_id) => Err(SessionError::NetworkChanged {
                from: ctx.chain_id(),
                to: chain_id,
            }
            .logged()),
            None => Err(SessionError::NoActiveNetwork),
        }
    }

    pub async fn encrypt(
        &self,
        contract_address: Address,
        user_address: Address,
        value: u32,
    ) -> SessionResult<EncryptedInput> {
        let ctx = self.context().await?;
        let input = encryptor::encrypt(&ctx, contract_address, user_address, value).await?;
        self.ensure_current(&ctx).await?;
        Ok(input)
    }

    pub async fn decrypt(
        &self,
        handle: Handle,
        contract_address: Address,
        result_type: ResultType,
        signer: Arc<dyn SigningProvider>,
    ) -> SessionResult<DecryptionOutcome> {
        let ctx = self.context().await?;
        let outcome = DecryptionAuthorizer::new(Arc::clone(&ctx), signer)
            .authorize(handle, contract_address, result_type)
            .await?;
        self.ensure_current(&ctx).await?;
        Ok(outcome)
    }
}

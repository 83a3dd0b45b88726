use crate::engine::{CipherEngine, EngineFactory};
use crate::error::{SessionError, SessionResult};
use crate::network::{NetworkMode, NetworkProfile};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Outcome of the one-time engine bootstrap of the remote network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapStatus {
    NotAttempted,
    Ready,
    /// Bootstrap failed; the session continues and engines fetch what they need lazily.
    Degraded { reason: String },
}

/// Engine handle bound to exactly one network.
///
/// A context is never mutated. A network switch supersedes it with a new one
/// carrying a higher generation.
pub struct CipherContext {
    profile: NetworkProfile,
    engine: Arc<dyn CipherEngine>,
    generation: u64,
}

impl CipherContext {
    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn chain_id(&self) -> u64 {
        self.profile.chain_id()
    }

    pub fn mode(&self) -> NetworkMode {
        self.profile.mode()
    }

    pub fn engine(&self) -> &Arc<dyn CipherEngine> {
        &self.engine
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("chain_id", &self.chain_id())
            .field("mode", &self.mode())
            .field("generation", &self.generation)
            .finish()
    }
}

struct ContextSlot {
    chain_id: u64,
    generation: u64,
    cell: OnceCell<Arc<CipherContext>>,
}

/// Owns the single active [CipherContext] of the process.
///
/// Construction is single-flight: concurrent callers for the same network wait
/// for one build and all receive the same context.
pub struct ContextManager {
    factory: Arc<dyn EngineFactory>,
    slot: Mutex<Option<Arc<ContextSlot>>>,
    generation: AtomicU64,
    bootstrap: Mutex<BootstrapStatus>,
}

impl ContextManager {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            bootstrap: Mutex::new(BootstrapStatus::NotAttempted),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, ctx: &CipherContext) -> bool {
        ctx.generation == self.current_generation()
    }

    pub async fn bootstrap_status(&self) -> BootstrapStatus {
        self.bootstrap.lock().await.clone()
    }

    /// Clear the cached context. Contexts handed out before are no longer current.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = slot.take() {
            tracing::info!(
                "Invalidated cipher context of chain {} (generation {} -> {})",
                old.chain_id,
                old.generation,
                generation
            );
        }
    }

    pub async fn get_or_create(
        &self,
        profile: &NetworkProfile,
    ) -> SessionResult<Arc<CipherContext>> {
        let slot = {
            let mut guard = self.slot.lock().await;
            match guard.as_ref() {
                Some(slot) if slot.chain_id == profile.chain_id() => Arc::clone(slot),
                _ => {
                    let slot = Arc::new(ContextSlot {
                        chain_id: profile.chain_id(),
                        generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
                        cell: OnceCell::new(),
                    });
                    *guard = Some(Arc::clone(&slot));
                    slot
                }
            }
        };
        let ctx = slot
            .cell
            .get_or_try_init(|| self.build(profile, slot.generation))
            .await?;
        Ok(Arc::clone(ctx))
    }

    async fn build(
        &self,
        profile: &NetworkProfile,
        generation: u64,
    ) -> SessionResult<Arc<CipherContext>> {
        tracing::info!(
            "Creating cipher context for chain {} ({} mode, generation {})",
            profile.chain_id(),
            profile.mode(),
            generation
        );
        let engine = self.factory.build(profile).await.map_err(|e| {
            SessionError::EngineInitFailed {
                chain_id: profile.chain_id(),
                reason: e.to_string(),
            }
            .logged()
        })?;
        if profile.mode() == NetworkMode::Remote {
            self.bootstrap_once(engine.as_ref()).await;
        }
        Ok(Arc::new(CipherContext {
            profile: profile.clone(),
            engine,
            generation,
        }))
    }

    async fn bootstrap_once(&self, engine: &dyn CipherEngine) {
        let mut status = self.bootstrap.lock().await;
        if *status != BootstrapStatus::NotAttempted {
            return;
        }
        *status = match engine.bootstrap().await {
            Ok(()) => {
                tracing::info!("Engine bootstrap completed");
                BootstrapStatus::Ready
            }
            Err(e) => {
                tracing::warn!("Engine bootstrap failed, continuing without bootstrap: {e}");
                BootstrapStatus::Degraded {
                    reason: e.to_string(),
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{LOCAL_CHAIN_ID, REMOTE_CHAIN_ID};
    use crate::engine::{HandleContractPair, RawEncryptedInput};
    use crate::decryption::AuthorizationGrant;
    use crate::handle::Handle;
    use crate::network::NetworkResolver;
    use alloy_primitives::{Address, U256};
    use alloy_sol_types::Eip712Domain;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    struct NullEngine {
        mode: NetworkMode,
        bootstrap_ok: bool,
    }

    #[async_trait]
    impl CipherEngine for NullEngine {
        fn mode(&self) -> NetworkMode {
            self.mode
        }

        async fn bootstrap(&self) -> anyhow::Result<()> {
            if self.bootstrap_ok {
                Ok(())
            } else {
                Err(anyhow::anyhow!("key download timed out"))
            }
        }

        async fn encrypt_u32(
            &self,
            _: Address,
            _: Address,
            _: u32,
        ) -> anyhow::Result<RawEncryptedInput> {
            Ok(RawEncryptedInput::default())
        }

        fn eip712_domain(&self) -> Eip712Domain {
            Eip712Domain::default()
        }

        async fn user_decrypt(
            &self,
            _: &[HandleContractPair],
            _: &AuthorizationGrant,
            _: Address,
        ) -> anyhow::Result<HashMap<Handle, U256>> {
            Ok(HashMap::new())
        }
    }

    struct CountingFactory {
        builds: AtomicUsize,
        fail: bool,
        bootstrap_ok: bool,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                builds: AtomicUsize::new(0),
                fail: false,
                bootstrap_ok: true,
            }
        }
    }

    #[async_trait]
    impl EngineFactory for CountingFactory {
        async fn build(&self, profile: &NetworkProfile) -> anyhow::Result<Arc<dyn CipherEngine>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                anyhow::bail!("metadata is incomplete");
            }
            Ok(Arc::new(NullEngine {
                mode: profile.mode(),
                bootstrap_ok: self.bootstrap_ok,
            }))
        }
    }

    fn profile(chain_id: u64) -> NetworkProfile {
        NetworkResolver::default().resolve(chain_id).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let factory = Arc::new(CountingFactory::new());
        let manager = ContextManager::new(factory.clone());
        let a = manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await.unwrap();
        let b = manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert!(manager.is_current(&a));
    }

    #[tokio::test]
    async fn test_invalidate_supersedes() {
        let factory = Arc::new(CountingFactory::new());
        let manager = ContextManager::new(factory.clone());
        let a = manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await.unwrap();
        manager.invalidate().await;
        assert!(!manager.is_current(&a));
        let b = manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(b.generation() > a.generation());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_chain_supersedes_without_invalidate() {
        let manager = ContextManager::new(Arc::new(CountingFactory::new()));
        let a = manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await.unwrap();
        let b = manager.get_or_create(&profile(REMOTE_CHAIN_ID)).await.unwrap();
        assert_eq!(b.chain_id(), REMOTE_CHAIN_ID);
        assert!(!manager.is_current(&a));
        assert!(manager.is_current(&b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_is_single_flight() {
        let factory = Arc::new(CountingFactory::new());
        let manager = Arc::new(ContextManager::new(factory.clone()));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await })
            })
            .collect();
        let mut contexts = Vec::new();
        for t in tasks {
            contexts.push(t.await.unwrap().unwrap());
        }
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert!(contexts.iter().all(|c| Arc::ptr_eq(c, &contexts[0])));
    }

    #[tokio::test]
    async fn test_build_failure_is_engine_init_failed_and_retryable() {
        let factory = Arc::new(CountingFactory {
            fail: true,
            ..CountingFactory::new()
        });
        let manager = ContextManager::new(factory.clone());
        let err = manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::EngineInitFailed { chain_id, .. } if chain_id == LOCAL_CHAIN_ID
        ));
        assert!(err.to_string().contains("restart"));
        // nothing is cached, the next call tries again
        let _ = manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await;
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_remote_bootstrap_soft_failure() {
        let factory = Arc::new(CountingFactory {
            bootstrap_ok: false,
            ..CountingFactory::new()
        });
        let manager = ContextManager::new(factory);
        assert_eq!(manager.bootstrap_status().await, BootstrapStatus::NotAttempted);
        let ctx = manager.get_or_create(&profile(REMOTE_CHAIN_ID)).await.unwrap();
        assert_eq!(ctx.mode(), NetworkMode::Remote);
        assert!(matches!(
            manager.bootstrap_status().await,
            BootstrapStatus::Degraded { reason } if reason.contains("timed out")
        ));
        assert!(logs_contain("continuing without bootstrap"));

        // attempted once per process
        manager.invalidate().await;
        manager.get_or_create(&profile(REMOTE_CHAIN_ID)).await.unwrap();
        assert!(matches!(
            manager.bootstrap_status().await,
            BootstrapStatus::Degraded { .. }
        ));
    }

    #[tokio::test]
    async fn test_local_skips_bootstrap() {
        let manager = ContextManager::new(Arc::new(CountingFactory::new()));
        manager.get_or_create(&profile(LOCAL_CHAIN_ID)).await.unwrap();
        assert_eq!(manager.bootstrap_status().await, BootstrapStatus::NotAttempted);
        manager.get_or_create(&profile(REMOTE_CHAIN_ID)).await.unwrap();
        assert_eq!(manager.bootstrap_status().await, BootstrapStatus::Ready);
    }
}

#![allow(dead_code)]

use alloy_primitives::{Address, U256};
use alloy_sol_types::Eip712Domain;
use async_trait::async_trait;
use fhevm_session::conf::SessionConfig;
use fhevm_session::consts::{LOCAL_BALANCE_VALIDATOR_ADDRESS, LOCAL_CHAIN_ID};
use fhevm_session::engine::metadata::StaticMetadataSource;
use fhevm_session::engine::{
    CipherEngine, DefaultEngineFactory, EngineFactory, HandleContractPair, RawEncryptedInput,
};
use fhevm_session::network::NetworkProfile;
use fhevm_session::simulation::SimulatedBalanceValidator;
use fhevm_session::solidity_types::decryption_domain;
use fhevm_session::{AuthorizationGrant, Handle, NetworkMode, SessionLifecycle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A session on the local network with an in-process BalanceValidator.
pub struct LocalSetup {
    pub session: Arc<SessionLifecycle>,
    pub contract: Arc<SimulatedBalanceValidator>,
    pub conf: SessionConfig,
}

pub async fn local_setup() -> LocalSetup {
    let conf = SessionConfig::default();
    let factory = DefaultEngineFactory::new(&conf)
        .with_metadata_source(Arc::new(StaticMetadataSource::simulated()));
    let contract = Arc::new(SimulatedBalanceValidator::new(
        LOCAL_BALANCE_VALIDATOR_ADDRESS,
        LOCAL_CHAIN_ID,
        &conf.local,
        factory.coprocessor(),
    ));
    let session = Arc::new(SessionLifecycle::new(&conf, Arc::new(factory)));
    session.on_network_changed(LOCAL_CHAIN_ID).await;
    LocalSetup {
        session,
        contract,
        conf,
    }
}

/// Scriptable engine for lifecycle tests.
pub struct StubEngine {
    pub mode: NetworkMode,
    pub handles: Vec<Vec<u8>>,
    pub input_proof: Vec<u8>,
    pub encrypt_error: Option<String>,
    pub direct: Option<U256>,
    pub decrypted: HashMap<Handle, U256>,
    /// When set, `encrypt_u32` signals `started` and waits on `release`.
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl StubEngine {
    pub fn new(mode: NetworkMode) -> Self {
        Self {
            mode,
            handles: vec![vec![1u8; 32]],
            input_proof: vec![1, 2, 3],
            encrypt_error: None,
            direct: None,
            decrypted: HashMap::new(),
            gate: None,
        }
    }
}

#[async_trait]
impl CipherEngine for StubEngine {
    fn mode(&self) -> NetworkMode {
        self.mode
    }

    async fn encrypt_u32(
        &self,
        _contract_address: Address,
        _user_address: Address,
        _value: u32,
    ) -> anyhow::Result<RawEncryptedInput> {
        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }
        if let Some(e) = &self.encrypt_error {
            anyhow::bail!("{e}");
        }
        Ok(RawEncryptedInput {
            handles: self.handles.clone(),
            input_proof: self.input_proof.clone(),
        })
    }

    fn eip712_domain(&self) -> Eip712Domain {
        decryption_domain(55815, Address::repeat_byte(0xdd))
    }

    async fn user_decrypt(
        &self,
        _pairs: &[HandleContractPair],
        _grant: &AuthorizationGrant,
        _user_address: Address,
    ) -> anyhow::Result<HashMap<Handle, U256>> {
        Ok(self.decrypted.clone())
    }

    async fn direct_decrypt(
        &self,
        handle: Handle,
        _contract_address: Address,
        _user_address: Address,
    ) -> anyhow::Result<U256> {
        self.direct
            .ok_or_else(|| anyhow::anyhow!("no provider-level decryption for {handle}"))
    }
}

/// Hands out one prepared engine per build and counts the builds.
pub struct StubFactory {
    pub builds: AtomicUsize,
    make: Box<dyn Fn(&NetworkProfile) -> StubEngine + Send + Sync>,
}

impl StubFactory {
    pub fn new(make: impl Fn(&NetworkProfile) -> StubEngine + Send + Sync + 'static) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            make: Box::new(make),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for StubFactory {
    async fn build(&self, profile: &NetworkProfile) -> anyhow::Result<Arc<dyn CipherEngine>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new((self.make)(profile)))
    }
}

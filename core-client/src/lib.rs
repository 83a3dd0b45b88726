//! Core Client library
//!
//! Drives an encrypted session from the command line: network resolution, input
//! encryption, user decryption, and a full BalanceValidator round trip against the
//! simulated local network.
use alloy_primitives::Address;
use clap::{Parser, Subcommand};
use fhevm_session::conf::SessionConfig;
use fhevm_session::consts::{LOCAL_BALANCE_VALIDATOR_ADDRESS, LOCAL_CHAIN_ID};
use fhevm_session::engine::metadata::StaticMetadataSource;
use fhevm_session::engine::DefaultEngineFactory;
use fhevm_session::handle::parse_handle;
use fhevm_session::simulation::SimulatedBalanceValidator;
use fhevm_session::{
    BalanceValidatorClient, LocalWalletSigner, NetworkResolver, ResultType, SessionLifecycle,
    SigningProvider,
};
use observability::conf::{Settings, Tracing};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

const ENV_PREFIX: &str = "CORE_CLIENT";

#[derive(Deserialize, Serialize, Clone, Validate, Default)]
#[serde(default)]
pub struct CoreClientConfig {
    #[validate(nested)]
    pub session: SessionConfig,
    /// Hex-encoded secp256k1 key of the wallet. A random wallet is used when absent.
    pub private_key: Option<String>,
    pub tracing: Option<Tracing>,
}

impl std::fmt::Debug for CoreClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreClientConfig")
            .field("session", &self.session)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("tracing", &self.tracing)
            .finish()
    }
}

impl CoreClientConfig {
    pub fn tracing_settings(&self) -> Tracing {
        self.tracing
            .clone()
            .unwrap_or_else(|| Tracing::builder().service_name("core_client").build())
    }
}

/// Load the client configuration from the layered sources and validate it.
pub fn load_config(path: Option<&str>) -> anyhow::Result<CoreClientConfig> {
    let conf: CoreClientConfig = match path {
        Some(path) => Settings::builder()
            .path(path)
            .env_prefix(ENV_PREFIX)
            .build()
            .init_conf()?,
        None => Settings::builder().env_prefix(ENV_PREFIX).build().init_conf()?,
    };
    conf.validate()?;
    Ok(conf)
}

#[derive(Debug, Parser, Clone)]
pub struct ResolveParameters {
    #[clap(long, short = 'c')]
    pub chain_id: u64,
}

#[derive(Debug, Parser, Clone)]
pub struct EncryptParameters {
    /// Contract the input is encrypted for. Defaults to the BalanceValidator of the chain.
    #[clap(long)]
    pub contract: Option<Address>,
    #[clap(long, short = 'v')]
    pub value: u32,
}

#[derive(Debug, Parser, Clone)]
pub struct UserDecryptParameters {
    /// Hex-encoded ciphertext handle
    #[clap(long)]
    pub handle: String,
    #[clap(long)]
    pub contract: Option<Address>,
    #[clap(long, short = 't', default_value = "ebool")]
    pub result_type: ResultType,
}

#[derive(Debug, Parser, Clone)]
pub struct DemoParameters {
    #[clap(long, short = 'b')]
    pub balance: u32,
    #[clap(long, short = 't')]
    pub transfer: u32,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CCCommand {
    Resolve(ResolveParameters),
    Encrypt(EncryptParameters),
    UserDecrypt(UserDecryptParameters),
    Demo(DemoParameters),
}

#[derive(Debug, Parser, Clone)]
pub struct CmdConfig {
    /// Path to the configuration file
    #[clap(long, short = 'f')]
    pub file_conf: Option<String>,
    /// The command to execute
    #[clap(subcommand)]
    pub command: CCCommand,
    /// Whether to print logs or not
    #[clap(long, short = 'l')]
    pub logs: bool,
    /// Chain id the wallet is connected to
    #[clap(long, short = 'c', default_value_t = LOCAL_CHAIN_ID)]
    pub chain_id: u64,
    /// Hex-encoded wallet key, overriding the configuration file
    #[clap(long)]
    pub private_key: Option<String>,
    /// Serve the local network from the in-process coprocessor instead of a node
    #[clap(long, short = 's', default_value_t = false)]
    pub simulated: bool,
}

/// Result line of a command: a message and the value it reports.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub message: String,
    pub value: serde_json::Value,
}

impl CommandOutput {
    fn new(message: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            value,
        }
    }
}

struct Backend {
    session: Arc<SessionLifecycle>,
    contract: Option<Arc<SimulatedBalanceValidator>>,
}

fn backend(conf: &SessionConfig, simulated: bool) -> Backend {
    if !simulated {
        return Backend {
            session: Arc::new(SessionLifecycle::from_config(conf)),
            contract: None,
        };
    }
    let factory = DefaultEngineFactory::new(conf)
        .with_metadata_source(Arc::new(StaticMetadataSource::simulated()));
    let contract = Arc::new(SimulatedBalanceValidator::new(
        LOCAL_BALANCE_VALIDATOR_ADDRESS,
        LOCAL_CHAIN_ID,
        &conf.local,
        factory.coprocessor(),
    ));
    Backend {
        session: Arc::new(SessionLifecycle::new(conf, Arc::new(factory))),
        contract: Some(contract),
    }
}

fn signer(cmd_config: &CmdConfig, conf: &CoreClientConfig) -> anyhow::Result<LocalWalletSigner> {
    match cmd_config.private_key.as_ref().or(conf.private_key.as_ref()) {
        Some(key) => LocalWalletSigner::from_private_key_hex(key),
        None => {
            let signer = LocalWalletSigner::random();
            tracing::warn!(
                "No private key configured, using the random wallet {}",
                signer.address()
            );
            Ok(signer)
        }
    }
}

fn contract_or_default(
    conf: &CoreClientConfig,
    chain_id: u64,
    contract: Option<Address>,
) -> anyhow::Result<Address> {
    if let Some(contract) = contract {
        return Ok(contract);
    }
    if !conf.session.contracts.is_deployed(chain_id) {
        anyhow::bail!("no BalanceValidator deployed on chain {chain_id}, pass --contract");
    }
    Ok(conf.session.contracts.balance_validator_address(chain_id))
}

pub async fn execute_cmd(
    cmd_config: &CmdConfig,
    conf: &CoreClientConfig,
) -> anyhow::Result<Vec<CommandOutput>> {
    let client_timer_start = tokio::time::Instant::now();
    tracing::info!("Starting command: {:?}", cmd_config.command);
    let signer = Arc::new(signer(cmd_config, conf)?);

    let res = match &cmd_config.command {
        CCCommand::Resolve(params) => {
            let profile = NetworkResolver::new(&conf.session).resolve(params.chain_id)?;
            vec![CommandOutput::new(
                "Resolved network",
                json!({
                    "chain_id": profile.chain_id(),
                    "mode": profile.mode().to_string(),
                    "gateway_chain_id": profile.gateway_chain_id(),
                    "verifying_contract_decryption": profile.verifying_contract_decryption().to_string(),
                    "verifying_contract_input_verification": profile.verifying_contract_input_verification().to_string(),
                    "balance_validator": conf.session.contracts.balance_validator_address(profile.chain_id()).to_string(),
                }),
            )]
        }
        CCCommand::Encrypt(params) => {
            let backend = backend(&conf.session, cmd_config.simulated);
            backend
                .session
                .on_network_changed(cmd_config.chain_id)
                .await;
            let contract = contract_or_default(conf, cmd_config.chain_id, params.contract)?;
            let input = backend
                .session
                .encrypt(contract, signer.address(), params.value)
                .await?;
            let handles: Vec<String> = input.handles.iter().map(|h| h.to_string()).collect();
            vec![CommandOutput::new(
                "Encrypted input",
                json!({
                    "handles": handles,
                    "input_proof": input.input_proof_hex(),
                }),
            )]
        }
        CCCommand::UserDecrypt(params) => {
            let backend = backend(&conf.session, cmd_config.simulated);
            backend
                .session
                .on_network_changed(cmd_config.chain_id)
                .await;
            let contract = contract_or_default(conf, cmd_config.chain_id, params.contract)?;
            let handle = parse_handle(&params.handle)?;
            let outcome = backend
                .session
                .decrypt(handle, contract, params.result_type, signer)
                .await?;
            vec![CommandOutput::new(
                "Decrypted value",
                json!({
                    "handle": handle.to_string(),
                    "result": outcome.result.to_string(),
                    "path": outcome.path.to_string(),
                }),
            )]
        }
        CCCommand::Demo(params) => do_demo(conf, signer, params).await?,
    };

    tracing::info!(
        "Command {:?} took {:?}",
        cmd_config.command,
        client_timer_start.elapsed()
    );
    Ok(res)
}

/// Set a balance and validate a transfer on the simulated local network.
async fn do_demo(
    conf: &CoreClientConfig,
    signer: Arc<LocalWalletSigner>,
    params: &DemoParameters,
) -> anyhow::Result<Vec<CommandOutput>> {
    let backend = backend(&conf.session, true);
    let Some(contract) = backend.contract else {
        anyhow::bail!("the demo needs the simulated BalanceValidator");
    };
    backend.session.on_network_changed(LOCAL_CHAIN_ID).await;
    let client = BalanceValidatorClient::new(
        Arc::clone(&backend.session),
        contract,
        signer.clone(),
        conf.session.contracts.clone(),
    );

    let tx = client.set_balance(params.balance).await?;
    let mut res = vec![CommandOutput::new(
        "Balance set",
        json!({ "user": signer.address().to_string(), "tx": tx.to_string() }),
    )];
    let sufficient = client.validate_transfer(params.transfer).await?;
    res.push(CommandOutput::new(
        "Transfer validated",
        json!({ "transfer": params.transfer, "sufficient": sufficient }),
    ));
    Ok(res)
}

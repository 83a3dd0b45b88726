//! Authorized decryption of a single result handle.
//!
//! Every request runs through `Idle -> KeypairGenerated -> GrantSigned ->
//! DecryptRequested -> Decrypted | Failed`. The keypair and the grant belong to
//! exactly one request.
use crate::consts::{SECONDS_PER_DAY, USER_DECRYPT_DURATION_DAYS};
use crate::context::CipherContext;
use crate::cryptography::hybrid_ml_kem::DecryptionKeypair;
use crate::engine::HandleContractPair;
use crate::error::{SessionError, SessionResult};
use crate::handle::Handle;
use crate::network::NetworkMode;
use crate::signer::SigningProvider;
use crate::solidity_types::UserDecryptRequestVerification;
use crate::unix_timestamp;
use alloy_primitives::{Address, Signature, U256};
use alloy_sol_types::{Eip712Domain, SolStruct};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{Display, EnumString};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum DecryptionState {
    Idle,
    KeypairGenerated,
    GrantSigned,
    DecryptRequested,
    Decrypted,
    Failed,
}

/// Expected plaintext shape, chosen by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Ebool,
    Euint32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecryptedResult {
    Integer(u32),
    Boolean(bool),
}

impl std::fmt::Display for DecryptedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecryptedResult::Integer(v) => write!(f, "{v}"),
            DecryptedResult::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// How the plaintext was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum DecryptPath {
    /// Provider-level decryption of the local network.
    Direct,
    /// Decryption under a signed [AuthorizationGrant].
    SignedGrant,
}

/// User-signed permission to decrypt handles of the listed contracts
/// for a limited time, addressed to an ephemeral keypair.
#[derive(Debug)]
pub struct AuthorizationGrant {
    keypair: DecryptionKeypair,
    contract_addresses: Vec<Address>,
    issued_at: u64,
    validity_duration_days: u64,
    user_address: Address,
    signature: Signature,
}

impl AuthorizationGrant {
    /// Ask `signer` to sign a grant starting at `issued_at` (unix seconds).
    pub async fn sign(
        signer: &dyn SigningProvider,
        domain: &Eip712Domain,
        keypair: DecryptionKeypair,
        contract_addresses: Vec<Address>,
        issued_at: u64,
    ) -> SessionResult<Self> {
        let message = verification_message(
            &keypair,
            &contract_addresses,
            issued_at,
            USER_DECRYPT_DURATION_DAYS,
        );
        let signature = signer
            .sign_typed_data(domain, &message)
            .await
            .map_err(|e| SessionError::SigningRejected {
                reason: e.to_string(),
            })?;
        Ok(Self {
            keypair,
            contract_addresses,
            issued_at,
            validity_duration_days: USER_DECRYPT_DURATION_DAYS,
            user_address: signer.address(),
            signature,
        })
    }

    pub fn verification_message(&self) -> UserDecryptRequestVerification {
        verification_message(
            &self.keypair,
            &self.contract_addresses,
            self.issued_at,
            self.validity_duration_days,
        )
    }

    /// Address that signed the grant under `domain`.
    pub fn recover_signer(&self, domain: &Eip712Domain) -> anyhow::Result<Address> {
        let hash = self.verification_message().eip712_signing_hash(domain);
        Ok(self.signature.recover_address_from_prehash(&hash)?)
    }

    pub fn keypair(&self) -> &DecryptionKeypair {
        &self.keypair
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.keypair.public_key_bytes()
    }

    pub fn contract_addresses(&self) -> &[Address] {
        &self.contract_addresses
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn validity_duration_days(&self) -> u64 {
        self.validity_duration_days
    }

    pub fn user_address(&self) -> Address {
        self.user_address
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The 65-byte signature as hex, without the 0x prefix.
    pub fn signature_hex(&self) -> String {
        hex::encode(self.signature.as_bytes())
    }

    pub fn expires_at(&self) -> u64 {
        self.issued_at
            .saturating_add(self.validity_duration_days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        self.issued_at <= now && now < self.expires_at()
    }

    pub fn covers(&self, contract_address: &Address) -> bool {
        self.contract_addresses.contains(contract_address)
    }
}

fn verification_message(
    keypair: &DecryptionKeypair,
    contract_addresses: &[Address],
    issued_at: u64,
    duration_days: u64,
) -> UserDecryptRequestVerification {
    UserDecryptRequestVerification {
        publicKey: keypair.public_key_bytes().into(),
        contractAddresses: contract_addresses.to_vec(),
        startTimestamp: U256::from(issued_at),
        durationDays: U256::from(duration_days),
        extraData: vec![0u8].into(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionOutcome {
    pub result: DecryptedResult,
    pub path: DecryptPath,
    /// Every state the request went through, starting with `Idle`.
    pub trail: Vec<DecryptionState>,
}

/// Runs one authorized decryption against a [CipherContext].
///
/// The authorizer is consumed by [DecryptionAuthorizer::authorize], so a keypair
/// or grant can never serve a second request.
pub struct DecryptionAuthorizer {
    ctx: Arc<CipherContext>,
    signer: Arc<dyn SigningProvider>,
    state: DecryptionState,
    trail: Vec<DecryptionState>,
}

impl DecryptionAuthorizer {
    pub fn new(ctx: Arc<CipherContext>, signer: Arc<dyn SigningProvider>) -> Self {
        Self {
            ctx,
            signer,
            state: DecryptionState::Idle,
            trail: vec![DecryptionState::Idle],
        }
    }

    fn transition(&mut self, next: DecryptionState) {
        tracing::debug!("Decryption {} -> {}", self.state, next);
        self.state = next;
        self.trail.push(next);
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        self.transition(DecryptionState::Failed);
        tracing::warn!(trail = ?self.trail, "Decryption failed: {err}");
        err
    }

    #[tracing::instrument(skip(self), fields(chain_id = self.ctx.chain_id()))]
    pub async fn authorize(
        mut self,
        handle: Handle,
        contract_address: Address,
        result_type: ResultType,
    ) -> SessionResult<DecryptionOutcome> {
        let keypair = DecryptionKeypair::generate(&mut OsRng);
        self.transition(DecryptionState::KeypairGenerated);

        let engine = Arc::clone(self.ctx.engine());
        let grant = match AuthorizationGrant::sign(
            self.signer.as_ref(),
            &engine.eip712_domain(),
            keypair,
            vec![contract_address],
            unix_timestamp(),
        )
        .await
        {
            Ok(grant) => grant,
            Err(e) => return Err(self.fail(e)),
        };
        self.transition(DecryptionState::GrantSigned);

        let user_address = self.signer.address();
        self.transition(DecryptionState::DecryptRequested);
        let (value, path) = match self.ctx.mode() {
            NetworkMode::Local => match engine
                .direct_decrypt(handle, contract_address, user_address)
                .await
            {
                Ok(v) => (Some(v), DecryptPath::Direct),
                Err(e) => {
                    tracing::warn!(
                        "Direct decryption of {handle} failed, falling back to the signed grant: {e}"
                    );
                    (
                        self.grant_decrypt(handle, contract_address, &grant, user_address)
                            .await?,
                        DecryptPath::SignedGrant,
                    )
                }
            },
            NetworkMode::Remote => (
                self.grant_decrypt(handle, contract_address, &grant, user_address)
                    .await?,
                DecryptPath::SignedGrant,
            ),
        };

        let result = match coerce(handle, value, result_type) {
            Ok(r) => r,
            Err(e) => return Err(self.fail(e)),
        };
        self.transition(DecryptionState::Decrypted);
        Ok(DecryptionOutcome {
            result,
            path,
            trail: self.trail,
        })
    }

    async fn grant_decrypt(
        &mut self,
        handle: Handle,
        contract_address: Address,
        grant: &AuthorizationGrant,
        user_address: Address,
    ) -> SessionResult<Option<U256>> {
        let pairs = [HandleContractPair {
            handle,
            contract_address,
        }];
        match self
            .ctx
            .engine()
            .user_decrypt(&pairs, grant, user_address)
            .await
        {
            Ok(values) => Ok(values.get(&handle).copied()),
            Err(e) => Err(self.fail(SessionError::DecryptTransportFailed {
                reason: e.to_string(),
            })),
        }
    }
}

/// Shape a raw value into the requested result type.
/// A handle missing from the response is read as zero.
fn coerce(
    handle: Handle,
    value: Option<U256>,
    result_type: ResultType,
) -> SessionResult<DecryptedResult> {
    let value = match value {
        Some(v) => v,
        None => {
            tracing::warn!(
                "Handle {handle} is missing from the decryption response, reading it as zero"
            );
            U256::ZERO
        }
    };
    match result_type {
        ResultType::Ebool => Ok(DecryptedResult::Boolean(!value.is_zero())),
        ResultType::Euint32 => u32::try_from(value)
            .map(DecryptedResult::Integer)
            .map_err(|_| SessionError::DecryptTransportFailed {
                reason: format!("value of {handle} does not fit a 32-bit integer"),
            }),
    }
}

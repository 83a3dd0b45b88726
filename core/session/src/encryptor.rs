use crate::context::CipherContext;
use crate::error::{SessionError, SessionResult};
use crate::handle::{normalize_handle, Handle};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Ciphertext handles together with the proof that they are well formed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handles: Vec<Handle>,
    pub input_proof: Vec<u8>,
}

impl EncryptedInput {
    /// The handle a single-value input is submitted with.
    pub fn first_handle(&self) -> SessionResult<Handle> {
        self.handles
            .first()
            .copied()
            .ok_or_else(|| SessionError::EncryptionFailed {
                reason: "no handle to submit".to_string(),
            })
    }

    pub fn input_proof_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.input_proof))
    }
}

/// Encrypt a 32-bit value for `contract_address`, on behalf of `user_address`.
#[tracing::instrument(skip(ctx, value), fields(chain_id = ctx.chain_id(), mode = %ctx.mode()))]
pub async fn encrypt(
    ctx: &CipherContext,
    contract_address: Address,
    user_address: Address,
    value: u32,
) -> SessionResult<EncryptedInput> {
    let raw = ctx
        .engine()
        .encrypt_u32(contract_address, user_address, value)
        .await
        .map_err(|e| {
            SessionError::EncryptionFailed {
                reason: e.to_string(),
            }
            .logged()
        })?;
    if raw.handles.is_empty() {
        return Err(SessionError::EncryptionFailed {
            reason: "engine returned no handles".to_string(),
        }
        .logged());
    }
    if raw.input_proof.is_empty() {
        return Err(SessionError::EncryptionFailed {
            reason: "engine returned an empty input proof".to_string(),
        }
        .logged());
    }
    let handles: Vec<Handle> = raw.handles.iter().map(|h| normalize_handle(h)).collect();
    tracing::info!(
        "Encrypted input with {} handle(s) and a {} byte proof",
        handles.len(),
        raw.input_proof.len()
    );
    Ok(EncryptedInput {
        handles,
        input_proof: raw.input_proof,
    })
}

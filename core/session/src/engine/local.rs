use super::base::{CipherEngine, HandleContractPair, RawEncryptedInput};
use super::coprocessor::MockCoprocessor;
use crate::conf::LocalConfig;
use crate::cryptography::hybrid_ml_kem::{encrypt_to_public_key, HybridKemCt};
use crate::decryption::AuthorizationGrant;
use crate::handle::{derive_input_handle, FheTypeTag, Handle};
use crate::network::NetworkMode;
use crate::solidity_types::{decryption_domain, input_verification_domain};
use crate::{anyhow_error_and_log, unix_timestamp};
use aes_prng::AesRng;
use alloy_primitives::{keccak256, Address, U256};
use alloy_sol_types::Eip712Domain;
use async_trait::async_trait;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Engine of the local development network, backed by [MockCoprocessor].
pub struct LocalEngine {
    chain_id: u64,
    gateway_chain_id: u64,
    verifying_contract_decryption: Address,
    verifying_contract_input_verification: Address,
    coprocessor: Arc<MockCoprocessor>,
    rng: Arc<Mutex<AesRng>>,
}

impl LocalEngine {
    pub fn new(
        chain_id: u64,
        conf: &LocalConfig,
        coprocessor: Arc<MockCoprocessor>,
    ) -> Self {
        Self {
            chain_id,
            gateway_chain_id: conf.gateway_chain_id,
            verifying_contract_decryption: conf.verifying_contract_decryption,
            verifying_contract_input_verification: conf.verifying_contract_input_verification,
            coprocessor,
            rng: Arc::new(Mutex::new(AesRng::from_entropy())),
        }
    }

    pub fn input_verification_domain(&self) -> Eip712Domain {
        input_verification_domain(
            self.gateway_chain_id,
            self.verifying_contract_input_verification,
        )
    }

    fn check_grant(
        &self,
        pairs: &[HandleContractPair],
        grant: &AuthorizationGrant,
        user_address: Address,
    ) -> anyhow::Result<()> {
        let signer = grant.recover_signer(&self.eip712_domain())?;
        if signer != user_address {
            return Err(anyhow_error_and_log(format!(
                "authorization was signed by {signer}, not by {user_address}"
            )));
        }
        let now = unix_timestamp();
        if !grant.is_valid_at(now) {
            return Err(anyhow_error_and_log(format!(
                "authorization is not valid at {now} (issued at {}, {} days)",
                grant.issued_at(),
                grant.validity_duration_days()
            )));
        }
        for pair in pairs {
            if !grant.covers(&pair.contract_address) {
                anyhow::bail!(
                    "authorization does not cover contract {}",
                    pair.contract_address
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CipherEngine for LocalEngine {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Local
    }

    #[tracing::instrument(skip(self, value), fields(chain_id = self.chain_id))]
    async fn encrypt_u32(
        &self,
        contract_address: Address,
        user_address: Address,
        value: u32,
    ) -> anyhow::Result<RawEncryptedInput> {
        let mut seed = [0u8; 32];
        {
            let mut rng = self.rng.lock().await;
            rng.fill_bytes(&mut seed);
        }
        let digest = keccak256(
            [
                seed.as_slice(),
                contract_address.as_slice(),
                user_address.as_slice(),
            ]
            .concat(),
        );
        let handle = derive_input_handle(
            digest.as_slice(),
            0,
            self.chain_id,
            FheTypeTag::Euint32,
        );
        // the input is only usable by the contract it was encrypted for
        self.coprocessor
            .insert(handle, U256::from(value), &[contract_address])
            .await;
        let input_proof = self.coprocessor.attest_inputs(
            &self.input_verification_domain(),
            &[handle],
            user_address,
            contract_address,
            self.chain_id,
        )?;
        Ok(RawEncryptedInput {
            handles: vec![handle.to_vec()],
            input_proof,
        })
    }

    fn eip712_domain(&self) -> Eip712Domain {
        decryption_domain(self.gateway_chain_id, self.verifying_contract_decryption)
    }

    async fn user_decrypt(
        &self,
        pairs: &[HandleContractPair],
        grant: &AuthorizationGrant,
        user_address: Address,
    ) -> anyhow::Result<HashMap<Handle, U256>> {
        self.check_grant(pairs, grant, user_address)?;

        let mut out = HashMap::new();
        for pair in pairs {
            let Some(value) = self.coprocessor.plaintext(&pair.handle).await else {
                tracing::warn!("Coprocessor has no ciphertext for handle {}", pair.handle);
                continue;
            };
            if !self.coprocessor.is_allowed(&pair.handle, &user_address).await
                || !self
                    .coprocessor
                    .is_allowed(&pair.handle, &pair.contract_address)
                    .await
            {
                anyhow::bail!(
                    "{user_address} is not allowed to decrypt {} through {}",
                    pair.handle,
                    pair.contract_address
                );
            }
            // the response travels encrypted under the ephemeral key
            let ct = {
                let mut rng = self.rng.lock().await;
                encrypt_to_public_key(
                    &mut *rng,
                    &grant.public_key(),
                    &value.to_be_bytes::<32>(),
                )?
            };
            let pt = grant.keypair().decrypt(HybridKemCt::from_bytes(&ct.to_bytes())?)?;
            let value = U256::try_from_be_slice(&pt).ok_or_else(|| {
                anyhow::anyhow!("decrypted value of {} bytes does not fit", pt.len())
            })?;
            out.insert(pair.handle, value);
        }
        Ok(out)
    }

    async fn direct_decrypt(
        &self,
        handle: Handle,
        contract_address: Address,
        user_address: Address,
    ) -> anyhow::Result<U256> {
        let value = self
            .coprocessor
            .plaintext(&handle)
            .await
            .ok_or_else(|| anyhow::anyhow!("handle {handle} is unknown to the coprocessor"))?;
        if !self.coprocessor.is_allowed(&handle, &user_address).await {
            anyhow::bail!("{user_address} is not allowed to decrypt {handle}");
        }
        if !self.coprocessor.is_allowed(&handle, &contract_address).await {
            anyhow::bail!("{contract_address} is not allowed to use {handle}");
        }
        Ok(value)
    }
}

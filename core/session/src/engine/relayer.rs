//! Engine of the remote network, which reaches the coprocessor and the key
//! management service through an HTTP relayer.
use super::base::{CipherEngine, HandleContractPair, RawEncryptedInput};
use crate::conf::RelayerConfig;
use crate::consts::{CRS_BITS, SAFE_SER_SIZE_LIMIT};
use crate::cryptography::hybrid_ml_kem::HybridKemCt;
use crate::decryption::AuthorizationGrant;
use crate::handle::{parse_handle, Handle};
use crate::network::NetworkMode;
use crate::solidity_types::decryption_domain;
use crate::top_n_chars;
use alloy_primitives::{Address, U256};
use alloy_sol_types::Eip712Domain;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tfhe::zk::{CompactPkeCrs, ZkComputeLoad};
use tfhe::{CompactPublicKey, ProvenCompactCiphertextList};
use tokio::sync::OnceCell;

// Extra data understood by the relayer, version 0 without payload.
const EXTRA_DATA: &str = "0x00";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyLocation {
    pub data_id: String,
    pub urls: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FheKeyInfo {
    pub fhe_public_key: KeyLocation,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyUrls {
    pub fhe_key_info: Vec<FheKeyInfo>,
    pub crs: HashMap<String, KeyLocation>,
}

impl KeyUrls {
    fn public_key_url(&self) -> anyhow::Result<&str> {
        self.fhe_key_info
            .first()
            .and_then(|info| info.fhe_public_key.urls.first())
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("relayer does not advertise a public key"))
    }

    fn crs_url(&self, bits: &str) -> anyhow::Result<&str> {
        self.crs
            .get(bits)
            .and_then(|loc| loc.urls.first())
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("relayer does not advertise a CRS for {bits} bits"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputProofRequest {
    pub contract_address: Address,
    pub user_address: Address,
    pub ciphertext_with_input_verification: String,
    pub contract_chain_id: String,
    pub extra_data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputProofResponse {
    pub handles: Vec<String>,
    pub signatures: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireHandleContractPair {
    pub handle: String,
    pub contract_address: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestValidity {
    pub start_timestamp: String,
    pub duration_days: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserDecryptRequest {
    pub handle_contract_pairs: Vec<WireHandleContractPair>,
    pub request_validity: RequestValidity,
    pub contracts_chain_id: String,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    /// Hex without the 0x prefix.
    pub signature: String,
    /// Hex without the 0x prefix.
    pub public_key: String,
    pub extra_data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserDecryptEntry {
    pub handle: String,
    /// Hybrid ML-KEM ciphertext addressed to the request's public key.
    pub payload: String,
}

#[derive(Deserialize)]
struct RelayerEnvelope<T> {
    response: T,
}

/// HTTP surface of the relayer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelayerTransport: Send + Sync {
    async fn key_urls(&self) -> anyhow::Result<KeyUrls>;
    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>>;
    async fn input_proof(&self, req: &InputProofRequest) -> anyhow::Result<InputProofResponse>;
    async fn user_decrypt(
        &self,
        req: &UserDecryptRequest,
    ) -> anyhow::Result<Vec<UserDecryptEntry>>;
}

pub struct HttpRelayer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRelayer {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn check(&self, resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!(
            "relayer {} answered {}: {}",
            self.base_url,
            status,
            top_n_chars(body)
        )
    }
}

#[async_trait]
impl RelayerTransport for HttpRelayer {
    async fn key_urls(&self) -> anyhow::Result<KeyUrls> {
        let resp = self
            .client
            .get(format!("{}/v1/keyurl", self.base_url))
            .send()
            .await?;
        let envelope: RelayerEnvelope<KeyUrls> = self.check(resp).await?.json().await?;
        Ok(envelope.response)
    }

    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        Ok(self.check(resp).await?.bytes().await?.to_vec())
    }

    async fn input_proof(&self, req: &InputProofRequest) -> anyhow::Result<InputProofResponse> {
        let resp = self
            .client
            .post(format!("{}/v1/input-proof", self.base_url))
            .json(req)
            .send()
            .await?;
        let envelope: RelayerEnvelope<InputProofResponse> = self.check(resp).await?.json().await?;
        Ok(envelope.response)
    }

    async fn user_decrypt(
        &self,
        req: &UserDecryptRequest,
    ) -> anyhow::Result<Vec<UserDecryptEntry>> {
        let resp = self
            .client
            .post(format!("{}/v1/user-decrypt", self.base_url))
            .json(req)
            .send()
            .await?;
        let envelope: RelayerEnvelope<Vec<UserDecryptEntry>> =
            self.check(resp).await?.json().await?;
        Ok(envelope.response)
    }
}

/// Public encryption key and CRS of the network.
pub struct KeyMaterial {
    pub public_key: CompactPublicKey,
    pub crs: CompactPkeCrs,
}

async fn fetch_key_material(transport: &dyn RelayerTransport) -> anyhow::Result<KeyMaterial> {
    let urls = transport.key_urls().await?;
    let pk_bytes = transport.fetch_bytes(urls.public_key_url()?).await?;
    let crs_bytes = transport.fetch_bytes(urls.crs_url(CRS_BITS)?).await?;
    tracing::info!(
        "Fetched public key ({} bytes) and CRS ({} bytes)",
        pk_bytes.len(),
        crs_bytes.len()
    );
    tokio::task::spawn_blocking(move || -> anyhow::Result<KeyMaterial> {
        let public_key: CompactPublicKey = tfhe::safe_serialization::safe_deserialize(
            std::io::Cursor::new(pk_bytes),
            SAFE_SER_SIZE_LIMIT,
        )
        .map_err(|e| anyhow::anyhow!("cannot deserialize the public key: {e}"))?;
        let crs: CompactPkeCrs = tfhe::safe_serialization::safe_deserialize(
            std::io::Cursor::new(crs_bytes),
            SAFE_SER_SIZE_LIMIT,
        )
        .map_err(|e| anyhow::anyhow!("cannot deserialize the CRS: {e}"))?;
        Ok(KeyMaterial { public_key, crs })
    })
    .await?
}

/// Metadata the input proof is bound to: contract || user || acl || chain id (32 bytes, BE).
pub(crate) fn input_metadata(
    contract_address: Address,
    user_address: Address,
    acl_address: Address,
    chain_id: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 * 20 + 32);
    out.extend_from_slice(contract_address.as_slice());
    out.extend_from_slice(user_address.as_slice());
    out.extend_from_slice(acl_address.as_slice());
    out.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    out
}

/// Assemble the on-chain input proof from the relayer's answer:
/// `num_handles || num_signers || handles || signatures || extra_data`.
pub(crate) fn assemble_input(resp: &InputProofResponse) -> anyhow::Result<RawEncryptedInput> {
    let handles = resp
        .handles
        .iter()
        .map(|h| hex::decode(h.trim_start_matches("0x")))
        .collect::<Result<Vec<_>, _>>()?;
    let signatures = resp
        .signatures
        .iter()
        .map(|s| hex::decode(s.trim_start_matches("0x")))
        .collect::<Result<Vec<_>, _>>()?;
    let normalized: Vec<Handle> = handles
        .iter()
        .map(|h| crate::handle::normalize_handle(h))
        .collect();
    let extra = hex::decode(EXTRA_DATA.trim_start_matches("0x"))?;
    let input_proof = super::coprocessor::encode_input_proof(&normalized, &signatures, &extra)?;
    Ok(RawEncryptedInput {
        handles,
        input_proof,
    })
}

pub struct RelayerEngine {
    chain_id: u64,
    config: RelayerConfig,
    transport: Arc<dyn RelayerTransport>,
    keys: Arc<OnceCell<Arc<KeyMaterial>>>,
}

impl RelayerEngine {
    pub fn new(
        chain_id: u64,
        config: RelayerConfig,
        transport: Arc<dyn RelayerTransport>,
        keys: Arc<OnceCell<Arc<KeyMaterial>>>,
    ) -> Self {
        Self {
            chain_id,
            config,
            transport,
            keys,
        }
    }

    async fn key_material(&self) -> anyhow::Result<Arc<KeyMaterial>> {
        let keys = self
            .keys
            .get_or_try_init(|| async {
                fetch_key_material(self.transport.as_ref())
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(keys))
    }
}

#[async_trait]
impl CipherEngine for RelayerEngine {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Remote
    }

    async fn bootstrap(&self) -> anyhow::Result<()> {
        self.key_material().await.map(|_| ())
    }

    #[tracing::instrument(skip(self, value), fields(chain_id = self.chain_id))]
    async fn encrypt_u32(
        &self,
        contract_address: Address,
        user_address: Address,
        value: u32,
    ) -> anyhow::Result<RawEncryptedInput> {
        // fetched lazily when bootstrap did not succeed
        let keys = self.key_material().await?;
        let metadata = input_metadata(
            contract_address,
            user_address,
            self.config.acl_address,
            self.chain_id,
        );
        let ct_bytes = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            let mut builder = ProvenCompactCiphertextList::builder(&keys.public_key);
            builder.push_with_num_bits(u64::from(value), 32)?;
            let proven = builder.build_with_proof_packed(
                &keys.crs,
                &metadata,
                ZkComputeLoad::Proof,
            )?;
            let mut buf = Vec::new();
            tfhe::safe_serialization::safe_serialize(&proven, &mut buf, SAFE_SER_SIZE_LIMIT)
                .map_err(|e| anyhow::anyhow!("cannot serialize the proven ciphertext: {e}"))?;
            Ok(buf)
        })
        .await??;

        let req = InputProofRequest {
            contract_address,
            user_address,
            ciphertext_with_input_verification: hex::encode(ct_bytes),
            contract_chain_id: format!("0x{:x}", self.chain_id),
            extra_data: EXTRA_DATA.to_string(),
        };
        let resp = self.transport.input_proof(&req).await?;
        assemble_input(&resp)
    }

    fn eip712_domain(&self) -> Eip712Domain {
        decryption_domain(
            self.config.gateway_chain_id,
            self.config.verifying_contract_decryption,
        )
    }

    async fn user_decrypt(
        &self,
        pairs: &[HandleContractPair],
        grant: &AuthorizationGrant,
        user_address: Address,
    ) -> anyhow::Result<HashMap<Handle, U256>> {
        let req = UserDecryptRequest {
            handle_contract_pairs: pairs
                .iter()
                .map(|p| WireHandleContractPair {
                    handle: p.handle.to_string(),
                    contract_address: p.contract_address,
                })
                .collect(),
            request_validity: RequestValidity {
                start_timestamp: grant.issued_at().to_string(),
                duration_days: grant.validity_duration_days().to_string(),
            },
            contracts_chain_id: self.chain_id.to_string(),
            contract_addresses: grant.contract_addresses().to_vec(),
            user_address,
            signature: grant.signature_hex(),
            public_key: hex::encode(grant.public_key()),
            extra_data: EXTRA_DATA.to_string(),
        };
        let entries = self.transport.user_decrypt(&req).await?;

        let requested: HashSet<Handle> = pairs.iter().map(|p| p.handle).collect();
        let mut out = HashMap::new();
        for entry in entries {
            let handle = parse_handle(&entry.handle)?;
            if !requested.contains(&handle) {
                anyhow::bail!("relayer answered for handle {handle} which was not requested");
            }
            let payload = hex::decode(entry.payload.trim_start_matches("0x"))?;
            let ct = HybridKemCt::from_bytes(&payload)?;
            let pt = grant.keypair().decrypt(ct)?;
            let value = U256::try_from_be_slice(&pt).ok_or_else(|| {
                anyhow::anyhow!("decrypted value for {handle} has {} bytes", pt.len())
            })?;
            if let Some(previous) = out.insert(handle, value) {
                if previous != value {
                    anyhow::bail!("relayer answered twice for {handle} with different values");
                }
            }
        }
        Ok(out)
    }
}

use crate::consts::RELAYER_METADATA_METHOD;
use crate::network::VerifierAddresses;
use alloy_primitives::Address;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Verifier contract addresses as reported by the local node.
/// Every field is optional on the wire; completeness is checked by [RelayerMetadata::verifiers].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayerMetadata {
    #[serde(rename = "ACLAddress")]
    pub acl_address: Option<Address>,
    #[serde(rename = "InputVerifierAddress")]
    pub input_verifier_address: Option<Address>,
    #[serde(rename = "KMSVerifierAddress")]
    pub kms_verifier_address: Option<Address>,
}

impl RelayerMetadata {
    pub fn verifiers(&self) -> anyhow::Result<VerifierAddresses> {
        let mut missing = Vec::new();
        if self.acl_address.is_none() {
            missing.push("ACLAddress");
        }
        if self.input_verifier_address.is_none() {
            missing.push("InputVerifierAddress");
        }
        if self.kms_verifier_address.is_none() {
            missing.push("KMSVerifierAddress");
        }
        match (
            self.acl_address,
            self.input_verifier_address,
            self.kms_verifier_address,
        ) {
            (Some(acl), Some(input_verifier), Some(kms_verifier)) => Ok(VerifierAddresses {
                acl,
                input_verifier,
                kms_verifier,
            }),
            _ => Err(anyhow::anyhow!(
                "network metadata is missing {}",
                missing.join(", ")
            )),
        }
    }
}

impl From<VerifierAddresses> for RelayerMetadata {
    fn from(v: VerifierAddresses) -> Self {
        Self {
            acl_address: Some(v.acl),
            input_verifier_address: Some(v.input_verifier),
            kms_verifier_address: Some(v.kms_verifier),
        }
    }
}

/// Source of the verifier addresses of the local network.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkMetadataSource: Send + Sync {
    async fn relayer_metadata(&self) -> anyhow::Result<RelayerMetadata>;
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: [(); 0],
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<RelayerMetadata>,
    error: Option<JsonRpcError>,
}

/// Queries the node's JSON-RPC endpoint.
pub struct RpcMetadataSource {
    client: reqwest::Client,
    rpc_url: String,
}

impl RpcMetadataSource {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.to_string(),
        }
    }
}

#[async_trait]
impl NetworkMetadataSource for RpcMetadataSource {
    async fn relayer_metadata(&self) -> anyhow::Result<RelayerMetadata> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: RELAYER_METADATA_METHOD,
            params: [],
        };
        tracing::debug!("Querying {} at {}", RELAYER_METADATA_METHOD, self.rpc_url);
        let resp: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(e) = resp.error {
            anyhow::bail!("{} returned error {}: {}", RELAYER_METADATA_METHOD, e.code, e.message);
        }
        resp.result
            .ok_or_else(|| anyhow::anyhow!("{} returned no result", RELAYER_METADATA_METHOD))
    }
}

/// Fixed metadata, for in-process networks.
pub struct StaticMetadataSource(pub RelayerMetadata);

impl StaticMetadataSource {
    pub fn simulated() -> Self {
        Self(RelayerMetadata::from(simulated_verifiers()))
    }
}

#[async_trait]
impl NetworkMetadataSource for StaticMetadataSource {
    async fn relayer_metadata(&self) -> anyhow::Result<RelayerMetadata> {
        Ok(self.0.clone())
    }
}

/// Verifier addresses of the hardhat mock deployment.
pub fn simulated_verifiers() -> VerifierAddresses {
    VerifierAddresses {
        acl: alloy_primitives::address!("50157CFfD6bBFA2DECe204a89ec419c23ef5755D"),
        input_verifier: alloy_primitives::address!("901F8942346f7AB3a01F6D7613119Bca447Bb030"),
        kms_verifier: alloy_primitives::address!("1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC"),
    }
}

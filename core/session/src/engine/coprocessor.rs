//! In-process stand-in for the coprocessor of the local development network.
//!
//! It keeps plaintexts next to their handles together with an access control list,
//! and attests encrypted inputs with its own signing key.
use crate::consts::{HANDLE_LENGTH, SIG_SIZE};
use crate::handle::{derive_input_handle, FheTypeTag, Handle};
use crate::solidity_types::CiphertextVerification;
use alloy_primitives::{Address, Signature, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolStruct};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

// Version byte carried as extra data of every input proof.
const INPUT_PROOF_EXTRA_DATA: [u8; 1] = [0x00];

#[derive(Clone, Debug)]
struct StoredCiphertext {
    value: U256,
    allowed: HashSet<Address>,
}

pub struct MockCoprocessor {
    store: RwLock<HashMap<Handle, StoredCiphertext>>,
    signer: PrivateKeySigner,
    computed: AtomicU64,
}

impl Default for MockCoprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCoprocessor {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            signer: PrivateKeySigner::random(),
            computed: AtomicU64::new(0),
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub async fn insert(&self, handle: Handle, value: U256, allowed: &[Address]) {
        let ct = StoredCiphertext {
            value,
            allowed: allowed.iter().copied().collect(),
        };
        self.store.write().await.insert(handle, ct);
    }

    /// Store the result of a computation under a fresh handle.
    pub async fn insert_computed(
        &self,
        value: U256,
        fhe_type: FheTypeTag,
        chain_id: u64,
        allowed: &[Address],
    ) -> Handle {
        let n = self.computed.fetch_add(1, Ordering::Relaxed);
        let digest = [b"computed".as_slice(), &n.to_be_bytes()].concat();
        let handle = derive_input_handle(&digest, 0xff, chain_id, fhe_type);
        self.insert(handle, value, allowed).await;
        handle
    }

    pub async fn allow(&self, handle: &Handle, account: Address) -> anyhow::Result<()> {
        let mut store = self.store.write().await;
        let ct = store
            .get_mut(handle)
            .ok_or_else(|| anyhow::anyhow!("unknown handle {handle}"))?;
        ct.allowed.insert(account);
        Ok(())
    }

    pub async fn is_allowed(&self, handle: &Handle, account: &Address) -> bool {
        self.store
            .read()
            .await
            .get(handle)
            .map(|ct| ct.allowed.contains(account))
            .unwrap_or(false)
    }

    pub async fn plaintext(&self, handle: &Handle) -> Option<U256> {
        self.store.read().await.get(handle).map(|ct| ct.value)
    }

    /// Sign the attestation over a set of input handles and assemble the input proof:
    /// `num_handles || num_signers || handles || signatures || extra_data`.
    pub fn attest_inputs(
        &self,
        domain: &Eip712Domain,
        handles: &[Handle],
        user: Address,
        contract: Address,
        chain_id: u64,
    ) -> anyhow::Result<Vec<u8>> {
        let verification = CiphertextVerification {
            ctHandles: handles.to_vec(),
            userAddress: user,
            contractAddress: contract,
            contractChainId: U256::from(chain_id),
            extraData: INPUT_PROOF_EXTRA_DATA.to_vec().into(),
        };
        let hash = verification.eip712_signing_hash(domain);
        let sig = self.signer.sign_hash_sync(&hash)?;
        let sigs = vec![sig.as_bytes().to_vec()];
        encode_input_proof(handles, &sigs, &INPUT_PROOF_EXTRA_DATA)
    }

    /// Check that `handle` is covered by `proof` and that the proof was signed by this
    /// coprocessor for the given user and contract.
    pub fn verify_input(
        &self,
        domain: &Eip712Domain,
        handle: &Handle,
        proof: &[u8],
        user: Address,
        contract: Address,
        chain_id: u64,
    ) -> anyhow::Result<()> {
        let parsed = decode_input_proof(proof)?;
        if !parsed.handles.contains(handle) {
            anyhow::bail!("handle {handle} is not part of the input proof");
        }
        let verification = CiphertextVerification {
            ctHandles: parsed.handles.clone(),
            userAddress: user,
            contractAddress: contract,
            contractChainId: U256::from(chain_id),
            extraData: parsed.extra_data.clone().into(),
        };
        let hash = verification.eip712_signing_hash(domain);
        for sig in &parsed.signatures {
            if sig.recover_address_from_prehash(&hash)? == self.signer_address() {
                return Ok(());
            }
        }
        anyhow::bail!("input proof is not signed by the coprocessor")
    }
}

#[derive(Debug)]
pub struct InputProof {
    pub handles: Vec<Handle>,
    pub signatures: Vec<Signature>,
    pub extra_data: Vec<u8>,
}

pub fn encode_input_proof(
    handles: &[Handle],
    signatures: &[Vec<u8>],
    extra_data: &[u8],
) -> anyhow::Result<Vec<u8>> {
    let num_handles = u8::try_from(handles.len())?;
    let num_signers = u8::try_from(signatures.len())?;
    let mut proof = Vec::with_capacity(
        2 + handles.len() * HANDLE_LENGTH + signatures.len() * SIG_SIZE + extra_data.len(),
    );
    proof.push(num_handles);
    proof.push(num_signers);
    for h in handles {
        proof.extend_from_slice(h.as_slice());
    }
    for s in signatures {
        if s.len() != SIG_SIZE {
            anyhow::bail!("signature has {} bytes, expected {SIG_SIZE}", s.len());
        }
        proof.extend_from_slice(s);
    }
    proof.extend_from_slice(extra_data);
    Ok(proof)
}

pub fn decode_input_proof(proof: &[u8]) -> anyhow::Result<InputProof> {
    if proof.len() < 2 {
        anyhow::bail!("input proof is too short");
    }
    let num_handles = proof[0] as usize;
    let num_signers = proof[1] as usize;
    let sigs_start = 2 + num_handles * HANDLE_LENGTH;
    let extra_start = sigs_start + num_signers * SIG_SIZE;
    if proof.len() < extra_start {
        anyhow::bail!(
            "input proof of {} bytes cannot hold {num_handles} handles and {num_signers} signatures",
            proof.len()
        );
    }
    let handles = proof[2..sigs_start]
        .chunks_exact(HANDLE_LENGTH)
        .map(Handle::from_slice)
        .collect();
    let signatures = proof[sigs_start..extra_start]
        .chunks_exact(SIG_SIZE)
        .map(Signature::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InputProof {
        handles,
        signatures,
        extra_data: proof[extra_start..].to_vec(),
    })
}

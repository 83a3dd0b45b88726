//! Hybrid ML-KEM + AES-GCM public key encryption.
//!
//! Decryption results are addressed with this scheme: the user generates an
//! ephemeral keypair, the public half travels inside the signed authorization and
//! the response is sealed under it.
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Key};
use ml_kem::kem::{Decapsulate, DecapsulationKey, Encapsulate, EncapsulationKey};
use ml_kem::{EncodedSizeUser, KemCore, MlKem512, MlKem512Params};
use rand::{CryptoRng, Rng};

use super::error::CryptographyError;

type KemParam = MlKem512Params;

// sizes for MlKem512Params
pub(crate) const ML_KEM_CT_LENGTH: usize = 768;
pub(crate) const ML_KEM_PK_LENGTH: usize = 800;
const NONCE_LEN: usize = 12;
const AES_KEY_LEN: usize = 32;

/// A message sealed to an encapsulation key.
///
/// Wire encoding is `nonce || kem_ct || payload_ct`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HybridKemCt {
    nonce: [u8; NONCE_LEN],
    kem_ct: [u8; ML_KEM_CT_LENGTH],
    payload_ct: Vec<u8>,
}

impl HybridKemCt {
    pub fn to_bytes(&self) -> Vec<u8> {
        [
            self.nonce.as_slice(),
            self.kem_ct.as_slice(),
            self.payload_ct.as_slice(),
        ]
        .concat()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CryptographyError> {
        let header = NONCE_LEN + ML_KEM_CT_LENGTH;
        if buf.len() < header {
            return Err(CryptographyError::LengthError(format!(
                "hybrid ciphertext of {} bytes is shorter than its {header} byte header",
                buf.len()
            )));
        }
        let (nonce, rest) = buf.split_at(NONCE_LEN);
        let (kem_ct, payload_ct) = rest.split_at(ML_KEM_CT_LENGTH);
        let mut out = Self {
            nonce: [0u8; NONCE_LEN],
            kem_ct: [0u8; ML_KEM_CT_LENGTH],
            payload_ct: payload_ct.to_vec(),
        };
        out.nonce.copy_from_slice(nonce);
        out.kem_ct.copy_from_slice(kem_ct);
        Ok(out)
    }
}

fn aead(shared_secret: &[u8]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&shared_secret[..AES_KEY_LEN]))
}

fn seal<R: Rng + CryptoRng>(
    rng: &mut R,
    ek: &EncapsulationKey<KemParam>,
    msg: &[u8],
) -> Result<HybridKemCt, CryptographyError> {
    let (kem_ct, shared_secret) = ek
        .encapsulate(rng)
        .map_err(|_| CryptographyError::MlKemError)?;
    let nonce = Aes256Gcm::generate_nonce(rng);
    let payload_ct = aead(&shared_secret).encrypt(&nonce, msg)?;
    Ok(HybridKemCt {
        nonce: nonce.into(),
        kem_ct: kem_ct.0,
        payload_ct,
    })
}

fn open(dk: &DecapsulationKey<KemParam>, ct: &HybridKemCt) -> Result<Vec<u8>, CryptographyError> {
    // ML-KEM rejects implicitly: a foreign key yields a pseudo-random secret and the
    // failure shows up as an AEAD error.
    let shared_secret = dk
        .decapsulate(&ct.kem_ct.into())
        .map_err(|_| CryptographyError::MlKemError)?;
    let plaintext = aead(&shared_secret).decrypt(&ct.nonce.into(), ct.payload_ct.as_slice())?;
    Ok(plaintext)
}

/// Encrypt `msg` to a serialized ML-KEM encapsulation key.
pub fn encrypt_to_public_key<R: Rng + CryptoRng>(
    rng: &mut R,
    public_key: &[u8],
    msg: &[u8],
) -> Result<HybridKemCt, CryptographyError> {
    let Ok(encoded) = public_key.try_into() else {
        return Err(CryptographyError::LengthError(format!(
            "ML-KEM public key must be {ML_KEM_PK_LENGTH} bytes, got {}",
            public_key.len()
        )));
    };
    seal(rng, &EncapsulationKey::<KemParam>::from_bytes(encoded), msg)
}

/// Ephemeral keypair a decryption response is addressed to.
///
/// Lives for one authorization and is never persisted.
pub struct DecryptionKeypair {
    dk: DecapsulationKey<KemParam>,
    ek: EncapsulationKey<KemParam>,
}

impl DecryptionKeypair {
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let (dk, ek) = MlKem512::generate(rng);
        Self { dk, ek }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.ek.as_bytes().to_vec()
    }

    pub fn decrypt(&self, ct: HybridKemCt) -> Result<Vec<u8>, CryptographyError> {
        open(&self.dk, &ct)
    }
}

impl std::fmt::Debug for DecryptionKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKeypair")
            .field("public_key", &hex::encode(&self.public_key_bytes()[..8]))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

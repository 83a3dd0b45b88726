use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptographyError {
    #[error("length error: {0}")]
    LengthError(String),
    #[error(transparent)]
    AesGcmError(#[from] aes_gcm::Error),
    #[error("ml-kem error")]
    MlKemError,
}

use crate::consts::{HANDLE_LENGTH, HANDLE_VERSION};
use alloy_primitives::{keccak256, B256};

/// Opaque 32-byte identifier of a ciphertext held by the coprocessor.
pub type Handle = B256;

/// FHE type tags as encoded in byte 30 of a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FheTypeTag {
    Ebool = 0,
    Euint32 = 4,
}

impl FheTypeTag {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FheTypeTag::Ebool),
            4 => Some(FheTypeTag::Euint32),
            _ => None,
        }
    }
}

/// Bring an engine-produced handle into canonical 32-byte form.
///
/// Short inputs are left-padded with zeros, long inputs keep their first 32 bytes.
pub fn normalize_handle(raw: &[u8]) -> Handle {
    if raw.len() > HANDLE_LENGTH {
        tracing::warn!(
            "Handle of {} bytes is longer than {HANDLE_LENGTH} bytes, truncating",
            raw.len()
        );
        return B256::from_slice(&raw[..HANDLE_LENGTH]);
    }
    B256::left_padding_from(raw)
}

/// Parse a hex handle with or without the 0x prefix.
pub fn parse_handle(s: &str) -> anyhow::Result<Handle> {
    let bytes = hex::decode(s.trim_start_matches("0x"))?;
    Ok(normalize_handle(&bytes))
}

/// Derive an input handle the way the coprocessor lays them out:
/// bytes 0..21 come from the digest of the input, byte 21 is the index in the
/// input list, bytes 22..30 the chain id, byte 30 the type and byte 31 the version.
pub fn derive_input_handle(
    input_digest: &[u8],
    index: u8,
    chain_id: u64,
    fhe_type: FheTypeTag,
) -> Handle {
    let digest = keccak256([input_digest, &[index]].concat());
    let mut out = [0u8; HANDLE_LENGTH];
    out[..21].copy_from_slice(&digest[..21]);
    out[21] = index;
    out[22..30].copy_from_slice(&chain_id.to_be_bytes());
    out[30] = fhe_type as u8;
    out[31] = HANDLE_VERSION;
    B256::from(out)
}

/// The type encoded in a handle, if known.
pub fn handle_type(handle: &Handle) -> Option<FheTypeTag> {
    FheTypeTag::from_byte(handle[30])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_short_handle() {
        let h = normalize_handle(&[0xab, 0xcd]);
        assert_eq!(h[30], 0xab);
        assert_eq!(h[31], 0xcd);
        assert!(h[..30].iter().all(|b| *b == 0));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_normalize_long_handle() {
        let raw: Vec<u8> = (0..40u8).collect();
        let h = normalize_handle(&raw);
        assert_eq!(h.as_slice(), &raw[..32]);
        assert!(logs_contain("truncating"));
    }

    #[test]
    fn test_parse_handle() {
        let h = parse_handle("0x01").unwrap();
        assert_eq!(h[31], 1);
        assert!(parse_handle("zz").is_err());
    }

    #[test]
    fn test_derive_input_handle_layout() {
        let h = derive_input_handle(b"input", 0, 31337, FheTypeTag::Euint32);
        assert_eq!(h[21], 0);
        assert_eq!(&h[22..30], &31337u64.to_be_bytes());
        assert_eq!(handle_type(&h), Some(FheTypeTag::Euint32));
        assert_eq!(h[31], HANDLE_VERSION);
        assert_ne!(h, derive_input_handle(b"input", 1, 31337, FheTypeTag::Euint32));
    }

    proptest! {
        #[test]
        fn normalized_handles_are_stable(raw in proptest::collection::vec(any::<u8>(), 0..64)) {
            let h = normalize_handle(&raw);
            prop_assert_eq!(normalize_handle(h.as_slice()), h);
            if raw.len() <= HANDLE_LENGTH {
                prop_assert_eq!(&h[HANDLE_LENGTH - raw.len()..], raw.as_slice());
            }
        }
    }
}

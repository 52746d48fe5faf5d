use ripemd::{Digest, Ripemd160};

/// Curve prefix byte used in the binary representation of Antelope keys and
/// signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    K1,
    R1,
}

impl KeyKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(KeyKind::K1),
            1 => Some(KeyKind::R1),
            _ => None,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            KeyKind::K1 => "K1",
            KeyKind::R1 => "R1",
        }
    }
}

fn checksummed(payload: &[u8], suffix: &str) -> String {
    let mut hasher = Ripemd160::new();
    hasher.update(payload);
    hasher.update(suffix.as_bytes());
    let digest = hasher.finalize();
    let mut with_checksum = payload.to_vec();
    with_checksum.extend_from_slice(&digest[..4]);
    bs58::encode(with_checksum).into_string()
}

/// Renders a 65-byte recoverable signature in Antelope text form
/// (`SIG_K1_…`).
pub fn signature_to_string(kind: KeyKind, payload: &[u8]) -> String {
    format!(
        "SIG_{}_{}",
        kind.suffix(),
        checksummed(payload, kind.suffix())
    )
}

/// Renders a 33-byte compressed public key in Antelope text form
/// (`PUB_K1_…`).
pub fn public_key_to_string(kind: KeyKind, payload: &[u8]) -> String {
    format!(
        "PUB_{}_{}",
        kind.suffix(),
        checksummed(payload, kind.suffix())
    )
}

//! Deterministic action fingerprints keying the per-block signature map.
//!
//! The fingerprint is a content digest, not a signature: it only has to be
//! stable across processes and schema versions so that an action mined from a
//! packed transaction matches the same action seen in a trace.

use sha1::{Digest, Sha1};
use tevm_indexer_types::Action;

/// Fingerprint format, fixed per deployment. Mixing modes across the reader
/// and assembler of one deployment produces silent signature-map misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    /// Human-readable dotted form, for debugging signature binding.
    Debug,
    /// Single digest over the concatenated action fields.
    Release,
}

impl HashMode {
    pub fn from_debug_flag(debug: bool) -> Self {
        if debug {
            HashMode::Debug
        } else {
            HashMode::Release
        }
    }
}

pub fn fingerprint(action: &Action, mode: HashMode) -> String {
    match mode {
        HashMode::Debug => {
            let mut parts = Vec::with_capacity(3 + action.authorization.len() * 2);
            parts.push(action.account.clone());
            parts.push(action.name.clone());
            for auth in &action.authorization {
                parts.push(auth.actor.clone());
                parts.push(auth.permission.clone());
            }
            parts.push(hex::encode(Sha1::digest(action.data_bytes())));
            parts.join(".")
        }
        HashMode::Release => {
            let mut hasher = Sha1::new();
            hasher.update(action.account.as_bytes());
            hasher.update(action.name.as_bytes());
            for auth in &action.authorization {
                hasher.update(auth.actor.as_bytes());
                hasher.update(auth.permission.as_bytes());
            }
            hasher.update(action.data_bytes());
            hex::encode(hasher.finalize())
        }
    }
}

use serde::{Deserialize, Serialize};

/// `actor@permission` pair authorizing an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: String,
    pub permission: String,
}

/// A native contract action as it appears both in decoded transactions and in
/// action traces. `data` is the hex-encoded action payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub authorization: Vec<PermissionLevel>,
    #[serde(default)]
    pub data: String,
}

impl Action {
    /// The raw payload bytes. Payloads decoded from the wire are hex; anything
    /// else is hashed as-is so fingerprinting never fails.
    pub fn data_bytes(&self) -> Vec<u8> {
        hex::decode(&self.data).unwrap_or_else(|_| self.data.as_bytes().to_vec())
    }
}

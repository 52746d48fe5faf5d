//! Runtime type dictionary (ABI) handling.
//!
//! The State-History socket delivers its schema as the first frame of every
//! session; contract ABIs fetched over RPC use the same format. Both are
//! parsed into [`ShipAbi`] and drive the tagged-union binary [`Codec`].

mod codec;

pub use codec::{Codec, CodecError};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TypeAlias {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VariantDef {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TableDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ActionDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// An ABI as served by the node: type aliases, structs, tagged unions and
/// table/action bindings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ShipAbi {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeAlias>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub variants: Vec<VariantDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

impl ShipAbi {
    pub fn from_json(raw: &str) -> Result<Self, CodecError> {
        serde_json::from_str(raw).map_err(CodecError::from)
    }
}

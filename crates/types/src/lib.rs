//! Shared data model for the tevm-indexer pipeline: Antelope names and key
//! text encodings, block positions, assembled block records, and the
//! indexer's run state.

mod action;
mod block;
mod keys;
mod name;

pub use action::{Action, PermissionLevel};
pub use block::{
    ActionRecord, BlockPosition, EvmTx, EvmTxKind, IndexerCheckpoint, IndexerState, LastIndexed,
    ProcessedBlock,
};
pub use keys::{public_key_to_string, signature_to_string, KeyKind};
pub use name::{Name, NameError};

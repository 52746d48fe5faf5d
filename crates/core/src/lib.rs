//! tevm-indexer core
//!
//! The core of the indexing pipeline: a State-History websocket reader, a
//! parallel binary decode stage with ordered emission, and a per-block
//! assembler that reconstructs EVM transaction sets from native action
//! traces before shipping them to the document sink and the live head
//! broadcast.
//!
//! Data flow:
//!
//! ```text
//! node ──ws──> ShipClient ──> Codec + DecodePool ──> OrderedQueue
//!                  │                                      │
//!                  └──────────── ACK window ──────────────┘
//!                                                         │
//!                              BlockAssembler <───────────┘
//!                                │        │
//!                            BlockSink  Broadcaster
//! ```
//!
//! The reader and assembler are joined by one bounded channel; progress
//! flows back through the atomically published [`monitor::PipelineMonitor`]
//! snapshot.

pub mod abi;
pub mod assembler;
pub mod decode_pool;
pub mod error;
pub mod evm;
pub mod extract;
pub mod hasher;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod rpc;
pub mod ship;
pub mod sink;

//! Streaming decoder for flash-resident ring log files produced by
//! resource-constrained embedded devices.
//!
//! Reassembles fixed-size physical blocks from one or more on-disk files
//! into a deduplicated, sequence-ordered logical stream, walks the
//! type-tagged variable-length entries within each block, tracks an
//! evolving schema of tables and fields, and assigns wall-clock timestamps
//! to records using a back-fill protocol driven by sparse
//! time-synchronization entries, compensating for monotonic-counter wrap.
//!
//! The command-line surface, the HTTP fetcher that pulls new blocks from a
//! device, the relational export sink, the file-compaction utility, and
//! the plain-text dumper are external collaborators built on top of this
//! crate; they are out of scope here.

pub mod block;
pub mod block_set;
pub mod config;
pub mod context;
pub mod decoder;
pub mod entry;
pub mod error;
pub mod field_value;
pub mod schema;
pub mod time;

pub use block::{Block, BLOCK_MAGIC, BLOCK_SIZE};
pub use block_set::BlockSet;
pub use config::DecoderConfig;
pub use context::DecoderContext;
pub use decoder::Decoder;
pub use entry::{
    BootEntry, BootReason, DataEntry, Entry, ExceptionEntry, FieldEntryRecord, Kind, MapEntry,
    TableEntry, UnknownEntry,
};
pub use error::{DecodeError, Result};
pub use field_value::FieldValue;
pub use schema::{FieldDef, FieldType, Table, TableRegistry};
pub use time::{TimeAnchor, TimeTracker};

use thiserror::Error;

/// Errors surfaced across a block/session boundary.
///
/// Per-entry and per-block corruption (§7 of the design notes: malformed
/// entries, corrupt regions, torn tails, missing sequences) is *not*
/// represented here in non-strict mode — those degrade to an
/// [`crate::entry::Entry::Unknown`] or a truncated block and are reported
/// through the `log` facade instead, since the decoder must never abort on
/// a single bad record. This type covers genuine I/O failures, persisted
/// context (de)serialization failures, and the hard errors a
/// [`crate::config::DecoderConfig`] in `strict` mode promotes corruption
/// warnings into.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed block (sequence {sequence:#010x}): {reason}")]
    MalformedBlock { sequence: u32, reason: String },

    #[error("malformed entry at block {sequence:#010x} offset {offset:#x}: {reason}")]
    MalformedEntry {
        sequence: u32,
        offset: usize,
        reason: String,
    },

    #[error("corrupt region in block {sequence:#010x} at offset {offset:#x} (flags {flags:#04x})")]
    CorruptRegion {
        sequence: u32,
        offset: usize,
        flags: u8,
    },

    #[error("persisted context error: {0}")]
    Context(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

use crate::block::{BLOCK_MAGIC, BLOCK_SIZE};

/// Tunables that are implementation parameters rather than wire constants.
///
/// Mirrors the teacher crate's `Options`/`ReadOptions` builder-struct
/// pattern: a small `Copy` struct threaded through the reader, block set
/// and decoder rather than global state.
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    /// Physical block size in bytes. The wire format fixes this at 16384;
    /// exposed for tests that want to exercise reader behavior with a
    /// different (still 4-byte-header-shaped) frame size.
    pub block_size: usize,
    /// Expected block magic constant.
    pub block_magic: u32,
    /// When set, corrupt regions and malformed blocks become hard errors
    /// instead of warn-and-skip. Intended for validation tooling built on
    /// top of this crate, not for normal incremental decoding.
    pub strict: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            block_size: BLOCK_SIZE,
            block_magic: BLOCK_MAGIC,
            strict: false,
        }
    }
}

//! Fixed-size physical block framing (§4.1/§6).

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::config::DecoderConfig;
use crate::error::Result;

pub const BLOCK_SIZE: usize = 16384;
pub const BLOCK_MAGIC: u32 = 0xA78BE044;
pub const BLOCK_HEADER_LEN: usize = 12;
const BLOCK_KIND: u8 = 1;

/// A single physical block: header fields plus its entry payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub sequence: u32,
    pub flags: u8,
    /// The size field recorded in the block header for the first entry in
    /// the payload — kept verbatim, not reparsed from the payload itself.
    pub first_entry_size: u16,
    pub payload: Vec<u8>,
}

impl Block {
    /// Parses one `config.block_size`-byte frame. Returns `Err` with a
    /// human-readable reason (and no sequence, if the header couldn't even
    /// be read that far) if the magic or kind tag don't match — the caller
    /// decides whether that's a skip-and-warn or a hard error, per §4.1.
    pub fn parse(frame: &[u8], config: &DecoderConfig) -> std::result::Result<Block, (Option<u32>, String)> {
        if frame.len() < BLOCK_HEADER_LEN {
            return Err((None, format!("block frame shorter than header ({} bytes)", frame.len())));
        }
        let mut header = &frame[..BLOCK_HEADER_LEN];
        let first_entry_size = header.read_u16::<LittleEndian>().unwrap();
        let kind = header.read_u8().unwrap();
        let flags = header.read_u8().unwrap();
        let magic = header.read_u32::<LittleEndian>().unwrap();
        let sequence = header.read_u32::<LittleEndian>().unwrap();

        if magic != config.block_magic {
            return Err((
                Some(sequence),
                format!("bad magic {magic:#010x} (sequence field read as {sequence:#010x})"),
            ));
        }
        if kind != BLOCK_KIND {
            return Err((Some(sequence), format!("bad kind tag {kind:#x}")));
        }

        Ok(Block {
            sequence,
            flags,
            first_entry_size,
            payload: frame[BLOCK_HEADER_LEN..].to_vec(),
        })
    }

    /// `4 + first_entry_size + len(payload) == block_size` — see spec §3.
    pub fn is_full(&self, config: &DecoderConfig) -> bool {
        4 + self.first_entry_size as usize + self.payload.len() == config.block_size
    }
}

/// Reads `config.block_size`-byte chunks from `reader`, parsing and
/// yielding every chunk that is a valid block. A block that fails to parse
/// is skipped with a warning, unless `config.strict` is set, in which case
/// it is a hard error. Logs a warning (non-fatal, even in strict mode) if
/// the source length isn't a multiple of the block size; the partial
/// trailing chunk is discarded.
pub fn read_file<R: Read>(mut reader: R, config: &DecoderConfig) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut buf = vec![0u8; config.block_size];
    loop {
        let mut filled = 0;
        while filled < config.block_size {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        if filled < config.block_size {
            log::warn!(
                "torn tail: {filled} trailing bytes (not a multiple of block size {}), discarding",
                config.block_size
            );
            break;
        }
        match Block::parse(&buf, config) {
            Ok(block) => blocks.push(block),
            Err((sequence, reason)) => {
                if config.strict {
                    return Err(crate::error::DecodeError::MalformedBlock {
                        sequence: sequence.unwrap_or(0),
                        reason,
                    });
                }
                log::warn!("skipping block: {reason}");
            }
        }
    }
    Ok(blocks)
}

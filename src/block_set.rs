//! Sequence-keyed, deduplicated collection of blocks (§4.2).

use std::collections::btree_map::Entry as MapEntry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::block::{self, Block, BLOCK_MAGIC};
use crate::config::DecoderConfig;
use crate::error::Result;

/// Blocks keyed by sequence number. A `BTreeMap` gives ascending-sequence
/// iteration for free, which is the ordering the decoder driver requires.
#[derive(Debug, Default)]
pub struct BlockSet {
    config: DecoderConfig,
    blocks: BTreeMap<u32, Block>,
    dupes: u32,
}

impl BlockSet {
    pub fn new(config: DecoderConfig) -> Self {
        BlockSet {
            config,
            blocks: BTreeMap::new(),
            dupes: 0,
        }
    }

    /// Inserts a block, discarding it (and counting a dupe) if its
    /// sequence is already present. Returns whether it was newly inserted.
    pub fn insert(&mut self, block: Block) -> bool {
        match self.blocks.entry(block.sequence) {
            MapEntry::Occupied(_) => {
                self.dupes += 1;
                false
            }
            MapEntry::Vacant(slot) => {
                slot.insert(block);
                true
            }
        }
    }

    /// Reads every block from `reader` and inserts it. Returns
    /// `(new_blocks, dupes)` observed from this load.
    pub fn load_reader<R: Read>(&mut self, reader: R) -> Result<(usize, usize)> {
        let blocks = block::read_file(reader, &self.config)?;
        let dupes_before = self.dupes;
        let mut inserted = 0;
        for b in blocks {
            if self.insert(b) {
                inserted += 1;
            }
        }
        Ok((inserted, (self.dupes - dupes_before) as usize))
    }

    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<(usize, usize)> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let (new, dupes) = self.load_reader(file)?;
        log::info!(
            "{}: {new} new blocks, {dupes} dupes",
            path.display()
        );
        Ok((new, dupes))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn dupes(&self) -> u32 {
        self.dupes
    }

    pub fn get(&self, sequence: u32) -> Option<&Block> {
        self.blocks.get(&sequence)
    }

    /// Iterates blocks in ascending sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Sequence numbers missing between the lowest and highest loaded
    /// sequence.
    pub fn gaps(&self) -> Vec<u32> {
        let mut gaps = Vec::new();
        let mut keys = self.blocks.keys().copied();
        if let Some(mut prev) = keys.next() {
            for key in keys {
                let mut expected = prev.wrapping_add(1);
                while expected != key {
                    gaps.push(expected);
                    expected = expected.wrapping_add(1);
                }
                prev = key;
            }
        }
        gaps
    }

    /// Serializes blocks in ascending sequence order as concatenated raw
    /// block frames (header + payload, `block_size` bytes each).
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        for block in self.blocks.values() {
            writer.write_u16::<LittleEndian>(block.first_entry_size)?;
            writer.write_u8(1)?;
            writer.write_u8(block.flags)?;
            writer.write_u32::<LittleEndian>(BLOCK_MAGIC)?;
            writer.write_u32::<LittleEndian>(block.sequence)?;
            writer.write_all(&block.payload)?;
        }
        Ok(())
    }

    pub fn save_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        self.save(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use std::io::Cursor;

    fn frame(sequence: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_SIZE);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.push(1);
        buf.push(0xFE);
        buf.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.resize(BLOCK_SIZE, 0);
        buf
    }

    #[test]
    fn dedups_across_loads() {
        let mut set = BlockSet::new(DecoderConfig::default());
        let mut data = frame(42);
        data.extend_from_slice(&frame(43));
        set.load_reader(Cursor::new(data.clone())).unwrap();
        let (new, dupes) = set.load_reader(Cursor::new(data)).unwrap();
        assert_eq!(new, 0);
        assert_eq!(dupes, 2);
        assert_eq!(set.len(), 2);
        assert_eq!(set.dupes(), 2);
    }

    #[test]
    fn reports_gaps() {
        let mut set = BlockSet::new(DecoderConfig::default());
        let mut data = frame(0);
        data.extend_from_slice(&frame(1));
        data.extend_from_slice(&frame(4));
        set.load_reader(Cursor::new(data)).unwrap();
        assert_eq!(set.gaps(), vec![2, 3]);
    }

    #[test]
    fn round_trips_through_save() {
        let mut set = BlockSet::new(DecoderConfig::default());
        let mut data = frame(5);
        data.extend_from_slice(&frame(6));
        set.load_reader(Cursor::new(data)).unwrap();

        let mut saved = Vec::new();
        set.save(&mut saved).unwrap();

        let mut reloaded = BlockSet::new(DecoderConfig::default());
        reloaded.load_reader(Cursor::new(saved)).unwrap();

        let original: Vec<u32> = set.iter().map(|b| b.sequence).collect();
        let round_tripped: Vec<u32> = reloaded.iter().map(|b| b.sequence).collect();
        assert_eq!(original, round_tripped);
    }
}

//! Top-level decoder driver: walks blocks, feeds entries through the
//! entry parser, and keeps schema/time state up to date (§4.6).

use crate::block::Block;
use crate::block_set::BlockSet;
use crate::config::DecoderConfig;
use crate::context::{DecoderContext, PersistedField, PersistedTable, PersistedTime};
use crate::entry::{
    align_up_4, read_entry, BootEntry, DataEntry, Entry, EntryOutcome, TableEntry, UnknownEntry,
};
use crate::error::{DecodeError, Result};
use crate::field_value::{self, FieldValue};
use crate::schema::{Table, TableRegistry};
use crate::time::{TimeAnchor, TimeTracker};

/// The stateful streaming decoder (§3 "Decode context").
pub struct Decoder {
    config: DecoderConfig,
    schema: TableRegistry,
    time_tracker: TimeTracker,
    anchor_history: Vec<TimeAnchor>,
    current_anchor_index: Option<usize>,
    last_block_sequence: Option<u32>,
    last_block_length: usize,
    entries: Vec<Entry>,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Decoder {
            config,
            schema: TableRegistry::new(),
            time_tracker: TimeTracker::new(),
            anchor_history: Vec::new(),
            current_anchor_index: None,
            last_block_sequence: None,
            last_block_length: 0,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn table(&self, id: u16) -> Option<&Table> {
        self.schema.get(id)
    }

    pub fn anchor(&self, index: usize) -> Option<&TimeAnchor> {
        self.anchor_history.get(index)
    }

    /// Resolves a data entry's field by id against its owning table, if
    /// the table was registered in this session.
    pub fn field_value(&self, data: &DataEntry, field_id: u16) -> Option<FieldValue> {
        let table = self.schema.get(data.table_id)?;
        field_value::extract(table, &data.payload, field_id)
    }

    /// A data entry's resolved UTC timestamp, if its anchor has been
    /// bound (at parse time or via back-fill).
    pub fn data_utc(&self, data: &DataEntry) -> Option<chrono::DateTime<chrono::Utc>> {
        let anchor = self.anchor(data.anchor_index?)?;
        Some(anchor.utc_datetime(data.corrected_system_time))
    }

    /// A boot entry is a session boundary: clears the table registry,
    /// current table, time anchor and wrap-compensation state (§4.5).
    fn reset_session(&mut self) {
        self.schema.reset();
        self.time_tracker.reset();
        self.current_anchor_index = None;
    }

    /// Loads (or resumes loading) one block, appending newly decoded
    /// entries to the output stream.
    pub fn load_block(&mut self, block: &Block) -> Result<()> {
        let start_offset = match self.last_block_sequence {
            Some(last) if block.sequence < last => {
                log::debug!(
                    "ignoring block {:#010x}, older than last loaded {:#010x}",
                    block.sequence,
                    last
                );
                return Ok(());
            }
            Some(last) if block.sequence == last => self.last_block_length,
            _ => 0,
        };

        let mut offset = start_offset;
        loop {
            match read_entry(&block.payload, offset) {
                EntryOutcome::Stop => break,
                EntryOutcome::Corrupt => {
                    if self.config.strict {
                        return Err(DecodeError::CorruptRegion {
                            sequence: block.sequence,
                            offset,
                            flags: block.flags,
                        });
                    }
                    log::warn!(
                        "stopping parse of block {:#010x} at offset {offset:#x} due to corruption",
                        block.sequence
                    );
                    break;
                }
                EntryOutcome::Entry(entry, consumed) => {
                    self.ingest(entry);
                    offset += align_up_4(consumed);
                }
                EntryOutcome::Malformed {
                    kind,
                    reason,
                    payload,
                    consumed,
                } => {
                    if self.config.strict {
                        return Err(DecodeError::MalformedEntry {
                            sequence: block.sequence,
                            offset,
                            reason,
                        });
                    }
                    log::warn!(
                        "malformed entry (kind {kind}) at block {:#010x} offset {offset:#x}: \
                         {reason}; replaced with an unknown entry",
                        block.sequence
                    );
                    self.ingest(Entry::Unknown(UnknownEntry { kind, payload }));
                    offset += align_up_4(consumed);
                }
            }
        }

        self.last_block_sequence = Some(block.sequence);
        self.last_block_length = offset;
        Ok(())
    }

    /// Applies the side effects a freshly parsed entry has on session
    /// state (schema registration, time anchoring, boot reset), then
    /// appends it to the output stream.
    fn ingest(&mut self, entry: Entry) {
        match entry {
            Entry::Boot(boot) => {
                self.reset_session();
                self.entries.push(Entry::Boot(boot));
            }
            Entry::Table(TableEntry { id, name }) => {
                self.schema.register_table(id, name.clone());
                self.entries.push(Entry::Table(TableEntry { id, name }));
            }
            Entry::Field(mut field) => {
                let (table_id, registered) = self.schema.register_field(
                    field.id,
                    field.field_type,
                    field.is_variable,
                    field.element_size,
                    field.name.clone(),
                );
                field.table_id = table_id;
                field.offset = registered.offset;
                self.entries.push(Entry::Field(field));
            }
            Entry::Time(time_entry) => {
                let corrected = self.time_tracker.check_time(time_entry.system_time);
                let anchor = TimeAnchor {
                    raw_system_time: time_entry.system_time,
                    corrected_system_time: corrected,
                    utc_anchor_secs: time_entry.utc_seconds,
                };
                self.anchor_history.push(anchor);
                let anchor_index = self.anchor_history.len() - 1;
                self.current_anchor_index = Some(anchor_index);
                self.backfill(anchor_index);
                self.entries.push(Entry::Time(time_entry));
            }
            Entry::Data(mut data) => {
                data.corrected_system_time = self.time_tracker.check_time(data.system_time);
                data.anchor_index = self.current_anchor_index;
                self.entries.push(Entry::Data(data));
            }
            other @ (Entry::Exception(_) | Entry::Map(_) | Entry::Unknown(_)) => {
                self.entries.push(other);
            }
        }
    }

    /// Walks the output buffer backwards from its tail, assigning the new
    /// anchor to unanchored data entries and filling in boot/exception UTC
    /// values, stopping at the first already-anchored data entry (the
    /// resolved Open Question in the design notes: bounded, O(1)-amortized
    /// back-fill rather than walking to the previous boot entry).
    fn backfill(&mut self, anchor_index: usize) {
        let anchor = self.anchor_history[anchor_index];
        for entry in self.entries.iter_mut().rev() {
            match entry {
                Entry::Data(data) => {
                    if data.anchor_index.is_some() {
                        break;
                    }
                    data.anchor_index = Some(anchor_index);
                }
                Entry::Boot(BootEntry { utc, .. }) if utc.is_none() => {
                    *utc = Some(anchor.utc_datetime(0));
                }
                Entry::Exception(exc) if exc.utc.is_none() => {
                    exc.utc = Some(anchor.utc_datetime(0));
                }
                _ => {}
            }
        }
    }

    /// Loads every block in `block_set` in ascending sequence order.
    /// Gaps are reported but do not stop decoding.
    pub fn decode_all(&mut self, block_set: &BlockSet) -> Result<()> {
        let gaps = block_set.gaps();
        for gap in &gaps {
            log::warn!("missing block sequence {gap:#010x}");
        }
        for block in block_set.iter() {
            self.load_block(block)?;
        }
        Ok(())
    }

    /// Serializes the resumable session state (§4.6/§6).
    pub fn snapshot(&self) -> DecoderContext {
        let time = self.current_anchor_index.and_then(|idx| {
            self.anchor_history.get(idx).map(|a| PersistedTime {
                system_time: a.raw_system_time,
                utc: a.utc_anchor_secs,
            })
        });
        let tables = self
            .schema
            .tables()
            .map(|table| PersistedTable {
                id: table.id,
                name: table.name.clone(),
                fields: table
                    .fields
                    .iter()
                    .map(|f| PersistedField {
                        id: f.id,
                        name: f.name.clone(),
                        field_type: f.field_type.into(),
                        size: f.element_size,
                        is_variable: f.is_variable,
                    })
                    .collect(),
            })
            .collect();
        DecoderContext {
            time,
            prev_system_time: self.time_tracker.prev_system_time(),
            high_time: self.time_tracker.high_time(),
            last_block_sequence: self.last_block_sequence,
            last_block_length: self.last_block_length,
            tables,
        }
    }

    /// Restores a decoder from a previously saved context, so a later run
    /// can resume without re-reading older blocks.
    pub fn restore(config: DecoderConfig, ctx: &DecoderContext) -> Self {
        let mut decoder = Decoder::new(config);
        decoder.time_tracker = TimeTracker::restore(ctx.prev_system_time, ctx.high_time);
        decoder.schema = ctx.rebuild_registry();
        decoder.schema_forget_current_table();
        decoder.last_block_sequence = ctx.last_block_sequence;
        decoder.last_block_length = ctx.last_block_length;
        if let Some(time) = ctx.time {
            let corrected = time.system_time as u64 + ctx.high_time * crate::time::WRAP_ADD_MILLIS;
            decoder.anchor_history.push(TimeAnchor {
                raw_system_time: time.system_time,
                corrected_system_time: corrected,
                utc_anchor_secs: time.utc,
            });
            decoder.current_anchor_index = Some(0);
        }
        decoder
    }

    /// The persisted context shape has no "current table" concept; after
    /// a restore there is no entry stream to infer one from, so it starts
    /// cleared (consistent with a fresh boot/table-entry having to
    /// re-establish it).
    fn schema_forget_current_table(&mut self) {
        self.schema.clear_current_table();
    }
}

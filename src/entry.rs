//! Typed entry parsing within a block payload (§4.3/§6).

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::schema::FieldType;

/// Entry kind tag (the `kind` byte of an entry's common header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Pad = 0,
    Block = 1,
    Boot = 2,
    Time = 3,
    Table = 4,
    Field = 5,
    Data = 6,
    Exception = 7,
    Map = 8,
    Erased = 0xFF,
}

const FLAG_ERASED: u8 = 0xFF;
const FLAG_COMMITTED: u8 = 0xFE;

/// Device restart reason. `Other` preserves an unrecognized code rather
/// than discarding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootReason {
    Default,
    Wdt,
    Exception,
    SoftWdt,
    SoftRestart,
    DeepSleepAwake,
    ExtSysReset,
    Other(u8),
}

impl From<u8> for BootReason {
    fn from(value: u8) -> Self {
        match value {
            0 => BootReason::Default,
            1 => BootReason::Wdt,
            2 => BootReason::Exception,
            3 => BootReason::SoftWdt,
            4 => BootReason::SoftRestart,
            5 => BootReason::DeepSleepAwake,
            6 => BootReason::ExtSysReset,
            other => BootReason::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootEntry {
    pub reason: BootReason,
    /// Absolute UTC, resolved by back-fill against the session's time
    /// anchor when a time entry next arrives (§4.5). `None` until then.
    pub utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeEntry {
    pub system_time: u32,
    pub utc_seconds: u32,
}

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub id: u16,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FieldEntryRecord {
    /// The table this field was registered against; `None` if it was
    /// registered with no current table (a detached field, §4.4).
    pub table_id: Option<u16>,
    pub id: u16,
    pub name: String,
    pub field_type: FieldType,
    pub is_variable: bool,
    pub element_size: u8,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct DataEntry {
    pub system_time: u32,
    /// Wrap-compensated system time, in milliseconds (§4.5).
    pub corrected_system_time: u64,
    pub table_id: u16,
    pub reserved: u16,
    pub payload: Vec<u8>,
    /// Handle into the decoder's anchor history — `None` until a time
    /// entry is available to resolve it (at parse time or by back-fill).
    pub anchor_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ExceptionEntry {
    pub cause: u32,
    pub epc1: u32,
    pub epc2: u32,
    pub epc3: u32,
    pub excvaddr: u32,
    pub depc: u32,
    pub stack: Vec<u32>,
    pub utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MapEntry {
    pub sequences: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct UnknownEntry {
    pub kind: u8,
    pub payload: Vec<u8>,
}

/// A decoded entry. Variants mirror the wire kinds 1:1 (§9's tagged-variant
/// redesign in place of a class hierarchy + kind→constructor dispatch
/// table).
#[derive(Debug, Clone)]
pub enum Entry {
    Boot(BootEntry),
    Time(TimeEntry),
    Table(TableEntry),
    Field(FieldEntryRecord),
    Data(DataEntry),
    Exception(ExceptionEntry),
    Map(MapEntry),
    Unknown(UnknownEntry),
}

#[derive(Debug, Error)]
enum KindDecodeError {
    #[error("invalid UTF-8 name: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("payload too short for this kind")]
    ShortPayload,
    #[error("unrecognized field type discriminant {0:#x}")]
    BadFieldType(u8),
    #[error("field element size is zero")]
    ZeroElementSize,
}

/// Outcome of attempting to read one entry at `offset`.
pub enum EntryOutcome {
    /// No more entries in this block (hit padding, or ran out of room).
    Stop,
    /// The entry's flags signal erasure or corruption; parsing of the
    /// current block must stop here.
    Corrupt,
    /// A successfully framed and decoded entry, and the number of raw
    /// bytes consumed (header + declared size, before 4-byte alignment).
    Entry(Entry, usize),
    /// The entry was correctly framed (its header and flags are fine) but
    /// its kind-specific payload failed to parse. In non-strict decoding
    /// this degrades to an `Unknown` entry; `strict` mode treats it as a
    /// hard error instead.
    Malformed {
        kind: u8,
        reason: String,
        payload: Vec<u8>,
        consumed: usize,
    },
}

/// Reads one entry at `offset` within `payload`, per the contract in §4.3.
pub fn read_entry(payload: &[u8], offset: usize) -> EntryOutcome {
    if offset + 4 > payload.len() {
        return EntryOutcome::Stop;
    }
    let header = &payload[offset..offset + 4];
    let size = LittleEndian::read_u16(&header[0..2]) as usize;
    let kind_raw = header[2];
    let flags = header[3];

    if kind_raw == Kind::Pad as u8 {
        return EntryOutcome::Stop;
    }

    let body_start = offset + 4;
    let Some(body) = payload.get(body_start..body_start + size) else {
        log::warn!(
            "torn entry at offset {offset:#x}: declared size {size} exceeds block payload"
        );
        return EntryOutcome::Corrupt;
    };

    match flags {
        FLAG_COMMITTED => match decode_kind(kind_raw, body) {
            Ok(entry) => EntryOutcome::Entry(entry, 4 + size),
            Err(err) => EntryOutcome::Malformed {
                kind: kind_raw,
                reason: err.to_string(),
                payload: body.to_vec(),
                consumed: 4 + size,
            },
        },
        FLAG_ERASED => EntryOutcome::Corrupt,
        other => {
            log::warn!("corrupt region at offset {offset:#x}: flags {other:#04x}");
            EntryOutcome::Corrupt
        }
    }
}

fn decode_kind(kind_raw: u8, body: &[u8]) -> Result<Entry, KindDecodeError> {
    match kind_raw {
        k if k == Kind::Boot as u8 => decode_boot(body),
        k if k == Kind::Time as u8 => decode_time(body),
        k if k == Kind::Table as u8 => decode_table(body),
        k if k == Kind::Field as u8 => decode_field(body),
        k if k == Kind::Data as u8 => decode_data(body),
        k if k == Kind::Exception as u8 => decode_exception(body),
        k if k == Kind::Map as u8 => decode_map(body),
        _ => Ok(Entry::Unknown(UnknownEntry {
            kind: kind_raw,
            payload: body.to_vec(),
        })),
    }
}

fn decode_boot(body: &[u8]) -> Result<Entry, KindDecodeError> {
    let reason = *body.first().ok_or(KindDecodeError::ShortPayload)?;
    Ok(Entry::Boot(BootEntry {
        reason: BootReason::from(reason),
        utc: None,
    }))
}

fn decode_time(body: &[u8]) -> Result<Entry, KindDecodeError> {
    if body.len() < 8 {
        return Err(KindDecodeError::ShortPayload);
    }
    let system_time = LittleEndian::read_u32(&body[0..4]);
    let utc_seconds = LittleEndian::read_u32(&body[4..8]);
    Ok(Entry::Time(TimeEntry {
        system_time,
        utc_seconds,
    }))
}

fn decode_table(body: &[u8]) -> Result<Entry, KindDecodeError> {
    if body.len() < 2 {
        return Err(KindDecodeError::ShortPayload);
    }
    let id = LittleEndian::read_u16(&body[0..2]);
    let name = String::from_utf8(body[2..].to_vec())?;
    Ok(Entry::Table(TableEntry { id, name }))
}

fn decode_field(body: &[u8]) -> Result<Entry, KindDecodeError> {
    if body.len() < 4 {
        return Err(KindDecodeError::ShortPayload);
    }
    let id = LittleEndian::read_u16(&body[0..2]);
    let type_and_variable = body[2];
    let size = body[3];
    let name = String::from_utf8(body[4..].to_vec())?;
    let field_type = FieldType::from_discriminant(type_and_variable)
        .ok_or(KindDecodeError::BadFieldType(type_and_variable))?;
    if size == 0 {
        return Err(KindDecodeError::ZeroElementSize);
    }
    let is_variable = type_and_variable & 0x80 != 0;
    Ok(Entry::Field(FieldEntryRecord {
        table_id: None,
        id,
        name,
        field_type,
        is_variable,
        element_size: size,
        offset: 0,
    }))
}

fn decode_data(body: &[u8]) -> Result<Entry, KindDecodeError> {
    if body.len() < 8 {
        return Err(KindDecodeError::ShortPayload);
    }
    let system_time = LittleEndian::read_u32(&body[0..4]);
    let table_id = LittleEndian::read_u16(&body[4..6]);
    let reserved = LittleEndian::read_u16(&body[6..8]);
    Ok(Entry::Data(DataEntry {
        system_time,
        corrected_system_time: 0,
        table_id,
        reserved,
        payload: body[8..].to_vec(),
        anchor_index: None,
    }))
}

fn decode_exception(body: &[u8]) -> Result<Entry, KindDecodeError> {
    if body.len() < 24 {
        return Err(KindDecodeError::ShortPayload);
    }
    let mut regs = [0u32; 6];
    LittleEndian::read_u32_into(&body[0..24], &mut regs);
    let stack_bytes = &body[24..];
    let mut stack = vec![0u32; stack_bytes.len() / 4];
    LittleEndian::read_u32_into(&stack_bytes[..stack.len() * 4], &mut stack);
    Ok(Entry::Exception(ExceptionEntry {
        cause: regs[0],
        epc1: regs[1],
        epc2: regs[2],
        epc3: regs[3],
        excvaddr: regs[4],
        depc: regs[5],
        stack,
        utc: None,
    }))
}

fn decode_map(body: &[u8]) -> Result<Entry, KindDecodeError> {
    let mut sequences = vec![0u32; body.len() / 4];
    LittleEndian::read_u32_into(&body[..sequences.len() * 4], &mut sequences);
    Ok(Entry::Map(MapEntry { sequences }))
}

/// Next 4-byte-aligned offset after consuming `n` bytes.
pub fn align_up_4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(size: u16, kind: u8, flags: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&size.to_le_bytes());
        buf.push(kind);
        buf.push(flags);
        buf
    }

    #[test]
    fn pad_stops_parsing() {
        let mut payload = header(0, Kind::Pad as u8, 0xFE);
        payload.resize(16, 0);
        assert!(matches!(read_entry(&payload, 0), EntryOutcome::Stop));
    }

    #[test]
    fn erased_flag_is_corrupt() {
        let mut payload = header(4, Kind::Boot as u8, 0xFF);
        payload.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(read_entry(&payload, 0), EntryOutcome::Corrupt));
    }

    #[test]
    fn bad_flags_are_corrupt() {
        let mut payload = header(4, Kind::Boot as u8, 0x55);
        payload.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(read_entry(&payload, 0), EntryOutcome::Corrupt));
    }

    #[test]
    fn decodes_boot_entry() {
        let mut payload = header(1, Kind::Boot as u8, 0xFE);
        payload.push(2); // Exception
        match read_entry(&payload, 0) {
            EntryOutcome::Entry(Entry::Boot(b), consumed) => {
                assert_eq!(b.reason, BootReason::Exception);
                assert_eq!(consumed, 5);
            }
            _ => panic!("expected boot entry"),
        }
    }

    #[test]
    fn decodes_time_entry() {
        let mut payload = header(8, Kind::Time as u8, 0xFE);
        payload.extend_from_slice(&1000u32.to_le_bytes());
        payload.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        match read_entry(&payload, 0) {
            EntryOutcome::Entry(Entry::Time(t), _) => {
                assert_eq!(t.system_time, 1000);
                assert_eq!(t.utc_seconds, 1_700_000_000);
            }
            _ => panic!("expected time entry"),
        }
    }

    #[test]
    fn malformed_utf8_degrades_to_malformed_outcome() {
        let mut payload = header(3, Kind::Table as u8, 0xFE);
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.push(0xFF); // invalid UTF-8 continuation byte alone
        match read_entry(&payload, 0) {
            EntryOutcome::Malformed { kind, .. } => assert_eq!(kind, Kind::Table as u8),
            EntryOutcome::Entry(_, _) => panic!("expected malformed outcome, got a decoded entry"),
            EntryOutcome::Stop => panic!("expected malformed outcome, got stop"),
            EntryOutcome::Corrupt => panic!("expected malformed outcome, got corrupt"),
        }
    }

    #[test]
    fn zero_element_size_field_degrades_to_malformed_outcome() {
        let mut content = Vec::new();
        content.extend_from_slice(&0u16.to_le_bytes()); // field id
        content.push(0); // type: Unsigned, not variable
        content.push(0); // element size: zero
        content.extend_from_slice(b"bad");
        let mut payload = header(content.len() as u16, Kind::Field as u8, 0xFE);
        payload.extend_from_slice(&content);
        match read_entry(&payload, 0) {
            EntryOutcome::Malformed { kind, .. } => assert_eq!(kind, Kind::Field as u8),
            EntryOutcome::Entry(_, _) => panic!("expected malformed outcome, got a decoded entry"),
            EntryOutcome::Stop => panic!("expected malformed outcome, got stop"),
            EntryOutcome::Corrupt => panic!("expected malformed outcome, got corrupt"),
        }
    }

    #[test]
    fn decodes_exception_entry_with_stack() {
        let mut content = Vec::new();
        for reg in [1u32, 2, 3, 4, 5, 6] {
            content.extend_from_slice(&reg.to_le_bytes());
        }
        content.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        content.extend_from_slice(&0xCAFE_BABEu32.to_le_bytes());
        let mut payload = header(content.len() as u16, Kind::Exception as u8, 0xFE);
        payload.extend_from_slice(&content);
        match read_entry(&payload, 0) {
            EntryOutcome::Entry(Entry::Exception(exc), _) => {
                assert_eq!(exc.cause, 1);
                assert_eq!(exc.depc, 6);
                assert_eq!(exc.stack, vec![0xDEAD_BEEF, 0xCAFE_BABE]);
            }
            _ => panic!("expected exception entry"),
        }
    }

    #[test]
    fn decodes_map_entry() {
        let mut content = Vec::new();
        content.extend_from_slice(&10u32.to_le_bytes());
        content.extend_from_slice(&11u32.to_le_bytes());
        let mut payload = header(content.len() as u16, Kind::Map as u8, 0xFE);
        payload.extend_from_slice(&content);
        match read_entry(&payload, 0) {
            EntryOutcome::Entry(Entry::Map(m), _) => assert_eq!(m.sequences, vec![10, 11]),
            _ => panic!("expected map entry"),
        }
    }

    #[test]
    fn alignment_rounds_up_to_4() {
        assert_eq!(align_up_4(0), 0);
        assert_eq!(align_up_4(1), 4);
        assert_eq!(align_up_4(4), 4);
        assert_eq!(align_up_4(5), 8);
    }
}

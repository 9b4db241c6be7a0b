//! Field value extraction from a data record payload (§4.7).

use byteorder::{ByteOrder, LittleEndian};

use crate::schema::{FieldDef, FieldType, Table};

/// A decoded field value. Arrays are used for non-`Char` variable fields;
/// `Char` variable fields decode to `Text`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    UnsignedArray(Vec<u64>),
    SignedArray(Vec<i64>),
    FloatArray(Vec<f64>),
}

/// Looks up `field_id` on `table` and decodes its value out of a data
/// record's payload.
pub fn extract(table: &Table, payload: &[u8], field_id: u16) -> Option<FieldValue> {
    let field = table.fields.iter().find(|f| f.id == field_id)?;
    Some(extract_field(table, field, payload))
}

fn extract_field(table: &Table, field: &FieldDef, payload: &[u8]) -> FieldValue {
    if !field.is_variable {
        return decode_scalar(field, payload, field.offset);
    }

    // Variable fields: walk declaration order from the end of the fixed
    // region, reading each field's element count from its 2-byte slot and
    // accumulating body length, to find this field's body.
    let mut running = table.field_data_size;
    for candidate in table.fields.iter().filter(|f| f.is_variable) {
        let count = read_count(payload, candidate.offset);
        let body_len = count * candidate.element_size as usize;
        if candidate.id == field.id {
            let body = payload.get(running..running + body_len).unwrap_or(&[]);
            return decode_variable(candidate, body, count);
        }
        running += body_len;
    }
    log::warn!(
        "field '{}' (id {}) declared variable but not found among table '{}' fields",
        field.name,
        field.id,
        table.name
    );
    FieldValue::Unsigned(0)
}

fn read_count(payload: &[u8], offset: usize) -> usize {
    match payload.get(offset..offset + 2) {
        Some(bytes) => LittleEndian::read_u16(bytes) as usize,
        None => {
            log::warn!("variable field count slot at offset {offset:#x} out of range");
            0
        }
    }
}

fn decode_scalar(field: &FieldDef, payload: &[u8], offset: usize) -> FieldValue {
    let size = field.element_size as usize;
    let Some(bytes) = payload.get(offset..offset + size) else {
        log::warn!(
            "field '{}': payload too short for {size}-byte value at offset {offset:#x}",
            field.name
        );
        return FieldValue::Unsigned(0);
    };
    decode_one(field.field_type, size, bytes).unwrap_or_else(|| {
        log::warn!(
            "field '{}': unsupported type/size combination ({:?}, {size})",
            field.name,
            field.field_type
        );
        FieldValue::Unsigned(0)
    })
}

fn decode_variable(field: &FieldDef, body: &[u8], count: usize) -> FieldValue {
    if field.field_type == FieldType::Char {
        return match std::str::from_utf8(body) {
            Ok(s) => FieldValue::Text(s.to_string()),
            Err(_) => {
                log::warn!("field '{}': variable text body is not valid UTF-8", field.name);
                FieldValue::Text(String::from_utf8_lossy(body).into_owned())
            }
        };
    }

    let size = field.element_size as usize;
    let mut unsigned = Vec::with_capacity(count);
    let mut signed = Vec::with_capacity(count);
    let mut float = Vec::with_capacity(count);
    for i in 0..count {
        let Some(bytes) = body.get(i * size..(i + 1) * size) else {
            log::warn!("field '{}': truncated array element {i}", field.name);
            break;
        };
        match decode_one(field.field_type, size, bytes) {
            Some(FieldValue::Unsigned(v)) => unsigned.push(v),
            Some(FieldValue::Signed(v)) => signed.push(v),
            Some(FieldValue::Float(v)) => float.push(v),
            _ => {
                log::warn!(
                    "field '{}': unsupported array element type/size ({:?}, {size})",
                    field.name,
                    field.field_type
                );
                return FieldValue::Unsigned(0);
            }
        }
    }
    match field.field_type {
        FieldType::Unsigned => FieldValue::UnsignedArray(unsigned),
        FieldType::Signed => FieldValue::SignedArray(signed),
        FieldType::Float => FieldValue::FloatArray(float),
        FieldType::Char => unreachable!("handled above"),
    }
}

fn decode_one(field_type: FieldType, size: usize, bytes: &[u8]) -> Option<FieldValue> {
    match (field_type, size) {
        (FieldType::Float, 4) => Some(FieldValue::Float(LittleEndian::read_f32(bytes) as f64)),
        (FieldType::Float, 8) => Some(FieldValue::Float(LittleEndian::read_f64(bytes))),
        (FieldType::Unsigned, 1) => Some(FieldValue::Unsigned(bytes[0] as u64)),
        (FieldType::Unsigned, 2) => Some(FieldValue::Unsigned(LittleEndian::read_u16(bytes) as u64)),
        (FieldType::Unsigned, 4) => Some(FieldValue::Unsigned(LittleEndian::read_u32(bytes) as u64)),
        (FieldType::Unsigned, 8) => Some(FieldValue::Unsigned(LittleEndian::read_u64(bytes))),
        (FieldType::Signed, 1) => Some(FieldValue::Signed(bytes[0] as i8 as i64)),
        (FieldType::Signed, 2) => Some(FieldValue::Signed(LittleEndian::read_i16(bytes) as i64)),
        (FieldType::Signed, 4) => Some(FieldValue::Signed(LittleEndian::read_i32(bytes) as i64)),
        (FieldType::Signed, 8) => Some(FieldValue::Signed(LittleEndian::read_i64(bytes))),
        (FieldType::Char, 1) => Some(FieldValue::Text(String::from_utf8_lossy(bytes).into_owned())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableRegistry;

    #[test]
    fn extracts_fixed_float() {
        let mut reg = TableRegistry::new();
        reg.register_table(1, "sensor".into());
        reg.register_field(0, FieldType::Float, false, 4, "t".into());
        let table = reg.get(1).unwrap();
        let payload = 23.5f32.to_le_bytes();
        match extract(table, &payload, 0).unwrap() {
            FieldValue::Float(v) => assert!((v - 23.5).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn extracts_variable_numeric_array() {
        let mut reg = TableRegistry::new();
        reg.register_table(1, "samples".into());
        reg.register_field(0, FieldType::Unsigned, true, 2, "values".into());
        let table = reg.get(1).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&3u16.to_le_bytes()); // count slot
        payload.extend_from_slice(&10u16.to_le_bytes());
        payload.extend_from_slice(&20u16.to_le_bytes());
        payload.extend_from_slice(&30u16.to_le_bytes());

        assert_eq!(
            extract(table, &payload, 0),
            Some(FieldValue::UnsignedArray(vec![10, 20, 30]))
        );
    }

    #[test]
    fn extracts_variable_text_after_fixed_field() {
        let mut reg = TableRegistry::new();
        reg.register_table(1, "events".into());
        reg.register_field(0, FieldType::Unsigned, false, 4, "a".into());
        reg.register_field(1, FieldType::Char, true, 1, "b".into());
        let table = reg.get(1).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice(&5u16.to_le_bytes());
        payload.extend_from_slice(b"hello");

        assert_eq!(extract(table, &payload, 0), Some(FieldValue::Unsigned(7)));
        assert_eq!(
            extract(table, &payload, 1),
            Some(FieldValue::Text("hello".to_string()))
        );
    }
}

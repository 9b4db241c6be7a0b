//! Persisted decoder context (§4.6/§6): a human-readable document letting
//! a subsequent run resume without re-reading older blocks.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::{FieldType, TableRegistry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersistedTime {
    pub system_time: u32,
    pub utc: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedField {
    pub id: u16,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: PersistedFieldType,
    pub size: u8,
    pub is_variable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistedFieldType {
    Unsigned,
    Signed,
    Float,
    Char,
}

impl From<FieldType> for PersistedFieldType {
    fn from(t: FieldType) -> Self {
        match t {
            FieldType::Unsigned => PersistedFieldType::Unsigned,
            FieldType::Signed => PersistedFieldType::Signed,
            FieldType::Float => PersistedFieldType::Float,
            FieldType::Char => PersistedFieldType::Char,
        }
    }
}

impl From<PersistedFieldType> for FieldType {
    fn from(t: PersistedFieldType) -> Self {
        match t {
            PersistedFieldType::Unsigned => FieldType::Unsigned,
            PersistedFieldType::Signed => FieldType::Signed,
            PersistedFieldType::Float => FieldType::Float,
            PersistedFieldType::Char => FieldType::Char,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTable {
    pub id: u16,
    pub name: String,
    pub fields: Vec<PersistedField>,
}

/// Mirrors the resumable decoder state named in §4.6: the latest time
/// anchor, wrap-compensation counters, the last block position, and the
/// accumulated schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderContext {
    pub time: Option<PersistedTime>,
    pub prev_system_time: u32,
    pub high_time: u64,
    pub last_block_sequence: Option<u32>,
    pub last_block_length: usize,
    pub tables: Vec<PersistedTable>,
}

impl DecoderContext {
    /// Rebuilds a [`TableRegistry`] by replaying table/field registration
    /// in the order they were persisted, so field offsets are recomputed
    /// exactly as they were the first time.
    pub fn rebuild_registry(&self) -> TableRegistry {
        let mut registry = TableRegistry::new();
        for table in &self.tables {
            registry.register_table(table.id, table.name.clone());
            for field in &table.fields {
                registry.register_field(
                    field.id,
                    field.field_type.into(),
                    field.is_variable,
                    field.size,
                    field.name.clone(),
                );
            }
        }
        registry
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<DecoderContext> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn save_to_path(path: impl AsRef<Path>, ctx: &DecoderContext) -> Result<()> {
    let text = serde_json::to_string_pretty(ctx)?;
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let ctx = DecoderContext {
            time: Some(PersistedTime {
                system_time: 1000,
                utc: 1_700_000_000,
            }),
            prev_system_time: 1500,
            high_time: 2,
            last_block_sequence: Some(9),
            last_block_length: 128,
            tables: vec![PersistedTable {
                id: 1,
                name: "sensor".into(),
                fields: vec![PersistedField {
                    id: 0,
                    name: "t".into(),
                    field_type: PersistedFieldType::Float,
                    size: 4,
                    is_variable: false,
                }],
            }],
        };
        let json = serde_json::to_string_pretty(&ctx).unwrap();
        let parsed: DecoderContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.prev_system_time, 1500);
        assert_eq!(parsed.high_time, 2);
        assert_eq!(parsed.tables[0].fields[0].name, "t");
    }

    #[test]
    fn rebuilds_registry_with_matching_offsets() {
        let ctx = DecoderContext {
            tables: vec![PersistedTable {
                id: 1,
                name: "sensor".into(),
                fields: vec![
                    PersistedField {
                        id: 0,
                        name: "a".into(),
                        field_type: PersistedFieldType::Unsigned,
                        size: 4,
                        is_variable: false,
                    },
                    PersistedField {
                        id: 1,
                        name: "b".into(),
                        field_type: PersistedFieldType::Char,
                        size: 1,
                        is_variable: true,
                    },
                ],
            }],
            ..Default::default()
        };
        let registry = ctx.rebuild_registry();
        let table = registry.get(1).unwrap();
        assert_eq!(table.fields[0].offset, 0);
        assert_eq!(table.fields[1].offset, 4);
        assert_eq!(table.field_data_size, 6);
    }
}

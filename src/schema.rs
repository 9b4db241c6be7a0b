//! Evolving schema state: tables, fields, and field-layout bookkeeping (§4.4).

use std::collections::HashMap;

/// Field type discriminant (low 7 bits of the field entry's type byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Unsigned,
    Signed,
    Float,
    Char,
}

impl FieldType {
    pub fn from_discriminant(bits: u8) -> Option<FieldType> {
        match bits & 0x7F {
            0 => Some(FieldType::Unsigned),
            1 => Some(FieldType::Signed),
            2 => Some(FieldType::Float),
            3 => Some(FieldType::Char),
            _ => None,
        }
    }
}

/// A registered column of a table.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: u16,
    pub name: String,
    pub field_type: FieldType,
    pub is_variable: bool,
    pub element_size: u8,
    /// Byte offset of this field's fixed portion within a data record —
    /// for variable fields, the offset of its 2-byte element-count slot.
    pub offset: usize,
}

/// A named device/domain/stream and its ordered field list.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub id: u16,
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Cumulative fixed-portion size: the sum of each fixed field's
    /// `element_size` plus 2 bytes per variable field's count slot.
    pub field_data_size: usize,
}

impl Table {
    fn new(id: u16, name: String) -> Self {
        Table {
            id,
            name,
            fields: Vec::new(),
            field_data_size: 0,
        }
    }

    /// `element_size` is assumed nonzero — the entry parser rejects
    /// zero-size fields before a `Field` entry is ever constructed (§4.3).
    fn register_field(
        &mut self,
        id: u16,
        field_type: FieldType,
        is_variable: bool,
        element_size: u8,
        name: String,
    ) -> FieldDef {
        let offset = self.field_data_size;
        let field = FieldDef {
            id,
            name,
            field_type,
            is_variable,
            element_size,
            offset,
        };
        self.field_data_size += if is_variable { 2 } else { element_size as usize };
        self.fields.push(field.clone());
        field
    }
}

/// Table registry keyed by id, plus the "current table" pointer that field
/// entries attach to until the next table or boot entry.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: HashMap<u16, Table>,
    current_table_id: Option<u16>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` as the current table, overwriting any previous table
    /// with the same id.
    pub fn register_table(&mut self, id: u16, name: String) {
        self.tables.insert(id, Table::new(id, name));
        self.current_table_id = Some(id);
    }

    /// Registers a field against the current table, if any. Returns the
    /// owning table id (`None` if registered detached) and the resulting
    /// field definition. `element_size` is assumed nonzero (§4.3).
    pub fn register_field(
        &mut self,
        id: u16,
        field_type: FieldType,
        is_variable: bool,
        element_size: u8,
        name: String,
    ) -> (Option<u16>, FieldDef) {
        match self.current_table_id {
            Some(table_id) => {
                let table = self
                    .tables
                    .get_mut(&table_id)
                    .expect("current_table_id always refers to a registered table");
                let field = table.register_field(id, field_type, is_variable, element_size, name);
                (Some(table_id), field)
            }
            None => (
                None,
                FieldDef {
                    id,
                    name,
                    field_type,
                    is_variable,
                    element_size,
                    offset: 0,
                },
            ),
        }
    }

    pub fn get(&self, id: u16) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn current_table_id(&self) -> Option<u16> {
        self.current_table_id
    }

    pub fn reset(&mut self) {
        self.tables.clear();
        self.current_table_id = None;
    }

    /// Clears only the current-table pointer, leaving registered tables
    /// intact — used when restoring from a persisted context, which does
    /// not record a current table.
    pub fn clear_current_table(&mut self) {
        self.current_table_id = None;
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

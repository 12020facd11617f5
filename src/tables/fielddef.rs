//! Field definition table.
//!
//! One 8-byte record per surviving field. Within each type, static fields
//! come first, then instance fields, source order preserved inside each
//! group. Fields with a compile-time literal value are never registered;
//! their values live in signatures where referenced.

use crate::{
    loader::FieldIdx,
    tables::base::{IndexedTable, RecordWriter, DEF_ID_LIMIT},
    Result,
};

/// On-wire record width.
pub const FIELD_DEF_RECORD_SIZE: usize = 8;

/// Fully resolved field-def record.
pub struct FieldDefRecord {
    /// Name string id
    pub name: u16,
    /// Field signature id
    pub signature: u16,
    /// Field attribute flags
    pub flags: u16,
    /// Default-value signature id, `0xFFFF` when absent
    pub default_value: u16,
}

/// The field definition table.
pub struct FieldDefTable {
    base: IndexedTable<FieldIdx>,
    records: Vec<FieldDefRecord>,
}

impl FieldDefTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        FieldDefTable {
            base: IndexedTable::new("field-def", DEF_ID_LIMIT),
            records: Vec::new(),
        }
    }

    /// Register a field in emission order.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(&mut self, idx: FieldIdx) -> Result<u16> {
        self.base.get_or_create(idx)
    }

    /// Id of a registered field.
    #[must_use]
    pub fn try_get_id(&self, idx: FieldIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[FieldIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<FieldDefRecord>) {
        self.records = records;
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.base.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Emit the fixed-width records.
    ///
    /// A no-op before minimization completes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidRecord`] on a width violation.
    pub fn write(&self, minimize_complete: bool, out: &mut Vec<u8>) -> Result<()> {
        if !minimize_complete {
            return Ok(());
        }
        for record in &self.records {
            let mut writer = RecordWriter::begin(out);
            writer.write_u16(record.name);
            writer.write_u16(record.signature);
            writer.write_u16(record.flags);
            writer.write_u16(record.default_value);
            writer.finish("field-def", FIELD_DEF_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for FieldDefTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::token::EMPTY_INDEX;

    #[test]
    fn record_width_is_exact() {
        let mut table = FieldDefTable::new();
        table.register(FieldIdx(0)).unwrap();
        table.set_records(vec![FieldDefRecord {
            name: 1,
            signature: 0,
            flags: 0x0006,
            default_value: EMPTY_INDEX,
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), FIELD_DEF_RECORD_SIZE);
        assert_eq!(&out[6..], &[0xFF, 0xFF]);
    }
}

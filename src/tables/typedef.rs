//! Type definition table.
//!
//! One 22-byte record per type, in the deterministic order produced by the
//! type orderer. Each record carries the member window (first field/method
//! id plus grouped counts), the encoded extends token, and the interface
//! list signature.

use crate::{
    loader::TypeDefIdx,
    tables::base::{IndexedTable, RecordWriter, DEF_ID_LIMIT},
    Result,
};

/// On-wire record width.
pub const TYPE_DEF_RECORD_SIZE: usize = 22;

/// Fully resolved type-def record.
pub struct TypeDefRecord {
    /// Name string id
    pub name: u16,
    /// Namespace string id
    pub namespace: u16,
    /// Table-tagged extends token, `0xFFFF` when the type extends nothing
    pub extends: u16,
    /// Enclosing type-def id, `0xFFFF` for top-level types
    pub enclosing: u16,
    /// Interface-list signature id, `0xFFFF` when no interfaces
    pub interfaces: u16,
    /// First field-def id, `0xFFFF` when the type has no fields
    pub first_field: u16,
    /// First method-def id, `0xFFFF` when the type has no methods
    pub first_method: u16,
    /// Number of virtual methods
    pub virtual_count: u8,
    /// Number of non-virtual instance methods
    pub instance_count: u8,
    /// Number of static methods
    pub static_count: u8,
    /// Data type code of the definition
    pub data_type: u8,
    /// Type attribute flags
    pub flags: u32,
}

/// The type definition table.
pub struct TypeDefTable {
    base: IndexedTable<TypeDefIdx>,
    records: Vec<TypeDefRecord>,
}

impl TypeDefTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        TypeDefTable {
            base: IndexedTable::new("type-def", DEF_ID_LIMIT),
            records: Vec::new(),
        }
    }

    /// Register a type in orderer sequence.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(&mut self, idx: TypeDefIdx) -> Result<u16> {
        self.base.get_or_create(idx)
    }

    /// Id of a registered type.
    #[must_use]
    pub fn try_get_id(&self, idx: TypeDefIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[TypeDefIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<TypeDefRecord>) {
        self.records = records;
    }

    /// Records in id order.
    #[must_use]
    pub fn records(&self) -> &[TypeDefRecord] {
        &self.records
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
            writer.write_u16(record.namespace);
            writer.write_u16(record.extends);
            writer.write_u16(record.enclosing);
            writer.write_u16(record.interfaces);
            writer.write_u16(record.first_field);
            writer.write_u16(record.first_method);
            writer.write_u8(record.virtual_count);
            writer.write_u8(record.instance_count);
            writer.write_u8(record.static_count);
            writer.write_u8(record.data_type);
            writer.write_u32(record.flags);
            writer.finish("type-def", TYPE_DEF_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for TypeDefTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::token::EMPTY_INDEX;

    #[test]
    fn ids_follow_registration_order() {
        let mut table = TypeDefTable::new();
        assert_eq!(table.register(TypeDefIdx(4)).unwrap(), 0);
        assert_eq!(table.register(TypeDefIdx(1)).unwrap(), 1);
        assert_eq!(table.try_get_id(TypeDefIdx(4)), Some(0));
    }

    #[test]
    fn record_width_is_exact() {
        let mut table = TypeDefTable::new();
        table.register(TypeDefIdx(0)).unwrap();
        table.set_records(vec![TypeDefRecord {
            name: 1,
            namespace: 0,
            extends: EMPTY_INDEX,
            enclosing: EMPTY_INDEX,
            interfaces: EMPTY_INDEX,
            first_field: EMPTY_INDEX,
            first_method: 0,
            virtual_count: 0,
            instance_count: 1,
            static_count: 0,
            data_type: 0,
            flags: 0x0010_0001,
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), TYPE_DEF_RECORD_SIZE);
    }
}

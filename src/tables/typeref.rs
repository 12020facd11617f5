//! Type reference table.
//!
//! One 6-byte record per external type, uniqued by fully-qualified name. The
//! scope field is either an assembly-ref id or, for nested externals, the
//! parent type-ref id with the external bit set.

use rustc_hash::FxHashMap;

use crate::{
    loader::TypeRefIdx,
    tables::base::{IndexedTable, RecordWriter, REF_ID_LIMIT},
    Result,
};

/// On-wire record width: name, namespace, scope.
pub const TYPE_REF_RECORD_SIZE: usize = 6;

/// Fully resolved type-ref record.
pub struct TypeRefRecord {
    /// Name string id
    pub name: u16,
    /// Namespace string id
    pub namespace: u16,
    /// Assembly-ref id, or parent type-ref id with `0x8000`
    pub scope: u16,
}

/// The type reference table.
pub struct TypeRefTable {
    base: IndexedTable<TypeRefIdx>,
    by_name: FxHashMap<String, u16>,
    records: Vec<TypeRefRecord>,
}

impl TypeRefTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        TypeRefTable {
            base: IndexedTable::new("type-ref", REF_ID_LIMIT),
            by_name: FxHashMap::default(),
            records: Vec::new(),
        }
    }

    /// Register a type reference, folding duplicates by fully-qualified name.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(&mut self, idx: TypeRefIdx, full_name: &str) -> Result<u16> {
        if let Some(&id) = self.by_name.get(full_name) {
            self.base.alias(idx, id);
            return Ok(id);
        }
        let id = self.base.get_or_create(idx)?;
        self.by_name.insert(full_name.to_string(), id);
        Ok(id)
    }

    /// Id of a registered reference.
    #[must_use]
    pub fn try_get_id(&self, idx: TypeRefIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Id of a reference by fully-qualified name.
    #[must_use]
    pub fn try_get_id_by_name(&self, full_name: &str) -> Option<u16> {
        self.by_name.get(full_name).copied()
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[TypeRefIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<TypeRefRecord>) {
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
            writer.write_u16(record.namespace);
            writer.write_u16(record.scope);
            writer.finish("type-ref", TYPE_REF_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for TypeRefTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_full_names_fold() {
        let mut table = TypeRefTable::new();
        let a = table.register(TypeRefIdx(0), "System.Object").unwrap();
        let b = table.register(TypeRefIdx(5), "System.Object").unwrap();
        let c = table.register(TypeRefIdx(1), "System.String").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert_eq!(table.try_get_id_by_name("System.Object"), Some(a));
    }

    #[test]
    fn record_width_is_exact() {
        let mut table = TypeRefTable::new();
        table.register(TypeRefIdx(0), "System.Object").unwrap();
        table.set_records(vec![TypeRefRecord {
            name: 7,
            namespace: 1,
            scope: 0,
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), TYPE_REF_RECORD_SIZE);
        assert_eq!(out, [0x07, 0x00, 0x01, 0x00, 0x00, 0x00]);
    }
}

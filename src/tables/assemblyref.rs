//! Assembly reference table.
//!
//! One record per referenced external assembly, uniqued by simple name.

use rustc_hash::FxHashMap;

use crate::{
    loader::{AssemblyRefIdx, Version},
    tables::base::{IndexedTable, RecordWriter, REF_ID_LIMIT},
    Result,
};

/// On-wire record width: name, pad, four version parts.
pub const ASSEMBLY_REF_RECORD_SIZE: usize = 12;

/// Fully resolved assembly-ref record.
pub struct AssemblyRefRecord {
    /// Name string id
    pub name: u16,
    /// Referenced version
    pub version: Version,
}

/// The assembly reference table.
pub struct AssemblyRefTable {
    base: IndexedTable<AssemblyRefIdx>,
    by_name: FxHashMap<String, u16>,
    records: Vec<AssemblyRefRecord>,
}

impl AssemblyRefTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        AssemblyRefTable {
            base: IndexedTable::new("assembly-ref", REF_ID_LIMIT),
            by_name: FxHashMap::default(),
            records: Vec::new(),
        }
    }

    /// Register an assembly reference, folding duplicates by name.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(&mut self, idx: AssemblyRefIdx, name: &str) -> Result<u16> {
        if let Some(&id) = self.by_name.get(name) {
            self.base.alias(idx, id);
            return Ok(id);
        }
        let id = self.base.get_or_create(idx)?;
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Id of a registered reference.
    #[must_use]
    pub fn try_get_id(&self, idx: AssemblyRefIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[AssemblyRefIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<AssemblyRefRecord>) {
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
            writer.write_u16(0);
            writer.write_u16(record.version.major);
            writer.write_u16(record.version.minor);
            writer.write_u16(record.version.build);
            writer.write_u16(record.version.revision);
            writer.finish("assembly-ref", ASSEMBLY_REF_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for AssemblyRefTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_share_a_record() {
        let mut table = AssemblyRefTable::new();
        let first = table.register(AssemblyRefIdx(0), "mscorlib").unwrap();
        let second = table.register(AssemblyRefIdx(1), "mscorlib").unwrap();
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.try_get_id(AssemblyRefIdx(1)), Some(first));
    }

    #[test]
    fn record_width_is_exact() {
        let mut table = AssemblyRefTable::new();
        table.register(AssemblyRefIdx(0), "mscorlib").unwrap();
        table.set_records(vec![AssemblyRefRecord {
            name: 1,
            version: Version {
                major: 4,
                minor: 0,
                build: 0,
                revision: 0,
            },
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), ASSEMBLY_REF_RECORD_SIZE);
        assert_eq!(&out[..4], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&out[4..6], &[0x04, 0x00]);
    }

    #[test]
    fn write_is_gated_on_minimization() {
        let mut table = AssemblyRefTable::new();
        table.register(AssemblyRefIdx(0), "mscorlib").unwrap();
        table.set_records(vec![AssemblyRefRecord {
            name: 1,
            version: Version::default(),
        }]);

        let mut out = Vec::new();
        table.write(false, &mut out).unwrap();
        assert!(out.is_empty());
    }
}

//! Method specification table.
//!
//! One 8-byte record per generic method instantiation: the open method, the
//! instantiation signature, and the declaring container.

use crate::{
    loader::MethodSpecIdx,
    tables::base::{IndexedTable, RecordWriter, DEF_ID_LIMIT},
    Result,
};

/// On-wire record width.
pub const METHOD_SPEC_RECORD_SIZE: usize = 8;

/// Fully resolved method-spec record.
pub struct MethodSpecRecord {
    /// Open generic method id (external bit set for references)
    pub method: u16,
    /// Instantiation signature id
    pub instantiation: u16,
    /// Encoded declaring-type token
    pub container: u16,
}

/// The method specification table.
pub struct MethodSpecTable {
    base: IndexedTable<MethodSpecIdx>,
    records: Vec<MethodSpecRecord>,
}

impl MethodSpecTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        MethodSpecTable {
            base: IndexedTable::new("method-spec", DEF_ID_LIMIT),
            records: Vec::new(),
        }
    }

    /// Register an instantiation.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(&mut self, idx: MethodSpecIdx) -> Result<u16> {
        self.base.get_or_create(idx)
    }

    /// Id of a registered instantiation.
    #[must_use]
    pub fn try_get_id(&self, idx: MethodSpecIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[MethodSpecIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<MethodSpecRecord>) {
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
            writer.write_u16(record.method);
            writer.write_u16(record.instantiation);
            writer.write_u16(record.container);
            writer.write_u16(0);
            writer.finish("method-spec", METHOD_SPEC_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for MethodSpecTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_width_is_exact() {
        let mut table = MethodSpecTable::new();
        table.register(MethodSpecIdx(0)).unwrap();
        table.set_records(vec![MethodSpecRecord {
            method: 0x8001,
            instantiation: 4,
            container: 5,
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), METHOD_SPEC_RECORD_SIZE);
    }
}

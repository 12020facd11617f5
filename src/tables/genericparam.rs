//! Generic parameter table.
//!
//! One 12-byte record per generic parameter declared by a surviving type or
//! method.

use crate::{
    loader::GenericParamIdx,
    tables::base::{IndexedTable, RecordWriter, DEF_ID_LIMIT},
    Result,
};

/// On-wire record width.
pub const GENERIC_PARAM_RECORD_SIZE: usize = 12;

/// Fully resolved generic-param record.
pub struct GenericParamRecord {
    /// Ordinal within the owner
    pub number: u16,
    /// Variance and constraint flags
    pub flags: u16,
    /// Encoded owner token (type-def or method-def id)
    pub owner: u16,
    /// Signature id of the parameter's shape, `0xFFFF` when none
    pub signature: u16,
    /// Name string id
    pub name: u16,
}

/// The generic parameter table.
pub struct GenericParamTable {
    base: IndexedTable<GenericParamIdx>,
    records: Vec<GenericParamRecord>,
}

impl GenericParamTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        GenericParamTable {
            base: IndexedTable::new("generic-param", DEF_ID_LIMIT),
            records: Vec::new(),
        }
    }

    /// Register a generic parameter.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(&mut self, idx: GenericParamIdx) -> Result<u16> {
        self.base.get_or_create(idx)
    }

    /// Id of a registered parameter.
    #[must_use]
    pub fn try_get_id(&self, idx: GenericParamIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[GenericParamIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<GenericParamRecord>) {
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
            writer.write_u16(record.number);
            writer.write_u16(record.flags);
            writer.write_u16(record.owner);
            writer.write_u16(record.signature);
            writer.write_u16(record.name);
            writer.write_u16(0);
            writer.finish("generic-param", GENERIC_PARAM_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for GenericParamTable {
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
        let mut table = GenericParamTable::new();
        table.register(GenericParamIdx(0)).unwrap();
        table.set_records(vec![GenericParamRecord {
            number: 0,
            flags: 0,
            owner: 0,
            signature: EMPTY_INDEX,
            name: 1,
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), GENERIC_PARAM_RECORD_SIZE);
    }
}

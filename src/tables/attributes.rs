//! Custom attribute table.
//!
//! One 8-byte record per surviving custom attribute: the owner's table tag
//! and index, the constructor's method reference id, and the attribute
//! signature. With attribute compression enabled, each owner's attributes
//! are pre-sorted by attribute full name descending, which enables
//! downstream runtime folding.

use crate::{
    tables::base::RecordWriter,
    Result,
};

/// On-wire record width.
pub const ATTRIBUTE_RECORD_SIZE: usize = 8;

/// Fully resolved attribute record.
pub struct AttributeRecord {
    /// Table tag of the owner (type-def, field-def, or method-def)
    pub owner_tag: u16,
    /// Owner's index within its table
    pub owner_id: u16,
    /// Constructor method id (external bit set for references)
    pub ctor: u16,
    /// Attribute signature id
    pub signature: u16,
}

/// The custom attribute table.
pub struct AttributesTable {
    records: Vec<AttributeRecord>,
}

impl AttributesTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        AttributesTable {
            records: Vec::new(),
        }
    }

    /// Append a resolved record.
    pub fn push(&mut self, record: AttributeRecord) {
        self.records.push(record);
    }

    /// Records in emission order.
    #[must_use]
    pub fn records(&self) -> &[AttributeRecord] {
        &self.records
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
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
            writer.write_u16(record.owner_tag);
            writer.write_u16(record.owner_id);
            writer.write_u16(record.ctor);
            writer.write_u16(record.signature);
            writer.finish("attributes", ATTRIBUTE_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for AttributesTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_width_is_exact() {
        let mut table = AttributesTable::new();
        table.push(AttributeRecord {
            owner_tag: 4,
            owner_id: 0,
            ctor: 0x8002,
            signature: 6,
        });

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), ATTRIBUTE_RECORD_SIZE);
        assert_eq!(&out[4..6], &[0x02, 0x80]);
    }
}

//! Method definition table.
//!
//! One 16-byte record per method. Within each type, methods are grouped
//! virtual first, then non-virtual instance, then static, source order
//! preserved inside each group; the grouped counts land in the owning
//! type-def record. The record's RVA is a 16-bit offset into the byte-code
//! stream.

use crate::{
    loader::MethodIdx,
    tables::base::{IndexedTable, RecordWriter, DEF_ID_LIMIT},
    Result,
};

/// On-wire record width.
pub const METHOD_DEF_RECORD_SIZE: usize = 16;

/// Fully resolved method-def record.
pub struct MethodDefRecord {
    /// Name string id
    pub name: u16,
    /// Offset into the byte-code stream, `0xFFFF` for bodyless methods
    pub rva: u16,
    /// Method attribute flags (implementation flags in the high half)
    pub flags: u32,
    /// 1 when the method returns a value, 0 for void
    pub retval_count: u8,
    /// Argument count including `this`
    pub arg_count: u8,
    /// Local variable count
    pub local_count: u8,
    /// Required operand stack depth
    pub eval_stack: u8,
    /// Locals signature id, `0xFFFF` when the body has no locals
    pub locals_sig: u16,
    /// Method signature id
    pub signature: u16,
}

/// The method definition table.
pub struct MethodDefTable {
    base: IndexedTable<MethodIdx>,
    records: Vec<MethodDefRecord>,
}

impl MethodDefTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        MethodDefTable {
            base: IndexedTable::new("method-def", DEF_ID_LIMIT),
            records: Vec::new(),
        }
    }

    /// Register a method in emission order.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(&mut self, idx: MethodIdx) -> Result<u16> {
        self.base.get_or_create(idx)
    }

    /// Id of a registered method.
    #[must_use]
    pub fn try_get_id(&self, idx: MethodIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[MethodIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<MethodDefRecord>) {
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
            writer.write_u16(record.rva);
            writer.write_u32(record.flags);
            writer.write_u8(record.retval_count);
            writer.write_u8(record.arg_count);
            writer.write_u8(record.local_count);
            writer.write_u8(record.eval_stack);
            writer.write_u16(record.locals_sig);
            writer.write_u16(record.signature);
            writer.finish("method-def", METHOD_DEF_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for MethodDefTable {
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
        let mut table = MethodDefTable::new();
        table.register(MethodIdx(0)).unwrap();
        table.set_records(vec![MethodDefRecord {
            name: 1,
            rva: 0,
            flags: 0x0000_0086,
            retval_count: 0,
            arg_count: 1,
            local_count: 0,
            eval_stack: 8,
            locals_sig: EMPTY_INDEX,
            signature: 0,
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), METHOD_DEF_RECORD_SIZE);
    }

    #[test]
    fn write_is_gated_on_minimization() {
        let mut table = MethodDefTable::new();
        table.register(MethodIdx(0)).unwrap();
        table.set_records(vec![MethodDefRecord {
            name: 0,
            rva: EMPTY_INDEX,
            flags: 0,
            retval_count: 0,
            arg_count: 0,
            local_count: 0,
            eval_stack: 0,
            locals_sig: EMPTY_INDEX,
            signature: 0,
        }]);

        let mut out = Vec::new();
        table.write(false, &mut out).unwrap();
        assert!(out.is_empty());
    }
}

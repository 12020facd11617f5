//! Type specification table.
//!
//! Structural types (generic instantiations, arrays, by-refs, generic
//! parameters in signature position) that no ref or def can express. Entries
//! are uniqued by their encoded signature bytes; the 4-byte record points at
//! the interned signature.

use rustc_hash::FxHashMap;

use crate::{
    tables::base::{RecordWriter, DEF_ID_LIMIT},
    Error, Result,
};

/// On-wire record width: signature id plus padding.
pub const TYPE_SPEC_RECORD_SIZE: usize = 4;

/// The type specification table.
pub struct TypeSpecTable {
    ids: FxHashMap<Vec<u8>, u16>,
    /// Signature-table id per entry, in id order
    sig_ids: Vec<u16>,
    /// Encoded signature bytes per entry, in id order
    items: Vec<Vec<u8>>,
}

impl TypeSpecTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        TypeSpecTable {
            ids: FxHashMap::default(),
            sig_ids: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Intern a structural type by its encoded signature bytes.
    ///
    /// `sig_id` is the signature-table offset of the same bytes, stored in
    /// the record.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn get_or_create(&mut self, bytes: Vec<u8>, sig_id: u16) -> Result<u16> {
        if let Some(&id) = self.ids.get(&bytes) {
            return Ok(id);
        }

        let id = self.items.len();
        if id > usize::from(DEF_ID_LIMIT) {
            return Err(Error::IndexOverflow("type-spec"));
        }

        let id = id as u16;
        self.ids.insert(bytes.clone(), id);
        self.items.push(bytes);
        self.sig_ids.push(sig_id);
        Ok(id)
    }

    /// Id of an already-interned structural type.
    #[must_use]
    pub fn try_get_id(&self, bytes: &[u8]) -> Option<u16> {
        self.ids.get(bytes).copied()
    }

    /// Signature-table ids in entry order.
    #[must_use]
    pub fn sig_ids(&self) -> &[u16] {
        &self.sig_ids
    }

    /// Encoded signature bytes in entry order.
    #[must_use]
    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
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
        for &sig_id in &self.sig_ids {
            let mut writer = RecordWriter::begin(out);
            writer.write_u16(sig_id);
            writer.write_u16(0);
            writer.finish("type-spec", TYPE_SPEC_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for TypeSpecTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_share_an_id() {
        let mut table = TypeSpecTable::new();
        let a = table.get_or_create(vec![0x13, 0x07], 0).unwrap();
        let b = table.get_or_create(vec![0x13, 0x07], 0).unwrap();
        let c = table.get_or_create(vec![0x14, 0x07], 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn record_width_is_exact() {
        let mut table = TypeSpecTable::new();
        table.get_or_create(vec![0x13, 0x07], 9).unwrap();

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), TYPE_SPEC_RECORD_SIZE);
        assert_eq!(out, [0x09, 0x00, 0x00, 0x00]);
    }
}

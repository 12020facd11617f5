//! Field and method reference tables.
//!
//! External member references split by kind into two tables with identical
//! 6-byte record shapes. Both unique their entries on the declaring type,
//! name, and signature, so overloads stay distinct while duplicate rows in
//! the source metadata fold onto one record.

use rustc_hash::FxHashMap;

use crate::{
    loader::{MemberRefIdx, MemberRefSig, TypeHandle},
    tables::base::{IndexedTable, RecordWriter, REF_ID_LIMIT},
    Result,
};

/// On-wire record width of both tables: name, container, signature.
pub const MEMBER_REF_RECORD_SIZE: usize = 6;

/// Equality key of a member reference.
type MemberKey = (TypeHandle, String, MemberRefSig);

/// Fully resolved member-ref record.
pub struct MemberRefRecord {
    /// Name string id
    pub name: u16,
    /// Encoded declaring-type token
    pub container: u16,
    /// Signature blob id
    pub signature: u16,
}

/// One of the two member reference tables.
pub struct MemberRefTable {
    name: &'static str,
    base: IndexedTable<MemberRefIdx>,
    by_key: FxHashMap<MemberKey, u16>,
    records: Vec<MemberRefRecord>,
}

impl MemberRefTable {
    /// Create the field-ref flavor.
    #[must_use]
    pub fn fields() -> Self {
        Self::new("field-ref")
    }

    /// Create the method-ref flavor.
    #[must_use]
    pub fn methods() -> Self {
        Self::new("method-ref")
    }

    fn new(name: &'static str) -> Self {
        MemberRefTable {
            name,
            base: IndexedTable::new(name, REF_ID_LIMIT),
            by_key: FxHashMap::default(),
            records: Vec::new(),
        }
    }

    /// Register a member reference, folding duplicates by declaring type,
    /// name, and signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] past the id ceiling.
    pub fn register(
        &mut self,
        idx: MemberRefIdx,
        declaring: TypeHandle,
        name: &str,
        sig: &MemberRefSig,
    ) -> Result<u16> {
        let key = (declaring, name.to_string(), sig.clone());
        if let Some(&id) = self.by_key.get(&key) {
            self.base.alias(idx, id);
            return Ok(id);
        }
        let id = self.base.get_or_create(idx)?;
        self.by_key.insert(key, id);
        Ok(id)
    }

    /// Id of a registered reference.
    #[must_use]
    pub fn try_get_id(&self, idx: MemberRefIdx) -> Option<u16> {
        self.base.try_get_id(idx)
    }

    /// Items in id order.
    #[must_use]
    pub fn items(&self) -> &[MemberRefIdx] {
        self.base.items()
    }

    /// Install the resolved records, one per item, in id order.
    pub fn set_records(&mut self, records: Vec<MemberRefRecord>) {
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
            writer.write_u16(record.container);
            writer.write_u16(record.signature);
            writer.finish(self.name, MEMBER_REF_RECORD_SIZE)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{MethodSig, TypeRefIdx, TypeSig};

    fn void_sig() -> MemberRefSig {
        MemberRefSig::Method(MethodSig {
            has_this: true,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: Vec::new(),
        })
    }

    #[test]
    fn overloads_stay_distinct() {
        let mut table = MemberRefTable::methods();
        let declaring = TypeHandle::Ref(TypeRefIdx(0));

        let a = table
            .register(MemberRefIdx(0), declaring, "Write", &void_sig())
            .unwrap();
        let with_arg = MemberRefSig::Method(MethodSig {
            has_this: true,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: vec![TypeSig::I4],
        });
        let b = table
            .register(MemberRefIdx(1), declaring, "Write", &with_arg)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn duplicate_rows_fold() {
        let mut table = MemberRefTable::methods();
        let declaring = TypeHandle::Ref(TypeRefIdx(0));
        let a = table
            .register(MemberRefIdx(0), declaring, "Write", &void_sig())
            .unwrap();
        let b = table
            .register(MemberRefIdx(9), declaring, "Write", &void_sig())
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.try_get_id(MemberRefIdx(9)), Some(a));
    }

    #[test]
    fn record_width_is_exact() {
        let mut table = MemberRefTable::fields();
        table
            .register(
                MemberRefIdx(0),
                TypeHandle::Ref(TypeRefIdx(0)),
                "value",
                &MemberRefSig::Field(TypeSig::I4),
            )
            .unwrap();
        table.set_records(vec![MemberRefRecord {
            name: 2,
            container: 5,
            signature: 0,
        }]);

        let mut out = Vec::new();
        table.write(true, &mut out).unwrap();
        assert_eq!(out.len(), MEMBER_REF_RECORD_SIZE);
    }
}
